//!
//! The Key module contains the [KeyValue] trait, which carries the formatting rule for every type
//! that may appear as a field of a structured key, along with its implementations.
//!
//! Only [KeyValue] and the two constants are publicly re-exported.
//!

use core::fmt::Write;

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use num_traits::Zero;
use uuid::Uuid;

/// The character placed between the segments of an encoded key
pub const KEY_DELIMITER : char = '/';

/// The `chrono` format used for every date and time key field, `yyyy-MM-dd-HH-mm-ss`
///
/// The format has second resolution, so sub-second parts of a value are lost in the key.
pub const DATE_TIME_FORMAT : &str = "%Y-%m-%d-%H-%M-%S";

/// A type that can be a field of a [KeyRecord](crate::KeyRecord)
///
/// The trait is the formatting rule for the type.  A printed value never contains the
/// [KEY_DELIMITER], and parsing a printed value gives back an equal value (at the resolution of
/// the rule).  A type without an implementation can't be registered as a key field, so a
/// record with an unsupported field fails to compile rather than failing at runtime.
///
/// The errors are plain strings, the schema that called the rule wraps them with the record type
/// and the field position.
pub trait KeyValue : Sized + Send + Sync + 'static {

    /// `true` for types that may hold no value at all
    const NULLABLE : bool = false;

    /// Returns `true` if the value is the type's default: `0`, `""`, the nil uuid or the
    /// default date
    fn is_default(&self) -> bool;

    /// Returns `true` if the value has no printable form
    fn is_null(&self) -> bool {
        false
    }

    /// Appends the printed value to `out`
    fn print_to(&self, out : &mut String) -> Result<(), String>;

    /// Parses one key segment
    fn parse_from(segment : &str) -> Result<Self, String>;
}

macro_rules! impl_integer_key_value {
    ($($int_t:ty),*) => {$(
        impl KeyValue for $int_t {
            fn is_default(&self) -> bool {
                self.is_zero()
            }
            fn print_to(&self, out : &mut String) -> Result<(), String> {
                write!(out, "{self}").map_err(|e| e.to_string())
            }
            fn parse_from(segment : &str) -> Result<Self, String> {
                let value = segment.parse::<$int_t>().map_err(|e| format!("'{segment}' is not a {}: {e}", stringify!($int_t)))?;
                //Signs and leading zeros parse, but the printed form has neither
                if value.to_string() != segment {
                    return Err(format!("'{segment}' is not how {value} is printed"));
                }
                Ok(value)
            }
        }
    )*};
}

impl_integer_key_value!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl KeyValue for Uuid {
    fn is_default(&self) -> bool {
        self.is_nil()
    }
    fn print_to(&self, out : &mut String) -> Result<(), String> {
        write!(out, "{}", self.as_simple()).map_err(|e| e.to_string())
    }
    fn parse_from(segment : &str) -> Result<Self, String> {
        //The parser also accepts the hyphenated and braced forms, which a key never holds
        if segment.len() != uuid::fmt::Simple::LENGTH {
            return Err(format!("'{segment}' is not a 32 digit uuid"));
        }
        Uuid::try_parse(segment).map_err(|e| format!("'{segment}' is not a uuid: {e}"))
    }
}

impl KeyValue for NaiveDateTime {
    fn is_default(&self) -> bool {
        *self == NaiveDateTime::default()
    }
    fn print_to(&self, out : &mut String) -> Result<(), String> {
        write!(out, "{}", self.format(DATE_TIME_FORMAT)).map_err(|e| e.to_string())
    }
    fn parse_from(segment : &str) -> Result<Self, String> {
        NaiveDateTime::parse_from_str(segment, DATE_TIME_FORMAT).map_err(|e| format!("'{segment}' is not a date: {e}"))
    }
}

impl KeyValue for DateTime<Utc> {
    fn is_default(&self) -> bool {
        *self == DateTime::<Utc>::default()
    }
    fn print_to(&self, out : &mut String) -> Result<(), String> {
        self.naive_utc().print_to(out)
    }
    fn parse_from(segment : &str) -> Result<Self, String> {
        let naive = NaiveDateTime::parse_from(segment)?;
        Ok(Utc.from_utc_datetime(&naive))
    }
}

/// Printed in UTC.  A parsed value is anchored at offset `+00:00`, so it is the same instant as
/// the printed one but doesn't carry the original offset.
impl KeyValue for DateTime<FixedOffset> {
    fn is_default(&self) -> bool {
        *self == DateTime::<FixedOffset>::default()
    }
    fn print_to(&self, out : &mut String) -> Result<(), String> {
        self.naive_utc().print_to(out)
    }
    fn parse_from(segment : &str) -> Result<Self, String> {
        let naive = NaiveDateTime::parse_from(segment)?;
        let utc = FixedOffset::east_opt(0).ok_or_else(|| "no zero offset".to_string())?;
        Ok(utc.from_utc_datetime(&naive))
    }
}

impl KeyValue for String {
    fn is_default(&self) -> bool {
        self.is_empty()
    }
    fn print_to(&self, out : &mut String) -> Result<(), String> {
        if self.contains(KEY_DELIMITER) {
            return Err(format!("'{self}' contains the key delimiter '{KEY_DELIMITER}'"));
        }
        out.push_str(self);
        Ok(())
    }
    fn parse_from(segment : &str) -> Result<Self, String> {
        Ok(segment.to_string())
    }
}

/// `None` has no printed form and stops the key, `Some(v)` prints as `v`.
///
/// An empty segment parses as `None`, so a `Some` whose printed value is empty (e.g.
/// `Some(String::new())`) can't be told apart from `None` and is rejected when printing.
impl<V : KeyValue> KeyValue for Option<V> {
    const NULLABLE : bool = true;

    fn is_default(&self) -> bool {
        self.is_none()
    }
    fn is_null(&self) -> bool {
        self.is_none()
    }
    fn print_to(&self, out : &mut String) -> Result<(), String> {
        if let Some(value) = self {
            let start = out.len();
            value.print_to(out)?;
            if out.len() == start {
                return Err("an empty value inside Some would read back as None".to_string());
            }
        }
        Ok(())
    }
    fn parse_from(segment : &str) -> Result<Self, String> {
        if segment.is_empty() {
            Ok(None)
        } else {
            V::parse_from(segment).map(Some)
        }
    }
}
