//!
//! The KeySchema module contains the machinery that turns a record type into an ordered,
//! `/`-delimited key and back.  A record lists its key fields once, in [KeyRecord::describe], and
//! the resulting [KeySchema] is built on first use and cached for the life of the process.
//!

use core::any::{Any, TypeId};
use core::marker::PhantomData;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use crate::error::{Error, Result};
use crate::key::{KeyValue, KEY_DELIMITER};

/// A record whose fields make up a structured key
///
/// ## An example of a key record and a record that extends it
/// ```
/// use resilient_tables::{*};
///
/// #[derive(Default, Debug, PartialEq)]
/// struct Account {
///     tenant : uuid::Uuid,
///     account_id : u64,
/// }
/// impl KeyRecord for Account {
///     fn describe(s : &mut SchemaBuilder<Self>) {
///         s.field(0, |r| &r.tenant, |r| &mut r.tenant);
///         s.field(1, |r| &r.account_id, |r| &mut r.account_id);
///     }
/// }
///
/// #[derive(Default, Debug, PartialEq)]
/// struct Invoice {
///     account : Account,
///     number : u32,
/// }
/// impl KeyRecord for Invoice {
///     fn describe(s : &mut SchemaBuilder<Self>) {
///         s.inherit(|r| &r.account, |r| &mut r.account);
///         s.field(Rank::new(0).treat_default_as_null(), |r| &r.number, |r| &mut r.number);
///     }
/// }
///
/// let account = Account{ tenant : uuid::Uuid::from_u128(7), account_id : 1000 };
/// let invoice = Invoice{ account : account, number : 1234 };
/// assert_eq!(invoice.to_key().unwrap(), "00000000000000000000000000000007/1000/1234");
/// assert_eq!(Invoice::from_key("00000000000000000000000000000007/1000/1234").unwrap(), invoice);
/// ```
pub trait KeyRecord : Default + Send + Sync + 'static {

    /// Registers the key fields of the record with the builder
    ///
    /// Fields are ordered by their rank.  Ranks are only compared between fields registered by the
    /// same `describe`, and the fields of an inherited record always come first.
    fn describe(s : &mut SchemaBuilder<Self>);

    /// Encodes the record's key fields
    fn to_key(&self) -> Result<String> {
        KeySchema::<Self>::get()?.encode(self)
    }

    /// Decodes a key produced by [to_key](KeyRecord::to_key), failing with [Error::TypeMismatch]
    /// if the key wasn't produced by this record type
    fn from_key(key : &str) -> Result<Self> {
        KeySchema::<Self>::get()?.decode(key)
    }
}

/// Encodes the key fields of a record
pub fn encode_key<T : KeyRecord>(record : &T) -> Result<String> {
    record.to_key()
}

/// Decodes a key into a record of type `T`
pub fn decode_key<T : KeyRecord>(key : &str) -> Result<T> {
    T::from_key(key)
}

/// The position of a key field among the fields of its record
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Rank {
    pub rank : u32,
    pub treat_default_as_null : bool,
}

impl Rank {
    pub const fn new(rank : u32) -> Self {
        Self{ rank, treat_default_as_null : false }
    }

    /// A field holding the default of its type ends the key, and the fields after it are left out
    pub const fn treat_default_as_null(mut self) -> Self {
        self.treat_default_as_null = true;
        self
    }
}

impl From<u32> for Rank {
    fn from(rank : u32) -> Self {
        Self::new(rank)
    }
}

/// A key field with its value type erased
trait ErasedField<T> : Send + Sync {
    /// The value stored in `record` ends the key at this field
    fn terminates(&self, record : &T) -> bool;
    /// A key may end right before this field
    fn truncatable(&self) -> bool;
    fn print(&self, record : &T, out : &mut String) -> core::result::Result<(), String>;
    fn parse(&self, record : &mut T, segment : &str) -> core::result::Result<(), String>;
}

type Getter<T, V> = Arc<dyn Fn(&T) -> &V + Send + Sync>;
type MutGetter<T, V> = Arc<dyn Fn(&mut T) -> &mut V + Send + Sync>;

struct Field<T, V> {
    get : Getter<T, V>,
    get_mut : MutGetter<T, V>,
    treat_default_as_null : bool,
}

impl<T, V : KeyValue> ErasedField<T> for Field<T, V> {
    fn terminates(&self, record : &T) -> bool {
        let value = (self.get)(record);
        value.is_null() || (self.treat_default_as_null && value.is_default())
    }
    fn truncatable(&self) -> bool {
        V::NULLABLE || self.treat_default_as_null
    }
    fn print(&self, record : &T, out : &mut String) -> core::result::Result<(), String> {
        (self.get)(record).print_to(out)
    }
    fn parse(&self, record : &mut T, segment : &str) -> core::result::Result<(), String> {
        *(self.get_mut)(record) = V::parse_from(segment)?;
        Ok(())
    }
}

/// A field of an inherited record, reached through the accessors to that record
struct InheritedField<T, B : 'static> {
    inner : &'static dyn ErasedField<B>,
    get : Getter<T, B>,
    get_mut : MutGetter<T, B>,
}

impl<T, B : 'static> ErasedField<T> for InheritedField<T, B> {
    fn terminates(&self, record : &T) -> bool {
        self.inner.terminates((self.get)(record))
    }
    fn truncatable(&self) -> bool {
        self.inner.truncatable()
    }
    fn print(&self, record : &T, out : &mut String) -> core::result::Result<(), String> {
        self.inner.print((self.get)(record), out)
    }
    fn parse(&self, record : &mut T, segment : &str) -> core::result::Result<(), String> {
        self.inner.parse((self.get_mut)(record), segment)
    }
}

/// Collects the key fields of a record type, see [KeyRecord::describe]
pub struct SchemaBuilder<T> {
    inherited : Vec<Box<dyn ErasedField<T>>>,
    has_parent : bool,
    own : Vec<(u32, Box<dyn ErasedField<T>>)>,
    problems : Vec<String>,
}

impl<T : 'static> SchemaBuilder<T> {

    fn new() -> Self {
        Self{ inherited : vec![], has_parent : false, own : vec![], problems : vec![] }
    }

    /// Adds a key field at `rank`.  Pass a [Rank] built with
    /// [treat_default_as_null](Rank::treat_default_as_null) to make the field end the key when
    /// it holds its default value.
    pub fn field<V, G, M>(&mut self, rank : impl Into<Rank>, get : G, get_mut : M) -> &mut Self
    where
        V : KeyValue,
        G : Fn(&T) -> &V + Send + Sync + 'static,
        M : Fn(&mut T) -> &mut V + Send + Sync + 'static,
    {
        let rank = rank.into();
        let field = Field{ get : Arc::new(get) as Getter<T, V>, get_mut : Arc::new(get_mut) as MutGetter<T, V>, treat_default_as_null : rank.treat_default_as_null };
        self.own.push((rank.rank, Box::new(field)));
        self
    }

    /// Places all the key fields of the record `B`, reached through the accessors, in front of
    /// the fields of this record
    pub fn inherit<B, G, M>(&mut self, get : G, get_mut : M) -> &mut Self
    where
        B : KeyRecord,
        G : Fn(&T) -> &B + Send + Sync + 'static,
        M : Fn(&mut T) -> &mut B + Send + Sync + 'static,
    {
        if self.has_parent {
            self.problems.push(format!("more than one record is inherited, {} is one too many", core::any::type_name::<B>()));
            return self;
        }
        self.has_parent = true;

        match KeySchema::<B>::get() {
            Ok(parent) => {
                let get : Getter<T, B> = Arc::new(get);
                let get_mut : MutGetter<T, B> = Arc::new(get_mut);
                for inner in parent.fields.iter() {
                    self.inherited.push(Box::new(InheritedField{
                        inner : inner.as_ref(),
                        get : get.clone(),
                        get_mut : get_mut.clone(),
                    }));
                }
            },
            Err(err) => self.problems.push(format!("inherited record is invalid: {err}")),
        }
        self
    }
}

/// The ordered key fields of the record type `T`
pub struct KeySchema<T> {
    fields : Vec<Box<dyn ErasedField<T>>>,
    phantom : PhantomData<fn() -> T>,
}

type SchemaCache = RwLock<HashMap<TypeId, &'static (dyn Any + Send + Sync)>>;

static SCHEMAS : OnceLock<SchemaCache> = OnceLock::new();

impl<T : KeyRecord> KeySchema<T> {

    /// Returns the schema of `T`, building it on first use
    ///
    /// A schema that fails to build isn't cached, so every use of the broken type reports the
    /// same error.
    pub fn get() -> Result<&'static Self> {
        let cache = SCHEMAS.get_or_init(Default::default);
        let type_id = TypeId::of::<T>();

        let cached = cache.read().unwrap_or_else(PoisonError::into_inner).get(&type_id).copied();
        let schema = match cached {
            Some(schema) => schema,
            None => {
                //Built outside the lock, because building a schema gets the schemas it inherits
                let built = Self::build()?;
                let mut schemas = cache.write().unwrap_or_else(PoisonError::into_inner);
                *schemas.entry(type_id).or_insert_with(|| -> &'static (dyn Any + Send + Sync) { Box::leak(Box::new(built)) })
            }
        };
        schema.downcast_ref::<Self>().ok_or_else(|| Error::Schema{
            type_name : core::any::type_name::<T>(),
            reason : "the schema cache holds another type under this type's id".to_string(),
        })
    }

    fn build() -> Result<Self> {
        let type_name = core::any::type_name::<T>();
        let mut builder = SchemaBuilder::<T>::new();
        T::describe(&mut builder);

        if let Some(problem) = builder.problems.into_iter().next() {
            return Err(Error::Schema{ type_name, reason : problem });
        }

        let mut own = builder.own;
        own.sort_by_key(|(rank, _)| *rank);
        if let Some(pair) = own.windows(2).find(|pair| pair[0].0 == pair[1].0) {
            return Err(Error::Schema{ type_name, reason : format!("rank {} is given to more than one field", pair[0].0) });
        }

        let mut fields = builder.inherited;
        fields.extend(own.into_iter().map(|(_, field)| field));
        Ok(Self{ fields, phantom : PhantomData })
    }

    /// The number of key fields, inherited ones included
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Encodes the key fields of `record`, up to the first field that ends the key
    pub fn encode(&self, record : &T) -> Result<String> {
        self.encode_counted(record).map(|(key, _)| key)
    }

    /// Encodes `record` for use as a listing prefix
    ///
    /// A key that ends before the last field gets a trailing delimiter, so the prefix matches the
    /// keys that share all the printed fields and not the keys whose last printed field merely
    /// starts the same way.
    pub fn encode_prefix(&self, record : &T) -> Result<String> {
        let (mut key, printed) = self.encode_counted(record)?;
        if printed > 0 && printed < self.fields.len() {
            key.push(KEY_DELIMITER);
        }
        Ok(key)
    }

    fn encode_counted(&self, record : &T) -> Result<(String, usize)> {
        let mut key = String::new();
        let mut printed = 0;
        for (position, field) in self.fields.iter().enumerate() {
            if field.terminates(record) {
                break;
            }
            if position > 0 {
                key.push(KEY_DELIMITER);
            }
            field.print(record, &mut key).map_err(|reason| Error::Encoding{
                type_name : core::any::type_name::<T>(),
                position,
                reason,
            })?;
            printed += 1;
        }
        Ok((key, printed))
    }

    /// Decodes a key produced by [encode](KeySchema::encode)
    ///
    /// Fields left out of the key decode as their default.  A key that couldn't have been
    /// produced by this schema fails with [Error::TypeMismatch].
    pub fn decode(&self, key : &str) -> Result<T> {
        let mismatch = |reason : String| Error::TypeMismatch{
            type_name : core::any::type_name::<T>(),
            key : key.to_string(),
            reason,
        };

        let segments : Vec<&str> = match self.fields.first() {
            None if key.is_empty() => vec![],
            None => return Err(mismatch("a key with no fields must be empty".to_string())),
            Some(first) if key.is_empty() && first.truncatable() => vec![],
            Some(_) => key.split(KEY_DELIMITER).collect(),
        };
        if segments.len() > self.fields.len() {
            return Err(mismatch(format!("{} segments for {} key fields", segments.len(), self.fields.len())));
        }
        if let Some(missing) = self.fields.get(segments.len()) {
            if !missing.truncatable() {
                return Err(mismatch(format!("the key ends before field #{}, which can't be left out", segments.len())));
            }
        }

        let mut record = T::default();
        for (position, (field, segment)) in self.fields.iter().zip(segments.iter()).enumerate() {
            field.parse(&mut record, segment).map_err(|reason| mismatch(format!("field #{position}: {reason}")))?;
            //The encoder would have stopped at this field
            if field.terminates(&record) {
                return Err(mismatch(format!("field #{position} holds a value that ends the key")));
            }
        }
        Ok(record)
    }
}
