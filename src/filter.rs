//!
//! The Filter module contains [TableFilter], the query predicates this crate sends to a
//! [TableService](crate::TableService).
//!

use core::fmt;

use crate::error::Result;
use crate::records::validate_key;

/// A predicate over the keys of a table
///
/// Every variant is bound to a single partition.  `Display` renders the filter in the store's
/// expression syntax, e.g. `(PartitionKey eq 'p') and (RowKey ge 'a')`, and [matches](Self::matches)
/// evaluates it locally.  Values are rendered as-is, escaping them for a URL is up to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableFilter {
    /// All the entities of a partition
    Partition(String),
    /// The entities of a partition whose row keys fall in `start_row_key..end_row_key`.  A missing
    /// bound leaves that side open.
    Range {
        partition_key : String,
        start_row_key : Option<String>,
        end_row_key : Option<String>,
    },
    /// The entities of a partition with any of the row keys
    RowKeys {
        partition_key : String,
        row_keys : Vec<String>,
    },
}

impl TableFilter {

    pub fn partition(partition_key : &str) -> Result<Self> {
        validate_key("partition key", partition_key)?;
        Ok(Self::Partition(partition_key.to_string()))
    }

    /// The row keys from `start_row_key` (inclusive) to `end_row_key` (exclusive).  Empty bounds are
    /// ignored, like missing ones.
    pub fn range(partition_key : &str, start_row_key : Option<&str>, end_row_key : Option<&str>) -> Result<Self> {
        validate_key("partition key", partition_key)?;
        let bound = |key : Option<&str>| -> Result<Option<String>> {
            match key {
                Some(key) if !key.is_empty() => {
                    validate_key("row key", key)?;
                    Ok(Some(key.to_string()))
                },
                _ => Ok(None),
            }
        };
        Ok(Self::Range{ partition_key : partition_key.to_string(), start_row_key : bound(start_row_key)?, end_row_key : bound(end_row_key)? })
    }

    /// The row keys starting with `prefix`, e.g. a prefix from
    /// [encode_prefix](crate::KeySchema::encode_prefix)
    pub fn row_prefix(partition_key : &str, prefix : &str) -> Result<Self> {
        let mut filter = Self::range(partition_key, Some(prefix), None)?;
        //The successor may end in a control character, which is fine as a bound
        if let Self::Range{ end_row_key, .. } = &mut filter {
            *end_row_key = prefix_successor(prefix);
        }
        Ok(filter)
    }

    pub fn row_keys<K : AsRef<str>>(partition_key : &str, row_keys : impl IntoIterator<Item = K>) -> Result<Self> {
        validate_key("partition key", partition_key)?;
        let row_keys = row_keys.into_iter().map(|key| {
            validate_key("row key", key.as_ref())?;
            Ok(key.as_ref().to_string())
        }).collect::<Result<Vec<String>>>()?;
        Ok(Self::RowKeys{ partition_key : partition_key.to_string(), row_keys })
    }

    pub fn partition_key(&self) -> &str {
        match self {
            Self::Partition(partition_key)
            | Self::Range{ partition_key, .. }
            | Self::RowKeys{ partition_key, .. } => partition_key,
        }
    }

    /// The lowest row key the filter can match, if there is one
    pub fn lower_row_bound(&self) -> Option<&str> {
        match self {
            Self::Partition(_) => None,
            Self::Range{ start_row_key, .. } => start_row_key.as_deref(),
            Self::RowKeys{ row_keys, .. } => row_keys.iter().min().map(String::as_str),
        }
    }

    /// Evaluates the filter against the keys of an entity
    pub fn matches(&self, partition_key : &str, row_key : &str) -> bool {
        if partition_key != self.partition_key() {
            return false;
        }
        match self {
            Self::Partition(_) => true,
            Self::Range{ start_row_key, end_row_key, .. } => {
                start_row_key.as_deref().map_or(true, |start| row_key >= start)
                    && end_row_key.as_deref().map_or(true, |end| row_key < end)
            },
            Self::RowKeys{ row_keys, .. } => row_keys.iter().any(|key| key == row_key),
        }
    }
}

impl fmt::Display for TableFilter {
    fn fmt(&self, f : &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(PartitionKey eq '{}')", self.partition_key())?;
        match self {
            Self::Partition(_) => Ok(()),
            Self::Range{ start_row_key, end_row_key, .. } => {
                if let Some(start) = start_row_key {
                    write!(f, " and (RowKey ge '{start}')")?;
                }
                if let Some(end) = end_row_key {
                    write!(f, " and (RowKey lt '{end}')")?;
                }
                Ok(())
            },
            Self::RowKeys{ row_keys, .. } => {
                if row_keys.is_empty() {
                    return Ok(());
                }
                write!(f, " and (")?;
                for (i, key) in row_keys.iter().enumerate() {
                    if i > 0 {
                        write!(f, " or ")?;
                    }
                    write!(f, "(RowKey eq '{key}')")?;
                }
                write!(f, ")")
            },
        }
    }
}

/// The smallest string greater than every string starting with `prefix`, or `None` if there is
/// no such string or `prefix` is empty
fn prefix_successor(prefix : &str) -> Option<String> {
    let mut chars : Vec<char> = prefix.chars().collect();
    while let Some(last) = chars.pop() {
        let next = match last as u32 + 1 {
            0xD800 => Some('\u{E000}'),
            code => char::from_u32(code),
        };
        if let Some(next) = next {
            chars.push(next);
            return Some(chars.into_iter().collect());
        }
    }
    None
}
