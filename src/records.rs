//!
//! The Records module contains the envelope that carries an entity to and from the store, and the
//! typed entity the application works with.  Both are re-exported to the public interface.
//!

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use crate::encode_decode::Coder;
use crate::error::{Error, Result};
use crate::key_schema::KeyRecord;

/// The largest encoded content an entity may carry, in bytes
///
/// The store keeps an entity as at most 15 properties of 64 KiB each.
pub const MAX_ENTITY_CONTENT : usize = 15 * 64 * 1024;

/// The bytes counted for each entity in a transaction on top of its keys and content, for the
/// property names and framing the store adds
pub const ENTITY_OVERHEAD : usize = 128;

/// The quoting character of the store's filter expressions, which no key may contain
pub const FORBIDDEN_KEY_CHAR : char = '\'';

/// Checks that a partition or row key can be quoted in a filter expression
///
/// `which` names the key in the error, e.g. `"partition key"`.
pub fn validate_key(which : &'static str, key : &str) -> Result<()> {
    if key.contains(FORBIDDEN_KEY_CHAR) {
        return Err(Error::InvalidKey{ which, key : key.to_string(), reason : "contains a single quote" });
    }
    if key.chars().any(char::is_control) {
        return Err(Error::InvalidKey{ which, key : key.to_string(), reason : "contains a control character" });
    }
    Ok(())
}

/// An entity as the store sees it: two keys and opaque content
///
/// The timestamp is assigned by the store on every write, and is ignored when writing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEntity {
    pub partition_key : String,
    pub row_key : String,
    pub timestamp : Option<DateTime<Utc>>,
    pub content : Vec<u8>,
}

impl RawEntity {

    /// Creates a new envelope, checking the keys and the content size
    pub fn new(partition_key : impl Into<String>, row_key : impl Into<String>, content : Vec<u8>) -> Result<Self> {
        let partition_key = partition_key.into();
        let row_key = row_key.into();
        validate_key("partition key", &partition_key)?;
        validate_key("row key", &row_key)?;
        if content.len() > MAX_ENTITY_CONTENT {
            return Err(Error::EntityTooLarge{ partition_key, row_key, size : content.len(), max : MAX_ENTITY_CONTENT });
        }
        Ok(Self{ partition_key, row_key, timestamp : None, content })
    }

    /// An envelope with no content, enough to address an entity in a delete
    pub(crate) fn key_only(partition_key : &str, row_key : &str) -> Self {
        Self{ partition_key : partition_key.to_string(), row_key : row_key.to_string(), timestamp : None, content : vec![] }
    }

    /// The number of bytes the entity adds to a batch transaction
    pub fn payload_size(&self) -> usize {
        self.content.len() + self.partition_key.len() + self.row_key.len() + ENTITY_OVERHEAD
    }
}

/// An entity with its content decoded
#[derive(Debug, Clone, PartialEq)]
pub struct Entity<T> {
    pub partition_key : String,
    pub row_key : String,
    /// Set on entities read from the store
    pub timestamp : Option<DateTime<Utc>>,
    pub value : T,
}

impl<T> Entity<T> {

    pub fn new(partition_key : impl Into<String>, row_key : impl Into<String>, value : T) -> Self {
        Self{ partition_key : partition_key.into(), row_key : row_key.into(), timestamp : None, value }
    }

    /// Creates an entity whose keys are the encoded key records `partition` and `row`
    pub fn keyed<P : KeyRecord, R : KeyRecord>(partition : &P, row : &R, value : T) -> Result<Self> {
        Ok(Self::new(partition.to_key()?, row.to_key()?, value))
    }

    /// Decodes the partition key as a `P`
    pub fn partition_as<P : KeyRecord>(&self) -> Result<P> {
        P::from_key(&self.partition_key)
    }

    /// Decodes the row key as an `R`
    pub fn row_as<R : KeyRecord>(&self) -> Result<R> {
        R::from_key(&self.row_key)
    }

    pub(crate) fn to_raw<C : Coder>(&self, coder : &C) -> Result<RawEntity> where T : Serialize {
        let content = coder.encode_to_buf(&self.value).map_err(Error::Format)?;
        RawEntity::new(self.partition_key.as_str(), self.row_key.as_str(), content)
    }

    pub(crate) fn from_raw<C : Coder>(raw : RawEntity, coder : &C) -> Result<Self> where T : serde::de::DeserializeOwned {
        let value = coder.decode_from_bytes(&raw.content).map_err(Error::Format)?;
        Ok(Self{ partition_key : raw.partition_key, row_key : raw.row_key, timestamp : raw.timestamp, value })
    }
}
