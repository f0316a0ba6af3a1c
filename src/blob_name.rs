//!
//! The BlobName module applies the key codec to hierarchical blob names: a name is a key record
//! that also knows which container it lives in.
//!

use core::fmt;

use crate::error::Result;
use crate::key_schema::{KeyRecord, KeySchema};

/// A key record used as the name of a blob
pub trait BlobName : KeyRecord {
    /// The container holding the blobs named by this type
    fn container_name(&self) -> &str;
}

/// Where a blob is, or where a listing starts
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobLocation {
    pub container : String,
    pub path : String,
}

impl fmt::Display for BlobLocation {
    fn fmt(&self, f : &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container, self.path)
    }
}

/// The container and encoded name of a blob
pub fn blob_location<N : BlobName>(name : &N) -> Result<BlobLocation> {
    Ok(BlobLocation{ container : name.container_name().to_string(), path : name.to_key()? })
}

/// The container and the path prefix shared by every blob whose name starts with the fields set
/// in `partial`
///
/// Fields are set from the first one on, and the first field left at a value that ends the key
/// (a `None`, or a default flagged with [treat_default_as_null](crate::Rank::treat_default_as_null))
/// ends the prefix.
pub fn listing_prefix<N : BlobName>(partial : &N) -> Result<BlobLocation> {
    let path = KeySchema::<N>::get()?.encode_prefix(partial)?;
    Ok(BlobLocation{ container : partial.container_name().to_string(), path })
}

/// Decodes a blob path, as found in a listing, into a name
pub fn parse_blob_name<N : BlobName>(path : &str) -> Result<N> {
    N::from_key(path)
}
