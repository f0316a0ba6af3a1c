//!
//! The Error module contains the error taxonomy of the crate, and the [RemoteError] that a
//! [TableService](crate::TableService) reports back.  Everything here is re-exported.
//!

use thiserror::Error;

/// The broad classes of failures a remote table store can report
///
/// A [TableService](crate::TableService) implementation must map its transport-level
/// errors onto these kinds, because the recovery protocols in this crate are driven by them.
#[derive(Copy, Debug, Clone, Hash, Eq, PartialEq, derive_more::Display, serde::Serialize, serde::Deserialize)]
pub enum RemoteErrorKind {
    /// The table addressed by the request does not exist
    TableNotFound,
    /// A batch transaction was rejected because its content was too large
    BatchTooLarge,
    /// The request did not complete in the time allowed by the server
    TimedOut,
    /// One or more entities referenced by the request do not exist
    EntityNotFound,
    /// An insert referenced an entity that already exists
    EntityAlreadyExists,
    /// The server is throttling the caller
    Throttled,
    /// The server is temporarily unable to serve the request
    ServerBusy,
    /// Anything else
    Other,
}

/// An error reported by a [TableService](crate::TableService)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct RemoteError {
    pub kind : RemoteErrorKind,
    /// Set by the service when it knows the same request may succeed later
    pub retryable : bool,
    pub message : String,
}

impl RemoteError {
    pub fn new(kind : RemoteErrorKind, message : impl Into<String>) -> Self {
        let retryable = matches!(kind, RemoteErrorKind::Throttled | RemoteErrorKind::ServerBusy);
        Self{ kind, retryable, message : message.into() }
    }

    pub fn table_not_found(table : &str) -> Self {
        Self::new(RemoteErrorKind::TableNotFound, format!("table '{table}' does not exist"))
    }

    pub fn batch_too_large(message : impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::BatchTooLarge, message)
    }

    pub fn entity_not_found(partition_key : &str, row_key : &str) -> Self {
        Self::new(RemoteErrorKind::EntityNotFound, format!("no entity at ('{partition_key}', '{row_key}')"))
    }

    pub fn entity_already_exists(partition_key : &str, row_key : &str) -> Self {
        Self::new(RemoteErrorKind::EntityAlreadyExists, format!("an entity already exists at ('{partition_key}', '{row_key}')"))
    }

    pub fn throttled(message : impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Throttled, message)
    }

    pub fn other(message : impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Other, message)
    }

    /// Overrides the retryable flag the kind implies
    pub fn with_retryable(mut self, retryable : bool) -> Self {
        self.retryable = retryable;
        self
    }
}

/// The remote operation an error happened in
#[derive(Copy, Debug, Clone, Eq, PartialEq, derive_more::Display)]
pub enum Operation {
    #[display(fmt = "create table")]
    CreateTable,
    #[display(fmt = "delete table")]
    DeleteTable,
    #[display(fmt = "list tables")]
    ListTables,
    #[display(fmt = "query")]
    Query,
    #[display(fmt = "insert")]
    Insert,
    #[display(fmt = "update")]
    Update,
    #[display(fmt = "delete")]
    Delete,
}

/// Enough context to diagnose a failed remote call: what was attempted, where, and on which key
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct OpContext {
    pub operation : Operation,
    pub table : String,
    /// The partition key (and row key, when a single entity was involved), `pk/rk` style
    pub key : Option<String>,
}

impl OpContext {
    pub fn new(operation : Operation, table : &str) -> Self {
        Self{ operation, table : table.to_string(), key : None }
    }

    pub fn with_partition(mut self, partition_key : &str) -> Self {
        self.key = Some(partition_key.to_string());
        self
    }

    pub fn with_entity(mut self, partition_key : &str, row_key : &str) -> Self {
        self.key = Some(format!("{partition_key}/{row_key}"));
        self
    }
}

impl core::fmt::Display for OpContext {
    fn fmt(&self, f : &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} on table '{}'", self.operation, self.table)?;
        if let Some(key) = &self.key {
            write!(f, " (key '{key}')")?;
        }
        Ok(())
    }
}

/// Every error surfaced by this crate
#[derive(Debug, Error)]
pub enum Error {
    /// The key schema of a record type is malformed
    #[error("invalid key schema for {type_name}: {reason}")]
    Schema { type_name : &'static str, reason : String },

    /// A key field value doesn't fit its formatting rule
    #[error("cannot encode key field #{position} of {type_name}: {reason}")]
    Encoding { type_name : &'static str, position : usize, reason : String },

    /// A partition or row key contains a character the remote filter syntax can't carry
    #[error("invalid {which} '{key}': {reason}")]
    InvalidKey { which : &'static str, key : String, reason : &'static str },

    /// An entity's encoded content is larger than the store accepts
    #[error("entity ('{partition_key}', '{row_key}') content is {size} bytes, more than the {max} allowed")]
    EntityTooLarge { partition_key : String, row_key : String, size : usize, max : usize },

    /// A key was decoded against a schema other than the one that produced it
    #[error("key '{key}' does not match the schema of {type_name}: {reason}")]
    TypeMismatch { type_name : &'static str, key : String, reason : String },

    /// The payload coder failed
    #[error("format error: {0}")]
    Format(String),

    /// A transient error persisted past the retry policy
    #[error("{context} still failing after {attempts} attempts: {source}")]
    RemoteTransient { context : OpContext, attempts : u32, source : RemoteError },

    /// The documented fallback for a structural error failed in turn
    #[error("{context} could not recover: {source}")]
    RemoteStructural { context : OpContext, source : RemoteError },

    /// Any remote error without a recovery protocol, surfaced unchanged
    #[error("{context} failed: {source}")]
    RemoteUnrecoverable { context : OpContext, source : RemoteError },
}

impl Error {
    /// The underlying [RemoteError], for the remote variants
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            Error::RemoteTransient{ source, .. }
            | Error::RemoteStructural{ source, .. }
            | Error::RemoteUnrecoverable{ source, .. } => Some(source),
            _ => None,
        }
    }

    /// The kind of the underlying [RemoteError], for the remote variants
    pub fn remote_kind(&self) -> Option<RemoteErrorKind> {
        self.remote().map(|err| err.kind)
    }
}

/// Result type for this crate
pub type Result<T> = std::result::Result<T, Error>;
