//!
//! The Service module contains the [TableService] trait, the interface to the remote table store,
//! and the types that cross it.
//!

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Serialize, Deserialize};

use crate::error::RemoteError;
use crate::filter::TableFilter;
use crate::perf_counters::PerfCounters;
use crate::records::RawEntity;
use crate::retry::RetryPolicy;
use crate::table_config::{MAX_ENTITY_TRANSACTION_COUNT, MAX_ENTITY_TRANSACTION_PAYLOAD};

/// The write operations of a batch transaction
#[derive(Copy, Debug, Clone, Hash, Eq, PartialEq, derive_more::Display)]
pub enum BatchOperation {
    /// Adds entities, failing with `EntityAlreadyExists` if any of them exists
    Insert,
    /// Replaces entities, failing with `EntityNotFound` if any of them is missing
    Update,
    /// Removes entities, failing with `EntityNotFound` if any of them is missing.  Only the keys
    /// of the entities are used
    Delete,
}

/// Where the next page of a query starts
///
/// Returned by the store when a query has more results than fit in one page.  The keys are the
/// first entity of the next page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Continuation {
    pub next_partition_key : String,
    pub next_row_key : String,
}

/// One page of a query
#[derive(Debug, Clone, Default)]
pub struct QueryPage {
    pub entities : Vec<RawEntity>,
    /// `None` on the last page
    pub continuation : Option<Continuation>,
}

/// The interface to a remote partition/row keyed table store
///
/// Implementations report failures as [RemoteError]s with the right
/// [RemoteErrorKind](crate::RemoteErrorKind), because the recovery in this crate is driven by the
/// kind.  A batch is atomic: if it fails, none of its entities were written.
pub trait TableService : Send + Sync {

    /// Creates the table, returning `false` if it already existed
    fn create_table_if_absent(&self, table : &str) -> Result<bool, RemoteError>;

    /// Deletes the table with all its entities, returning `false` if it didn't exist
    fn delete_table_if_exists(&self, table : &str) -> Result<bool, RemoteError>;

    fn list_tables(&self) -> Result<Vec<String>, RemoteError>;

    /// Reads one page of the entities of `table` that match `filter`, in key order, starting at
    /// `continuation`
    fn query(&self, table : &str, filter : Option<&TableFilter>, continuation : Option<&Continuation>) -> Result<QueryPage, RemoteError>;

    /// Applies `operation` to all the `entities` in one transaction.  The entities share a
    /// partition key.
    fn submit_batch(&self, table : &str, operation : BatchOperation, entities : &[RawEntity]) -> Result<(), RemoteError>;

    /// Applies `operation` to one entity, outside of any batch transaction
    fn submit_single(&self, table : &str, operation : BatchOperation, entity : &RawEntity) -> Result<(), RemoteError> {
        self.submit_batch(table, operation, core::slice::from_ref(entity))
    }
}

impl<S : TableService + ?Sized> TableService for Arc<S> {
    fn create_table_if_absent(&self, table : &str) -> Result<bool, RemoteError> {
        (**self).create_table_if_absent(table)
    }
    fn delete_table_if_exists(&self, table : &str) -> Result<bool, RemoteError> {
        (**self).delete_table_if_exists(table)
    }
    fn list_tables(&self) -> Result<Vec<String>, RemoteError> {
        (**self).list_tables()
    }
    fn query(&self, table : &str, filter : Option<&TableFilter>, continuation : Option<&Continuation>) -> Result<QueryPage, RemoteError> {
        (**self).query(table, filter, continuation)
    }
    fn submit_batch(&self, table : &str, operation : BatchOperation, entities : &[RawEntity]) -> Result<(), RemoteError> {
        (**self).submit_batch(table, operation, entities)
    }
    fn submit_single(&self, table : &str, operation : BatchOperation, entity : &RawEntity) -> Result<(), RemoteError> {
        (**self).submit_single(table, operation, entity)
    }
}

/// The limits a bundled [TableService] enforces, like the remote store would
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceLimits {
    /// The most entities returned by one query
    pub page_size : usize,
    /// The most entities in one batch
    pub max_batch_count : usize,
    /// The largest total payload of one batch
    pub max_batch_payload : usize,
}

impl Default for ServiceLimits {
    fn default() -> Self {
        Self{
            page_size : 1000,
            max_batch_count : MAX_ENTITY_TRANSACTION_COUNT,
            max_batch_payload : MAX_ENTITY_TRANSACTION_PAYLOAD,
        }
    }
}

impl ServiceLimits {

    /// Rejects the batches the store rejects as a whole, before looking at any entity
    pub(crate) fn check_batch(&self, entities : &[RawEntity]) -> Result<(), RemoteError> {
        if entities.len() > self.max_batch_count {
            return Err(RemoteError::batch_too_large(format!("{} entities in a batch of at most {}", entities.len(), self.max_batch_count)));
        }
        let payload : usize = entities.iter().map(RawEntity::payload_size).sum();
        if payload > self.max_batch_payload {
            return Err(RemoteError::batch_too_large(format!("batch payload of {payload} bytes is over {}", self.max_batch_payload)));
        }
        check_batch_keys(entities)
    }
}

/// A batch spans one partition and names each entity once
pub(crate) fn check_batch_keys(entities : &[RawEntity]) -> Result<(), RemoteError> {
    let mut row_keys = HashSet::with_capacity(entities.len());
    if let Some(first) = entities.first() {
        for entity in entities {
            if entity.partition_key != first.partition_key {
                return Err(RemoteError::other(format!("batch spans partitions '{}' and '{}'", first.partition_key, entity.partition_key)));
            }
            if !row_keys.insert(entity.row_key.as_str()) {
                return Err(RemoteError::other(format!("row key '{}' appears twice in a batch", entity.row_key)));
            }
        }
    }
    Ok(())
}

/// Everything a reader or writer needs to talk to the store on behalf of a
/// [TableStorage](crate::TableStorage)
pub(crate) struct Remote<'a, S : ?Sized> {
    pub service : &'a S,
    pub storage_policy : &'a RetryPolicy,
    pub instantiation_policy : &'a RetryPolicy,
    pub counters : &'a PerfCounters,
    pub max_count : usize,
    pub max_payload : usize,
}

impl<S : ?Sized> Clone for Remote<'_, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S : ?Sized> Copy for Remote<'_, S> {}
