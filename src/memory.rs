//!
//! The Memory module contains [MemoryTableService], an in-process [TableService] that behaves the
//! way the remote store does.  It backs the tests, and works as a stand-in store for applications.
//!

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use crate::error::RemoteError;
use crate::filter::TableFilter;
use crate::records::RawEntity;
use crate::service::{check_batch_keys, BatchOperation, Continuation, QueryPage, ServiceLimits, TableService};

#[derive(Debug, Clone)]
struct StoredRow {
    timestamp : DateTime<Utc>,
    content : Vec<u8>,
}

type Rows = BTreeMap<(String, String), StoredRow>;

/// A thread safe, in-memory table store
///
/// Tables, rows and pages behave like the remote store's: reading a missing table fails with
/// `TableNotFound`, queries return at most [page_size](ServiceLimits::page_size) entities with a
/// continuation, batches over the limits fail with `BatchTooLarge`, and a batch that inserts an
/// existing entity or updates or deletes a missing one fails as a whole.
pub struct MemoryTableService {
    tables : RwLock<BTreeMap<String, Rows>>,
    limits : ServiceLimits,
}

impl MemoryTableService {

    pub fn new() -> Self {
        Self::with_limits(ServiceLimits::default())
    }

    pub fn with_limits(limits : ServiceLimits) -> Self {
        Self{ tables : RwLock::new(BTreeMap::new()), limits }
    }

    pub fn limits(&self) -> ServiceLimits {
        self.limits
    }

    /// The number of entities in a table, `None` if the table doesn't exist
    pub fn entity_count(&self, table : &str) -> Option<usize> {
        self.read().get(table).map(BTreeMap::len)
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Rows>> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Rows>> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Checks every entity, then applies all of them
    fn apply(&self, table : &str, operation : BatchOperation, entities : &[RawEntity]) -> Result<(), RemoteError> {
        check_batch_keys(entities)?;
        let mut tables = self.write();
        let rows = tables.get_mut(table).ok_or_else(|| RemoteError::table_not_found(table))?;

        for entity in entities {
            let exists = rows.contains_key(&(entity.partition_key.clone(), entity.row_key.clone()));
            match operation {
                BatchOperation::Insert if exists => return Err(RemoteError::entity_already_exists(&entity.partition_key, &entity.row_key)),
                BatchOperation::Update | BatchOperation::Delete if !exists => return Err(RemoteError::entity_not_found(&entity.partition_key, &entity.row_key)),
                _ => {},
            }
        }

        let timestamp = Utc::now();
        for entity in entities {
            let key = (entity.partition_key.clone(), entity.row_key.clone());
            match operation {
                BatchOperation::Insert | BatchOperation::Update => {
                    rows.insert(key, StoredRow{ timestamp, content : entity.content.clone() });
                },
                BatchOperation::Delete => {
                    rows.remove(&key);
                },
            }
        }
        Ok(())
    }
}

impl Default for MemoryTableService {
    fn default() -> Self {
        Self::new()
    }
}

impl TableService for MemoryTableService {

    fn create_table_if_absent(&self, table : &str) -> Result<bool, RemoteError> {
        let mut tables = self.write();
        if tables.contains_key(table) {
            return Ok(false);
        }
        tables.insert(table.to_string(), Rows::new());
        Ok(true)
    }

    fn delete_table_if_exists(&self, table : &str) -> Result<bool, RemoteError> {
        Ok(self.write().remove(table).is_some())
    }

    fn list_tables(&self) -> Result<Vec<String>, RemoteError> {
        Ok(self.read().keys().cloned().collect())
    }

    fn query(&self, table : &str, filter : Option<&TableFilter>, continuation : Option<&Continuation>) -> Result<QueryPage, RemoteError> {
        let tables = self.read();
        let rows = tables.get(table).ok_or_else(|| RemoteError::table_not_found(table))?;

        let start = match (continuation, filter) {
            (Some(continuation), _) => (continuation.next_partition_key.clone(), continuation.next_row_key.clone()),
            (None, Some(filter)) => (filter.partition_key().to_string(), filter.lower_row_bound().unwrap_or_default().to_string()),
            (None, None) => (String::new(), String::new()),
        };

        let mut matching = rows.range(start..)
            .take_while(|((partition_key, _), _)| filter.map_or(true, |filter| partition_key.as_str() == filter.partition_key()))
            .filter(|((partition_key, row_key), _)| filter.map_or(true, |filter| filter.matches(partition_key, row_key)));

        let page_size = self.limits.page_size.max(1);
        let entities : Vec<RawEntity> = matching.by_ref().take(page_size).map(|((partition_key, row_key), row)| RawEntity{
            partition_key : partition_key.clone(),
            row_key : row_key.clone(),
            timestamp : Some(row.timestamp),
            content : row.content.clone(),
        }).collect();
        let continuation = matching.next().map(|((partition_key, row_key), _)| Continuation{
            next_partition_key : partition_key.clone(),
            next_row_key : row_key.clone(),
        });
        Ok(QueryPage{ entities, continuation })
    }

    fn submit_batch(&self, table : &str, operation : BatchOperation, entities : &[RawEntity]) -> Result<(), RemoteError> {
        self.limits.check_batch(entities)?;
        self.apply(table, operation, entities)
    }

    /// Single requests aren't subject to the batch limits
    fn submit_single(&self, table : &str, operation : BatchOperation, entity : &RawEntity) -> Result<(), RemoteError> {
        self.apply(table, operation, core::slice::from_ref(entity))
    }
}
