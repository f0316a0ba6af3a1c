//!
//! The Database module contains [RocksTableService], a [TableService] that keeps its tables in a
//! local RocksDB database, with the same semantics as the remote store.
//!

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, PoisonError, RwLock};

use chrono::{TimeZone, Utc};
use rocksdb::{ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode, MultiThreaded, Options, WriteBatch};
use serde::{Serialize, Deserialize};

use crate::error::RemoteError;
use crate::filter::TableFilter;
use crate::records::RawEntity;
use crate::service::{BatchOperation, Continuation, QueryPage, ServiceLimits, TableService};

use super::encode_decode::Coder;

/// Each table lives in a column family named with this prefix, so a table can't clash with the
/// default column family
pub const TABLE_CF_PREFIX : &str = "table.";

/// The key, in the default column family, of the crate version that created the database
const VERSION_KEY : &[u8] = b"version";

/// The file naming the live manifest of a RocksDB database
const CURRENT_FILE : &str = "CURRENT";

/// The separator between the partition key and the row key of a row.  Keys never hold control
/// characters, so rows sort by partition key first
const KEY_SEPARATOR : u8 = 0;

#[derive(Serialize, Deserialize)]
struct StoredRow {
    timestamp_millis : i64,
    content : Vec<u8>,
}

fn to_remote(err : rocksdb::Error) -> RemoteError {
    RemoteError::other(err.into_string())
}

fn row_key_bytes(partition_key : &str, row_key : &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(partition_key.len() + row_key.len() + 1);
    key.extend_from_slice(partition_key.as_bytes());
    key.push(KEY_SEPARATOR);
    key.extend_from_slice(row_key.as_bytes());
    key
}

fn split_row_key(key : &[u8]) -> Result<(String, String), RemoteError> {
    let separator = key.iter().position(|byte| *byte == KEY_SEPARATOR).ok_or_else(|| RemoteError::other("row without a key separator"))?;
    let partition_key = String::from_utf8(key[..separator].to_vec()).map_err(|e| RemoteError::other(e.to_string()))?;
    let row_key = String::from_utf8(key[separator + 1..].to_vec()).map_err(|e| RemoteError::other(e.to_string()))?;
    Ok((partition_key, row_key))
}

/// Encapsulates a connection to a database holding any number of tables
///
/// Writes are serialized, so a batch checks and applies all its entities without another batch
/// slipping in between.
pub struct RocksTableService<C : Coder> {
    db : DBWithThreadMode<MultiThreaded>,
    tables : RwLock<BTreeSet<String>>,
    write_lock : Mutex<()>,
    limits : ServiceLimits,
    coder : C,
}

impl<C : Coder> RocksTableService<C> {

    /// Opens the database at the path, creating it if needed
    ///
    /// NOTE: [rocksdb::Error] is a wrapper around a string, so if an error occurs it will be the
    /// unwrapped RocksDB error.
    pub fn open<P : AsRef<Path>>(path : P, limits : ServiceLimits) -> Result<Self, String> {
        let path = path.as_ref();

        let mut db_opts = Options::default();
        db_opts.create_missing_column_families(true);
        db_opts.create_if_missing(true);

        //A database that doesn't exist yet has no column families to list.  RocksDB writes a
        //CURRENT file in every database directory
        let existing = if path.join(CURRENT_FILE).exists() {
            DBWithThreadMode::<MultiThreaded>::list_cf(&db_opts, path)?
        } else {
            vec![]
        };
        let descriptors : Vec<ColumnFamilyDescriptor> = existing.iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();
        let db = DBWithThreadMode::<MultiThreaded>::open_cf_descriptors(&db_opts, path, descriptors)?;

        match db.get(VERSION_KEY)? {
            Some(version) if version.as_slice() != env!("CARGO_PKG_VERSION").as_bytes() => {
                return Err(format!(
                    "database was created with version {} of {}, this is {}",
                    String::from_utf8_lossy(&version),
                    env!("CARGO_CRATE_NAME"),
                    env!("CARGO_PKG_VERSION"),
                ));
            },
            Some(_) => {},
            None => db.put(VERSION_KEY, env!("CARGO_PKG_VERSION").as_bytes())?,
        }

        let tables = existing.iter()
            .filter_map(|name| name.strip_prefix(TABLE_CF_PREFIX))
            .map(str::to_string)
            .collect();

        Ok(Self{
            db,
            tables : RwLock::new(tables),
            write_lock : Mutex::new(()),
            limits,
            coder : C::new(),
        })
    }

    fn cf_name(table : &str) -> String {
        format!("{TABLE_CF_PREFIX}{table}")
    }

    fn encode_row(&self, entity : &RawEntity, timestamp_millis : i64) -> Result<Vec<u8>, RemoteError> {
        let row = StoredRow{ timestamp_millis, content : entity.content.clone() };
        self.coder.encode_to_buf(&row).map_err(RemoteError::other)
    }

    fn decode_row(&self, key : &[u8], value : &[u8]) -> Result<RawEntity, RemoteError> {
        let (partition_key, row_key) = split_row_key(key)?;
        let row : StoredRow = self.coder.decode_from_bytes(value).map_err(RemoteError::other)?;
        Ok(RawEntity{
            partition_key,
            row_key,
            timestamp : Utc.timestamp_millis_opt(row.timestamp_millis).single(),
            content : row.content,
        })
    }

    fn apply(&self, table : &str, operation : BatchOperation, entities : &[RawEntity]) -> Result<(), RemoteError> {
        crate::service::check_batch_keys(entities)?;
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let cf = self.db.cf_handle(&Self::cf_name(table)).ok_or_else(|| RemoteError::table_not_found(table))?;

        let timestamp_millis = Utc::now().timestamp_millis();
        let mut batch = WriteBatch::default();
        for entity in entities {
            let key = row_key_bytes(&entity.partition_key, &entity.row_key);
            let exists = self.db.get_pinned_cf(&cf, &key).map_err(to_remote)?.is_some();
            match operation {
                BatchOperation::Insert if exists => return Err(RemoteError::entity_already_exists(&entity.partition_key, &entity.row_key)),
                BatchOperation::Update | BatchOperation::Delete if !exists => return Err(RemoteError::entity_not_found(&entity.partition_key, &entity.row_key)),
                BatchOperation::Insert | BatchOperation::Update => batch.put_cf(&cf, &key, self.encode_row(entity, timestamp_millis)?),
                BatchOperation::Delete => batch.delete_cf(&cf, &key),
            }
        }
        self.db.write(batch).map_err(to_remote)
    }
}

impl<C : Coder> TableService for RocksTableService<C> {

    fn create_table_if_absent(&self, table : &str) -> Result<bool, RemoteError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.db.cf_handle(&Self::cf_name(table)).is_some() {
            return Ok(false);
        }
        self.db.create_cf(Self::cf_name(table), &Options::default()).map_err(to_remote)?;
        self.tables.write().unwrap_or_else(PoisonError::into_inner).insert(table.to_string());
        Ok(true)
    }

    fn delete_table_if_exists(&self, table : &str) -> Result<bool, RemoteError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.db.cf_handle(&Self::cf_name(table)).is_none() {
            return Ok(false);
        }
        self.db.drop_cf(&Self::cf_name(table)).map_err(to_remote)?;
        self.tables.write().unwrap_or_else(PoisonError::into_inner).remove(table);
        Ok(true)
    }

    fn list_tables(&self) -> Result<Vec<String>, RemoteError> {
        Ok(self.tables.read().unwrap_or_else(PoisonError::into_inner).iter().cloned().collect())
    }

    fn query(&self, table : &str, filter : Option<&TableFilter>, continuation : Option<&Continuation>) -> Result<QueryPage, RemoteError> {
        let cf = self.db.cf_handle(&Self::cf_name(table)).ok_or_else(|| RemoteError::table_not_found(table))?;

        let start = match (continuation, filter) {
            (Some(continuation), _) => Some(row_key_bytes(&continuation.next_partition_key, &continuation.next_row_key)),
            (None, Some(filter)) => Some(row_key_bytes(filter.partition_key(), filter.lower_row_bound().unwrap_or_default())),
            (None, None) => None,
        };
        let mode = match &start {
            Some(start) => IteratorMode::From(start, Direction::Forward),
            None => IteratorMode::Start,
        };

        let page_size = self.limits.page_size.max(1);
        let mut entities = Vec::new();
        for item in self.db.iterator_cf(&cf, mode) {
            let (key, value) = item.map_err(to_remote)?;
            let (partition_key, row_key) = split_row_key(&key)?;
            if let Some(filter) = filter {
                //Rows are ordered by partition, nothing further can match
                if partition_key != filter.partition_key() {
                    break;
                }
                if !filter.matches(&partition_key, &row_key) {
                    continue;
                }
            }
            if entities.len() == page_size {
                let continuation = Continuation{ next_partition_key : partition_key, next_row_key : row_key };
                return Ok(QueryPage{ entities, continuation : Some(continuation) });
            }
            entities.push(self.decode_row(&key, &value)?);
        }
        Ok(QueryPage{ entities, continuation : None })
    }

    fn submit_batch(&self, table : &str, operation : BatchOperation, entities : &[RawEntity]) -> Result<(), RemoteError> {
        self.limits.check_batch(entities)?;
        self.apply(table, operation, entities)
    }

    fn submit_single(&self, table : &str, operation : BatchOperation, entity : &RawEntity) -> Result<(), RemoteError> {
        self.apply(table, operation, core::slice::from_ref(entity))
    }
}

impl<C : Coder> Drop for RocksTableService<C> {
    fn drop(&mut self) {
        //Close down Rocks
        let _ = self.db.flush();
    }
}
