
//! # resilient_tables Overview
//!
//! Dependable entity I/O on top of a partition/row keyed table store that only offers bounded batch
//! transactions, paged queries and no upsert.  This crate provides:
//!
//! - Batched writes that fit the store's count and payload limits, grouped by partition
//! - Recovery from the store's errors: missing tables are created, rejected batches fall back to
//! one entity at a time, and transient failures are retried with backoff
//! - Lazy, paged reads that follow the store's continuations
//! - Delete and upsert built from the store's primitive operations
//! - A codec that turns typed key records into ordered `/`-delimited keys and back, usable for
//! partition keys, row keys and hierarchical blob names
//!
//! ## Entities & Keys
//!
//! An [Entity] has a partition key, a row key and a value.  Values are encoded with the [Coder] of the
//! [TableConfig], and the keys are plain strings.  Structured keys are written as [KeyRecord]s, which
//! list their key fields once, and are encoded with [KeyRecord::to_key] or [Entity::keyed].
//!
//! ## Usage Example
//!
//! ```
//! use resilient_tables::{*};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, PartialEq, Serialize, Deserialize)]
//! struct Temperature {
//!     celsius : f32,
//! }
//!
//! let storage = TableStorage::new(MemoryTableService::new(), DefaultTableConfig());
//!
//! //A missing table is created by the first insert
//! storage.insert("readings", &[
//!     Entity::new("station-1", "2021-06-01", Temperature{ celsius : 21.5 }),
//!     Entity::new("station-1", "2021-06-02", Temperature{ celsius : 23.0 }),
//!     Entity::new("station-2", "2021-06-01", Temperature{ celsius : 18.0 }),
//! ]).unwrap();
//!
//! //Read one partition back, in row key order
//! let station_1 : Vec<Entity<Temperature>> = storage.get_partition("readings", "station-1")
//!     .unwrap().map(|entity| entity.unwrap()).collect();
//! assert_eq!(station_1.len(), 2);
//! assert_eq!(station_1[1].value, Temperature{ celsius : 23.0 });
//!
//! //Upsert replaces the entities that exist and inserts the others
//! storage.upsert("readings", &[
//!     Entity::new("station-1", "2021-06-02", Temperature{ celsius : 24.0 }),
//!     Entity::new("station-1", "2021-06-03", Temperature{ celsius : 19.5 }),
//! ]).unwrap();
//!
//! //Deleting keys that don't exist is fine
//! storage.delete("readings", "station-1", ["2021-06-01", "1999-01-01"]).unwrap();
//! assert_eq!(storage.get::<Temperature>("readings").count(), 3);
//! ```
//!
//! Additional usage examples can be found in the tests, located at the bottom of the src/lib.rs file.
//!
//! ## Table Configuration
//!
//! A [TableConfig] object is passed as an argument to [TableStorage::new].  The TableConfig specifies:
//!
//! - The [Coder] used for entity values
//! - The limits of one batch transaction, by entity count and by payload
//! - The [RetryPolicy] for queries and writes, and the one for creating and deleting tables
//!
//! [DefaultTableConfig] is a zero-sized type that implements the limits of the remote store and the
//! default policies.
//!
//! ## Backends
//!
//! [TableStorage] talks to the store through the [TableService] trait.  Two implementations are
//! included: [MemoryTableService], an in-process store, and `RocksTableService` (with the `rocks`
//! feature, on by default), which keeps its tables in a local [RocksDB](https://rocksdb.org) database.
//!
//! ## Failure Behavior
//!
//! | Error from the store | What happens |
//! |---|---|
//! | Table not found, on insert | The table is created and the batch is sent again |
//! | Table not found, on read or delete | The read is empty, the delete does nothing |
//! | Batch too large, or timed out | The rest of the write goes one entity at a time |
//! | Entity not found, on delete | The keys that still exist are deleted |
//! | Throttled, server busy, timed out | Retried under the [RetryPolicy] |
//! | Anything else | Returned as [Error::RemoteUnrecoverable] |
//!
//! Retries that run out are returned as [Error::RemoteTransient], and a recovery that fails in turn as
//! [Error::RemoteStructural].
//!
//! ## Tuning for Performance
//!
//! Enable the `perf_counters` feature to count the requests sent to the store, see
//! [PerfCounterFields].  A `degrade_count` above zero means batches are larger than the store accepts.
//! The benchmarks under `benches/` run with `cargo bench`.
//!

mod error;
pub use error::{Error, Result, RemoteError, RemoteErrorKind, OpContext, Operation};
mod encode_decode;
pub use encode_decode::Coder;
#[cfg(feature = "bitcode")]
pub use encode_decode::bitcode_interface::BitcodeCoder;
#[cfg(feature = "bincode")]
pub use encode_decode::bincode_interface::BincodeCoder;
#[cfg(feature = "msgpack")]
pub use encode_decode::msgpack_interface::MsgPackCoder;
mod key;
pub use key::{KeyValue, KEY_DELIMITER, DATE_TIME_FORMAT};
mod key_schema;
pub use key_schema::{KeyRecord, KeySchema, SchemaBuilder, Rank, encode_key, decode_key};
mod blob_name;
pub use blob_name::{BlobName, BlobLocation, blob_location, listing_prefix, parse_blob_name};
mod records;
pub use records::{RawEntity, Entity, validate_key, MAX_ENTITY_CONTENT, ENTITY_OVERHEAD};
mod table_config;
pub use table_config::{TableConfig, DefaultTableConfig, MAX_ENTITY_TRANSACTION_COUNT, MAX_ENTITY_TRANSACTION_PAYLOAD};
mod retry;
pub use retry::{RetryPolicy, Backoff};
mod slicing;
pub use slicing::{Slices, slice_by, slice_entities};
mod filter;
pub use filter::TableFilter;
mod service;
pub use service::{TableService, BatchOperation, Continuation, QueryPage, ServiceLimits};
mod paged_reader;
pub use paged_reader::{PagedReader, RowKeysReader};
mod writer;
mod perf_counters;
pub use perf_counters::PerfCounterFields;
mod table;
pub use table::TableStorage;
mod memory;
pub use memory::MemoryTableService;
#[cfg(feature = "rocks")]
mod database;
#[cfg(feature = "rocks")]
pub use database::RocksTableService;

/// The key codec under its own name: `key_codec::print` and `key_codec::parse`
pub mod key_codec {
    pub use crate::key_schema::{encode_key as print, decode_key as parse};
}

/// The [Coder] used by [DefaultTableConfig]
#[cfg(feature = "bitcode")]
pub type DefaultCoder = BitcodeCoder;
#[cfg(all(not(feature = "bitcode"), feature = "bincode"))]
pub type DefaultCoder = BincodeCoder;
#[cfg(all(not(feature = "bitcode"), not(feature = "bincode"), feature = "msgpack"))]
pub type DefaultCoder = MsgPackCoder;

#[cfg(not(any(feature = "bitcode", feature = "bincode", feature = "msgpack")))]
compile_error!("at least one of the \"bitcode\", \"bincode\" or \"msgpack\" features must be enabled");

#[cfg(test)]
mod test_service;

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveDateTime};
    use serde::{Serialize, Deserialize};
    use uuid::Uuid;

    use crate::{*};
    use crate::test_service::{Call, CallKind, ScriptedService};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Order {
        item : String,
        quantity : u32,
    }

    #[derive(Default, Debug, Clone, PartialEq)]
    struct Customer {
        id : Uuid,
    }
    impl KeyRecord for Customer {
        fn describe(s : &mut SchemaBuilder<Self>) {
            s.field(0, |r| &r.id, |r| &mut r.id);
        }
    }

    #[derive(Default, Debug, Clone, PartialEq)]
    struct Placed {
        at : NaiveDateTime,
        number : u32,
    }
    impl KeyRecord for Placed {
        fn describe(s : &mut SchemaBuilder<Self>) {
            s.field(Rank::new(0).treat_default_as_null(), |r| &r.at, |r| &mut r.at);
            s.field(1, |r| &r.number, |r| &mut r.number);
        }
    }

    /// Retries without waiting, so the tests don't sleep
    struct Config();
    impl TableConfig for Config {
        type CoderT = DefaultCoder;
        fn storage_policy(&self) -> RetryPolicy {
            RetryPolicy::immediate(3)
        }
        fn instantiation_policy(&self) -> RetryPolicy {
            RetryPolicy::immediate(3)
        }
    }

    struct SmallBatchConfig();
    impl TableConfig for SmallBatchConfig {
        type CoderT = DefaultCoder;
        const MAX_ENTITY_TRANSACTION_COUNT : usize = 2;
        fn storage_policy(&self) -> RetryPolicy {
            RetryPolicy::immediate(3)
        }
    }

    fn order(partition_key : &str, row_key : &str, quantity : u32) -> Entity<Order> {
        Entity::new(partition_key, row_key, Order{ item : format!("item-{row_key}"), quantity })
    }

    fn scripted(limits : ServiceLimits) -> TableStorage<ScriptedService, Config> {
        TableStorage::new(ScriptedService::new(limits), Config())
    }

    fn row_keys<I : Iterator<Item = Result<Entity<Order>>>>(entities : I) -> Vec<String> {
        entities.map(|entity| entity.unwrap().row_key).collect()
    }

    #[test]
    /// Typed entities with structured keys, through every read shape
    fn keyed_entities_test() {
        let storage = scripted(ServiceLimits::default());
        let customer = Customer{ id : Uuid::from_u128(0xc0ffee) };
        let day = NaiveDate::from_ymd_opt(2021, 3, 14).unwrap();

        let entities : Vec<Entity<Order>> = (1..=4).map(|n| {
            let placed = Placed{ at : day.and_hms_opt(9, n, 0).unwrap(), number : n };
            Entity::keyed(&customer, &placed, Order{ item : format!("widget-{n}"), quantity : n * 10 }).unwrap()
        }).collect();
        storage.insert("orders", &entities).unwrap();

        let partition_key = customer.to_key().unwrap();
        let read : Vec<Entity<Order>> = storage.get_partition("orders", &partition_key).unwrap().map(|e| e.unwrap()).collect();
        assert_eq!(read.len(), 4);
        for (read, written) in read.iter().zip(entities.iter()) {
            assert_eq!(read.value, written.value);
            assert!(read.timestamp.is_some());
            assert_eq!(read.partition_as::<Customer>().unwrap(), customer);
        }
        assert_eq!(read[2].row_as::<Placed>().unwrap(), Placed{ at : day.and_hms_opt(9, 3, 0).unwrap(), number : 3 });

        //Range, start inclusive and end exclusive
        let start = entities[1].row_key.as_str();
        let end = entities[3].row_key.as_str();
        let range = row_keys(storage.get_range("orders", &partition_key, Some(start), Some(end)).unwrap());
        assert_eq!(range, vec![entities[1].row_key.clone(), entities[2].row_key.clone()]);

        //Prefix made of the leading key fields
        let prefix = format!("{}{KEY_DELIMITER}", day.and_hms_opt(9, 2, 0).unwrap().format(DATE_TIME_FORMAT));
        assert_eq!(row_keys(storage.get_prefix("orders", &partition_key, &prefix).unwrap()), vec![entities[1].row_key.clone()]);

        //Explicit row keys, missing ones are skipped
        let wanted = [entities[3].row_key.as_str(), "no-such-row", entities[0].row_key.as_str()];
        let rows = row_keys(storage.get_rows("orders", &partition_key, wanted).unwrap());
        assert_eq!(rows, vec![entities[0].row_key.clone(), entities[3].row_key.clone()]);

        //The whole table
        storage.insert("orders", &[order("another", "r", 1)]).unwrap();
        assert_eq!(storage.get::<Order>("orders").count(), 5);
    }

    #[test]
    /// Three pages are three queries, and each one is sent only when the previous page is used up
    fn paging_test() {
        let storage = scripted(ServiceLimits{ page_size : 2, ..ServiceLimits::default() });
        let entities : Vec<Entity<Order>> = (0..6).map(|i| order("p", &format!("r{i}"), i)).collect();
        storage.insert("t", &entities).unwrap();
        storage.service().clear_calls();

        let mut reader = storage.get_partition::<Order>("t", "p").unwrap();
        assert_eq!(storage.service().count(CallKind::Query), 0);
        reader.next().unwrap().unwrap();
        reader.next().unwrap().unwrap();
        assert_eq!(storage.service().count(CallKind::Query), 1);
        assert_eq!(reader.count(), 4);
        assert_eq!(storage.service().count(CallKind::Query), 3);
    }

    #[test]
    /// A read stopped after some pages picks up from its continuation
    fn resume_from_continuation_test() {
        let storage = scripted(ServiceLimits{ page_size : 2, ..ServiceLimits::default() });
        let entities : Vec<Entity<Order>> = (0..5).map(|i| order("p", &format!("r{i}"), i)).collect();
        storage.insert("t", &entities).unwrap();
        storage.insert("t", &[order("q", "r0", 0)]).unwrap();
        storage.service().clear_calls();
        let filter = TableFilter::partition("p").unwrap();

        let (first, cursor) = storage.get_page::<Order>("t", Some(&filter), None).unwrap();
        assert_eq!(first.iter().map(|e| e.row_key.as_str()).collect::<Vec<_>>(), vec!["r0", "r1"]);
        let (second, cursor) = storage.get_page::<Order>("t", Some(&filter), cursor.as_ref()).unwrap();
        assert_eq!(second.iter().map(|e| e.row_key.as_str()).collect::<Vec<_>>(), vec!["r2", "r3"]);
        let cursor = cursor.unwrap();
        assert_eq!(cursor, Continuation{ next_partition_key : "p".to_string(), next_row_key : "r4".to_string() });
        assert_eq!(storage.service().count(CallKind::Query), 2);

        //Later, from the cursor of the second page
        let rest = row_keys(storage.get_resumed("t", Some(filter.clone()), cursor.clone()));
        assert_eq!(rest, vec!["r4".to_string()]);
        let (last, done) = storage.get_page::<Order>("t", Some(&filter), Some(&cursor)).unwrap();
        assert_eq!(last.len(), 1);
        assert!(done.is_none());
        assert_eq!(storage.service().count(CallKind::Query), 4);
        assert_eq!(storage.service().calls()[3], Call::Query(Some(filter)));

        //A missing table is one empty last page
        let (nothing, done) = storage.get_page::<Order>("nowhere", None, None).unwrap();
        assert!(nothing.is_empty() && done.is_none());
    }

    #[test]
    fn missing_table_test() {
        let storage = scripted(ServiceLimits::default());

        assert_eq!(storage.get::<Order>("nowhere").count(), 0);
        assert_eq!(storage.get_partition::<Order>("nowhere", "p").unwrap().count(), 0);
        storage.delete("nowhere", "p", ["a", "b"]).unwrap();
        assert_eq!(storage.service().count(CallKind::CreateTable), 0);

        //Only inserts create tables
        let err = storage.update("nowhere", &[order("p", "a", 1)]).unwrap_err();
        assert!(matches!(err, Error::RemoteUnrecoverable{ .. }));
        assert_eq!(err.remote_kind(), Some(RemoteErrorKind::TableNotFound));
    }

    #[test]
    fn insert_creates_missing_table_test() {
        let storage = scripted(ServiceLimits::default());
        storage.insert("new", &[order("p", "a", 1), order("p", "b", 2)]).unwrap();
        assert_eq!(storage.service().calls(), vec![
            Call::Batch(BatchOperation::Insert, 2),
            Call::CreateTable,
            Call::Batch(BatchOperation::Insert, 2),
        ]);
        assert_eq!(storage.service().inner.entity_count("new"), Some(2));

        //A table that stays missing after it was created
        let storage = scripted(ServiceLimits::default());
        storage.service().fail_next(CallKind::Batch, RemoteError::table_not_found("new"));
        storage.service().fail_next(CallKind::Batch, RemoteError::table_not_found("new"));
        let err = storage.insert("new", &[order("p", "a", 1)]).unwrap_err();
        assert!(matches!(err, Error::RemoteStructural{ .. }));
    }

    #[test]
    /// After one batch is rejected as too large, nothing else is sent as a batch
    fn batch_too_large_test() {
        let storage = scripted(ServiceLimits{ max_batch_count : 2, ..ServiceLimits::default() });
        storage.create_table("t").unwrap();
        storage.service().clear_calls();

        let mut entities : Vec<Entity<Order>> = (0..5).map(|i| order("p1", &format!("r{i}"), i)).collect();
        entities.extend((0..3).map(|i| order("p2", &format!("r{i}"), i)));
        storage.insert("t", &entities).unwrap();

        assert_eq!(storage.service().count(CallKind::Batch), 1);
        assert_eq!(storage.service().count(CallKind::Single), 8);
        assert_eq!(storage.service().inner.entity_count("t"), Some(8));

        //The next call starts out with batches again
        storage.service().clear_calls();
        storage.update("t", &entities[..2]).unwrap();
        assert_eq!(storage.service().calls(), vec![Call::Batch(BatchOperation::Update, 2)]);
    }

    #[test]
    /// A batch that times out is split, a single request that times out is retried
    fn timeout_test() {
        let storage = scripted(ServiceLimits::default());
        storage.create_table("t").unwrap();
        storage.service().clear_calls();

        storage.service().fail_next(CallKind::Batch, RemoteError::new(RemoteErrorKind::TimedOut, "batch timed out"));
        storage.service().fail_next(CallKind::Single, RemoteError::new(RemoteErrorKind::TimedOut, "single timed out"));
        storage.insert("t", &[order("p", "a", 1), order("p", "b", 2), order("p", "c", 3)]).unwrap();

        assert_eq!(storage.service().count(CallKind::Batch), 1);
        assert_eq!(storage.service().count(CallKind::Single), 4);
        assert_eq!(storage.service().inner.entity_count("t"), Some(3));
    }

    #[test]
    fn throttling_test() {
        let storage = scripted(ServiceLimits::default());
        storage.create_table("t").unwrap();
        storage.service().clear_calls();

        storage.service().fail_next(CallKind::Batch, RemoteError::throttled("slow down"));
        storage.service().fail_next(CallKind::Batch, RemoteError::throttled("slow down"));
        storage.insert("t", &[order("p", "a", 1)]).unwrap();
        assert_eq!(storage.service().count(CallKind::Batch), 3);

        for _ in 0..3 {
            storage.service().fail_next(CallKind::Batch, RemoteError::throttled("slow down"));
        }
        let err = storage.insert("t", &[order("p", "b", 1)]).unwrap_err();
        assert!(matches!(err, Error::RemoteTransient{ attempts : 3, .. }));
        assert_eq!(storage.service().inner.entity_count("t"), Some(1));
    }

    #[test]
    fn unrecoverable_errors_test() {
        let storage = scripted(ServiceLimits::default());
        storage.create_table("t").unwrap();

        let boom = RemoteError::other("bad request");
        storage.service().fail_next(CallKind::Batch, boom.clone());
        match storage.insert("t", &[order("p", "a", 1)]) {
            Err(Error::RemoteUnrecoverable{ context, source }) => {
                assert_eq!(source, boom);
                assert_eq!(context.operation, Operation::Insert);
                assert_eq!(context.table, "t");
                assert_eq!(context.key.as_deref(), Some("p"));
            },
            other => panic!("unexpected result {other:?}"),
        }

        storage.insert("t", &[order("p", "a", 1)]).unwrap();
        let err = storage.insert("t", &[order("p", "a", 2)]).unwrap_err();
        assert_eq!(err.remote_kind(), Some(RemoteErrorKind::EntityAlreadyExists));
        let err = storage.update("t", &[order("p", "zz", 2)]).unwrap_err();
        assert_eq!(err.remote_kind(), Some(RemoteErrorKind::EntityNotFound));
    }

    #[test]
    /// Batches hold at most the configured count, one partition each, partitions in order of appearance
    fn batch_slicing_test() {
        let storage = TableStorage::new(ScriptedService::new(ServiceLimits::default()), SmallBatchConfig());
        storage.create_table("t").unwrap();
        storage.service().clear_calls();

        let entities = vec![
            order("b", "1", 1), order("a", "1", 1), order("b", "2", 1),
            order("b", "3", 1), order("a", "2", 1), order("b", "4", 1), order("b", "5", 1),
        ];
        storage.insert("t", &entities).unwrap();
        assert_eq!(storage.service().calls(), vec![
            Call::Batch(BatchOperation::Insert, 2),
            Call::Batch(BatchOperation::Insert, 2),
            Call::Batch(BatchOperation::Insert, 1),
            Call::Batch(BatchOperation::Insert, 2),
        ]);
    }

    #[test]
    /// A delete that finds some of its entities gone deletes the rest
    fn delete_recovery_test() {
        let storage = scripted(ServiceLimits::default());
        storage.insert("t", &[order("p", "e1", 1), order("p", "e3", 3), order("q", "e2", 2)]).unwrap();
        storage.service().clear_calls();

        storage.delete("t", "p", ["e1", "e2", "e3", "e1"]).unwrap();
        assert_eq!(storage.service().calls(), vec![
            Call::Batch(BatchOperation::Delete, 3),
            Call::Query(Some(TableFilter::row_keys("p", ["e1", "e2", "e3"]).unwrap())),
            Call::Batch(BatchOperation::Delete, 2),
        ]);
        assert_eq!(storage.get_partition::<Order>("t", "p").unwrap().count(), 0);
        assert_eq!(storage.get_partition::<Order>("t", "q").unwrap().count(), 1);

        //Nothing left at all
        storage.service().clear_calls();
        storage.delete("t", "p", ["e1"]).unwrap();
        assert_eq!(storage.service().count(CallKind::Batch), 1);
        assert_eq!(storage.service().count(CallKind::Query), 1);
    }

    #[test]
    /// A store that keeps reporting missing entities it also lists as present doesn't hold up a
    /// delete forever
    fn delete_stall_test() {
        let storage = scripted(ServiceLimits::default());
        storage.insert("t", &[order("p", "e1", 1), order("p", "e2", 2)]).unwrap();
        storage.service().clear_calls();

        let attempts = storage.config().storage_policy().max_attempts;
        for _ in 0..attempts {
            storage.service().fail_next(CallKind::Batch, RemoteError::entity_not_found("p", "e1"));
        }
        let err = storage.delete("t", "p", ["e1", "e2"]).unwrap_err();
        assert!(matches!(err, Error::RemoteStructural{ .. }));
        assert_eq!(err.remote_kind(), Some(RemoteErrorKind::EntityNotFound));
        assert_eq!(storage.service().count(CallKind::Batch), attempts as usize);
        assert_eq!(storage.service().count(CallKind::Query), attempts as usize);
        assert_eq!(storage.service().inner.entity_count("t"), Some(2));

        //Fewer stalled rounds than the policy allows still end in a delete
        storage.service().clear_calls();
        storage.service().fail_next(CallKind::Batch, RemoteError::entity_not_found("p", "e1"));
        storage.service().fail_next(CallKind::Batch, RemoteError::entity_not_found("p", "e1"));
        storage.delete("t", "p", ["e1", "e2"]).unwrap();
        assert_eq!(storage.service().count(CallKind::Batch), 3);
        assert_eq!(storage.service().inner.entity_count("t"), Some(0));
    }

    #[test]
    fn delete_slices_test() {
        let storage = TableStorage::new(ScriptedService::new(ServiceLimits::default()), SmallBatchConfig());
        let entities : Vec<Entity<Order>> = (0..5).map(|i| order("p", &format!("r{i}"), i)).collect();
        storage.insert("t", &entities).unwrap();
        storage.service().clear_calls();

        storage.delete("t", "p", entities.iter().map(|e| e.row_key.as_str())).unwrap();
        assert_eq!(storage.service().calls(), vec![
            Call::Batch(BatchOperation::Delete, 2),
            Call::Batch(BatchOperation::Delete, 2),
            Call::Batch(BatchOperation::Delete, 1),
        ]);
    }

    #[test]
    fn upsert_test() {
        let storage = scripted(ServiceLimits::default());
        storage.insert("t", &[order("p", "old", 1)]).unwrap();
        storage.service().clear_calls();

        storage.upsert("t", &[order("p", "old", 100), order("p", "new", 2)]).unwrap();
        assert_eq!(storage.service().calls(), vec![
            Call::Query(Some(TableFilter::row_keys("p", ["old", "new"]).unwrap())),
            Call::Batch(BatchOperation::Insert, 1),
            Call::Batch(BatchOperation::Update, 1),
        ]);

        let values : Vec<(String, u32)> = storage.get_partition::<Order>("t", "p").unwrap()
            .map(|e| e.unwrap())
            .map(|e| (e.row_key, e.value.quantity))
            .collect();
        assert_eq!(values, vec![("new".to_string(), 2), ("old".to_string(), 100)]);

        //Upsert into a missing table inserts everything
        storage.upsert("fresh", &[order("p", "a", 1)]).unwrap();
        assert_eq!(storage.service().inner.entity_count("fresh"), Some(1));
    }

    #[test]
    /// Bad entities fail the call before anything is sent
    fn invalid_entities_test() {
        let storage = scripted(ServiceLimits::default());
        let err = storage.insert("t", &[order("p", "fine", 1), order("p", "it's", 2)]).unwrap_err();
        assert!(matches!(err, Error::InvalidKey{ .. }));
        assert!(storage.delete("t", "p", ["a'b"]).is_err());
        assert!(storage.get_rows::<Order, _>("t", "p", ["a'b"]).is_err());

        let huge = Entity::new("p", "huge", vec![0u8; MAX_ENTITY_CONTENT + 1]);
        assert!(matches!(storage.insert("t", &[huge]), Err(Error::EntityTooLarge{ .. })));

        assert!(storage.service().calls().is_empty());
    }

    #[test]
    fn table_management_test() {
        let storage = scripted(ServiceLimits::default());
        assert!(storage.create_table("a").unwrap());
        assert!(!storage.create_table("a").unwrap());
        assert!(storage.create_table("b").unwrap());
        assert_eq!(storage.list_tables().unwrap(), vec!["a".to_string(), "b".to_string()]);
        assert!(storage.delete_table("a").unwrap());
        assert!(!storage.delete_table("a").unwrap());
        assert_eq!(storage.list_tables().unwrap(), vec!["b".to_string()]);

        //Table creation rides out a busy server
        storage.service().fail_next(CallKind::CreateTable, RemoteError::new(RemoteErrorKind::ServerBusy, "busy"));
        assert!(storage.create_table("c").unwrap());
    }

    #[test]
    fn entities_that_dont_decode_test() {
        let storage = scripted(ServiceLimits::default());
        storage.insert("t", &[Entity::new("p", "a", ())]).unwrap();
        let mut reader = storage.get_partition::<Order>("t", "p").unwrap();
        assert!(matches!(reader.next(), Some(Err(Error::Format(_)))));
    }

    #[cfg(feature = "rocks")]
    #[test]
    /// The whole stack on top of the RocksDB backend
    fn rocks_storage_test() {
        let dir = tempfile::tempdir().unwrap();
        let limits = ServiceLimits{ page_size : 3, max_batch_count : 4, ..ServiceLimits::default() };
        let storage = TableStorage::new(RocksTableService::<DefaultCoder>::open(dir.path(), limits).unwrap(), DefaultTableConfig());

        let entities : Vec<Entity<Order>> = (0..10).map(|i| order("p", &format!("r{i:02}"), i)).collect();
        storage.insert("orders", &entities).unwrap();
        storage.upsert("orders", &[order("p", "r00", 99), order("p", "r10", 10)]).unwrap();
        storage.delete("orders", "p", ["r01", "r02", "missing"]).unwrap();

        let read : Vec<Entity<Order>> = storage.get_partition("orders", "p").unwrap().map(|e| e.unwrap()).collect();
        assert_eq!(read.len(), 9);
        assert_eq!(read[0].value.quantity, 99);
        assert_eq!(read.last().unwrap().row_key, "r10");
        assert_eq!(storage.list_tables().unwrap(), vec!["orders".to_string()]);
    }

    #[test]
    /// This tests the perf-counters
    fn perf_counters_test() {
        let storage = scripted(ServiceLimits{ page_size : 2, max_batch_count : 2, ..ServiceLimits::default() });
        let entities : Vec<Entity<Order>> = (0..5).map(|i| order("p", &format!("r{i}"), i)).collect();
        storage.create_table("t").unwrap();

        storage.reset_perf_counters();
        storage.service().fail_next(CallKind::Single, RemoteError::throttled("slow down"));
        storage.insert("t", &entities).unwrap();
        let _ = storage.get::<Order>("t").count();

        #[cfg(feature = "perf_counters")]
        {
            let counters = storage.get_perf_counters();
            assert_eq!(counters.batch_submit_count, 1);
            assert_eq!(counters.degrade_count, 1);
            assert_eq!(counters.single_submit_count, 6);
            assert_eq!(counters.retry_count, 1);
            assert_eq!(counters.query_count, 3);
            assert_eq!(counters.table_create_count, 0);

            storage.reset_perf_counters();
            assert_eq!(storage.get_perf_counters(), PerfCounterFields::new());
        }

        #[cfg(not(feature = "perf_counters"))]
        {
            println!("perf_counters feature not enabled");
            assert_eq!(storage.get_perf_counters(), PerfCounterFields::new());
        }
    }
}
