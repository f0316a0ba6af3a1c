//!
//! The Table module contains the main [TableStorage] object
//!

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::Coder;
use crate::error::{OpContext, Operation, Result};
use crate::filter::TableFilter;
use crate::paged_reader::*;
use crate::perf_counters::*;
use crate::records::{validate_key, Entity, RawEntity};
use crate::retry::RetryPolicy;
use crate::service::{BatchOperation, Continuation, Remote, TableService};
use crate::slicing::slice_entities;
use crate::table_config::*;
use crate::writer::*;

/// Typed, batched and retrying access to the tables of a [TableService]
///
/// Writes are grouped by partition, split into batch transactions that fit the limits of the
/// [TableConfig], and recovered according to the kind of error the store reports.  Reads are lazy
/// iterators that follow the store's pages.
///
/// No call is atomic across batches.  When a write fails part way, the batches before the failing
/// one stay written.
///
/// NOTE: Updates are unconditional.  An update replaces whatever the entity holds at that point,
/// including changes made by someone else since it was read.
pub struct TableStorage<S : TableService, ConfigT : TableConfig> {
    service : S,
    coder : ConfigT::CoderT,
    config : ConfigT,
    storage_policy : RetryPolicy,
    instantiation_policy : RetryPolicy,
    perf_counters : PerfCounters,
}

impl<S : TableService, ConfigT : TableConfig> TableStorage<S, ConfigT> {

    /// Creates a new TableStorage on top of the service
    ///
    /// The retry policies are taken from the config once, here.
    pub fn new(service : S, config : ConfigT) -> Self {
        Self{
            service,
            coder : ConfigT::CoderT::new(),
            storage_policy : config.storage_policy(),
            instantiation_policy : config.instantiation_policy(),
            config,
            perf_counters : PerfCounters::new(),
        }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn config(&self) -> &ConfigT {
        &self.config
    }

    fn remote(&self) -> Remote<'_, S> {
        Remote{
            service : &self.service,
            storage_policy : &self.storage_policy,
            instantiation_policy : &self.instantiation_policy,
            counters : &self.perf_counters,
            max_count : ConfigT::MAX_ENTITY_TRANSACTION_COUNT,
            max_payload : ConfigT::MAX_ENTITY_TRANSACTION_PAYLOAD,
        }
    }

    /// Creates a table, returning `false` if it already existed
    pub fn create_table(&self, table : &str) -> Result<bool> {
        create_table(self.remote(), table)
    }

    /// Deletes a table and all its entities, returning `false` if it didn't exist
    pub fn delete_table(&self, table : &str) -> Result<bool> {
        let context = OpContext::new(Operation::DeleteTable, table);
        self.instantiation_policy
            .run(&context, &self.perf_counters, |_| false, || self.service.delete_table_if_exists(table))
            .map_err(|failure| failure.into_error(context.clone()))
    }

    pub fn list_tables(&self) -> Result<Vec<String>> {
        let context = OpContext::new(Operation::ListTables, "");
        self.storage_policy
            .run(&context, &self.perf_counters, |_| false, || self.service.list_tables())
            .map_err(|failure| failure.into_error(context.clone()))
    }

    /// Returns every entity of a table, in key order
    ///
    /// A table that doesn't exist reads as empty.  Each entity is decoded as it's reached, so an
    /// entity that doesn't decode as a `T` only fails its own item.
    pub fn get<'a, T : DeserializeOwned + 'a>(&'a self, table : &str) -> impl Iterator<Item = Result<Entity<T>>> + 'a {
        decode_entities(PagedReader::new(self.remote(), table, None, None), &self.coder)
    }

    /// Returns the entities of one partition, in row key order
    pub fn get_partition<'a, T : DeserializeOwned + 'a>(&'a self, table : &str, partition_key : &str) -> Result<impl Iterator<Item = Result<Entity<T>>> + 'a> {
        let filter = TableFilter::partition(partition_key)?;
        Ok(decode_entities(PagedReader::new(self.remote(), table, Some(filter), None), &self.coder))
    }

    /// Returns the entities of one partition with row keys from `start_row_key` (inclusive) to
    /// `end_row_key` (exclusive).  A `None` or empty bound leaves that side open.
    pub fn get_range<'a, T : DeserializeOwned + 'a>(&'a self, table : &str, partition_key : &str, start_row_key : Option<&str>, end_row_key : Option<&str>) -> Result<impl Iterator<Item = Result<Entity<T>>> + 'a> {
        let filter = TableFilter::range(partition_key, start_row_key, end_row_key)?;
        Ok(decode_entities(PagedReader::new(self.remote(), table, Some(filter), None), &self.coder))
    }

    /// Returns the entities of one partition whose row keys start with `row_key_prefix`
    pub fn get_prefix<'a, T : DeserializeOwned + 'a>(&'a self, table : &str, partition_key : &str, row_key_prefix : &str) -> Result<impl Iterator<Item = Result<Entity<T>>> + 'a> {
        let filter = TableFilter::row_prefix(partition_key, row_key_prefix)?;
        Ok(decode_entities(PagedReader::new(self.remote(), table, Some(filter), None), &self.coder))
    }

    /// Returns the entities of one partition with any of the row keys
    ///
    /// Keys with no entity are skipped.  The keys are queried [MAX_ENTITY_TRANSACTION_COUNT](TableConfig::MAX_ENTITY_TRANSACTION_COUNT)
    /// at a time, and the results of each query come in row key order.
    pub fn get_rows<'a, T, K>(&'a self, table : &str, partition_key : &str, row_keys : impl IntoIterator<Item = K>) -> Result<impl Iterator<Item = Result<Entity<T>>> + 'a>
    where
        T : DeserializeOwned + 'a,
        K : AsRef<str>,
    {
        let row_keys : Vec<String> = row_keys.into_iter().map(|key| key.as_ref().to_string()).collect();
        let reader = RowKeysReader::new(self.remote(), table, partition_key, row_keys)?;
        Ok(decode_entities(reader, &self.coder))
    }

    /// Reads one page of the entities matching `filter`, starting at `continuation`
    ///
    /// Returns the entities with the continuation of the next page, which is `None` after the last
    /// page.  Passing that continuation back in picks the read up where it stopped, so a caller
    /// can bound how much it reads at a time.  A page can be empty and still have a continuation.
    pub fn get_page<T : DeserializeOwned>(&self, table : &str, filter : Option<&TableFilter>, continuation : Option<&Continuation>) -> Result<(Vec<Entity<T>>, Option<Continuation>)> {
        let mut reader = PagedReader::new(self.remote(), table, filter.cloned(), continuation.cloned());
        let raw = reader.next_page().transpose()?.unwrap_or_default();
        let entities = raw.into_iter()
            .map(|entity| Entity::from_raw(entity, &self.coder))
            .collect::<Result<Vec<Entity<T>>>>()?;
        Ok((entities, reader.continuation().cloned()))
    }

    /// Continues a read from a continuation returned by [get_page](TableStorage::get_page), through
    /// to the last matching entity
    pub fn get_resumed<'a, T : DeserializeOwned + 'a>(&'a self, table : &str, filter : Option<TableFilter>, continuation : Continuation) -> impl Iterator<Item = Result<Entity<T>>> + 'a {
        decode_entities(PagedReader::new(self.remote(), table, filter, Some(continuation)), &self.coder)
    }

    /// Inserts new entities
    ///
    /// Fails with an `EntityAlreadyExists` error if an entity is already there, in which case the
    /// batch holding it isn't written.  A missing table is created.
    pub fn insert<T : Serialize>(&self, table : &str, entities : &[Entity<T>]) -> Result<()> {
        self.write(table, BatchOperation::Insert, entities)
    }

    /// Replaces existing entities, unconditionally
    ///
    /// Fails with an `EntityNotFound` error if an entity is missing, in which case the batch
    /// holding it isn't written.
    pub fn update<T : Serialize>(&self, table : &str, entities : &[Entity<T>]) -> Result<()> {
        self.write(table, BatchOperation::Update, entities)
    }

    /// Inserts the entities that are missing and replaces the ones that exist
    ///
    /// The store has no upsert of its own, so each partition's existing row keys are read first.
    /// The inserts of a partition are sent before its updates.  Not atomic: an entity created or
    /// deleted by someone else in between makes the call fail.
    pub fn upsert<T : Serialize>(&self, table : &str, entities : &[Entity<T>]) -> Result<()> {
        let remote = self.remote();
        let mut writer = RetryingBatchWriter::new(remote, table);

        for (partition_key, group) in self.encode_by_partition(entities)? {
            let row_keys : Vec<String> = group.iter().map(|entity| entity.row_key.clone()).collect();
            let existing = RowKeysReader::new(remote, table, &partition_key, row_keys)?
                .map(|entity| entity.map(|entity| entity.row_key))
                .collect::<Result<HashSet<String>>>()?;

            let (to_update, to_insert) : (Vec<RawEntity>, Vec<RawEntity>) = group.into_iter().partition(|entity| existing.contains(&entity.row_key));
            writer.submit(BatchOperation::Insert, slice_entities(to_insert, remote.max_count, remote.max_payload))?;
            writer.submit(BatchOperation::Update, slice_entities(to_update, remote.max_count, remote.max_payload))?;
        }
        Ok(())
    }

    /// Deletes the entities of a partition with the given row keys
    ///
    /// Keys with no entity are skipped, and a missing table leaves nothing to do.
    pub fn delete<K : AsRef<str>>(&self, table : &str, partition_key : &str, row_keys : impl IntoIterator<Item = K>) -> Result<()> {
        validate_key("partition key", partition_key)?;
        let row_keys = row_keys.into_iter().map(|key| {
            validate_key("row key", key.as_ref())?;
            Ok(key.as_ref().to_string())
        }).collect::<Result<Vec<String>>>()?;
        delete_rows(self.remote(), table, partition_key, row_keys)
    }

    fn write<T : Serialize>(&self, table : &str, operation : BatchOperation, entities : &[Entity<T>]) -> Result<()> {
        let remote = self.remote();
        let mut writer = RetryingBatchWriter::new(remote, table);
        for (_, group) in self.encode_by_partition(entities)? {
            writer.submit(operation, slice_entities(group, remote.max_count, remote.max_payload))?;
        }
        Ok(())
    }

    /// Encodes every entity up front, so a bad entity fails the call before anything is sent.  The
    /// partitions come in the order they first appear.
    fn encode_by_partition<T : Serialize>(&self, entities : &[Entity<T>]) -> Result<Vec<(String, Vec<RawEntity>)>> {
        let mut groups : Vec<(String, Vec<RawEntity>)> = vec![];
        let mut index : HashMap<String, usize> = HashMap::new();
        for entity in entities {
            let raw = entity.to_raw(&self.coder)?;
            match index.get(&raw.partition_key) {
                Some(&i) => groups[i].1.push(raw),
                None => {
                    index.insert(raw.partition_key.clone(), groups.len());
                    groups.push((raw.partition_key.clone(), vec![raw]));
                },
            }
        }
        Ok(groups)
    }

    /// Resets all values in the performance counters, so the information returned by [get_perf_counters](TableStorage::get_perf_counters) only
    /// reflects activity since the last call to `reset_perf_counters`
    pub fn reset_perf_counters(&self) {
        self.perf_counters.reset();
    }

    /// Returns the values in the performance counters, which should reflect all activity since the previous call
    /// to [reset_perf_counters](TableStorage::reset_perf_counters)
    pub fn get_perf_counters(&self) -> PerfCounterFields {
        self.perf_counters.get()
    }
}
