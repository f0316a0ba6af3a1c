//!
//! The Writer module contains the write protocol: groups of entities are sent as batch
//! transactions, and the documented recoveries are applied when the store rejects one.  It also
//! holds the delete protocol, which recovers from keys that vanished under it.
//!

use tracing::{debug, info, warn};

use crate::error::{Error, OpContext, Operation, RemoteError, RemoteErrorKind, Result};
use crate::paged_reader::RowKeysReader;
use crate::records::RawEntity;
use crate::retry::Failure;
use crate::service::{BatchOperation, Remote, TableService};

fn operation_of(operation : BatchOperation) -> Operation {
    match operation {
        BatchOperation::Insert => Operation::Insert,
        BatchOperation::Update => Operation::Update,
        BatchOperation::Delete => Operation::Delete,
    }
}

/// Errors that make the writer give up on batches
fn degrades(err : &RemoteError) -> bool {
    matches!(err.kind, RemoteErrorKind::BatchTooLarge | RemoteErrorKind::TimedOut)
}

/// Sends groups of entities to one table, for the length of one public write call
///
/// Once a batch is rejected as too large or times out, everything the writer sends afterwards goes
/// one entity at a time.
pub(crate) struct RetryingBatchWriter<'a, S : TableService + ?Sized> {
    remote : Remote<'a, S>,
    table : &'a str,
    batch_mode : bool,
}

impl<'a, S : TableService + ?Sized> RetryingBatchWriter<'a, S> {

    pub fn new(remote : Remote<'a, S>, table : &'a str) -> Self {
        Self{ remote, table, batch_mode : true }
    }

    /// Submits every group, in order.  Stops at the first group that can't be written
    pub fn submit<I>(&mut self, operation : BatchOperation, groups : I) -> Result<()>
    where I : IntoIterator<Item = Vec<RawEntity>>
    {
        for group in groups {
            self.submit_group(operation, &group)?;
        }
        Ok(())
    }

    fn submit_group(&mut self, operation : BatchOperation, group : &[RawEntity]) -> Result<()> {
        let first = match group.first() {
            Some(first) => first,
            None => return Ok(()),
        };
        if !self.batch_mode {
            return self.submit_singly(operation, group);
        }

        let context = OpContext::new(operation_of(operation), self.table).with_partition(&first.partition_key);
        let mut table_created = false;
        loop {
            let outcome = self.remote.storage_policy.run(&context, self.remote.counters, degrades, || {
                self.remote.counters.update(|c| c.batch_submit_count += 1);
                self.remote.service.submit_batch(self.table, operation, group)
            });
            let failure = match outcome {
                Ok(()) => {
                    debug!(table = self.table, partition = %first.partition_key, entities = group.len(), %operation, "batch written");
                    return Ok(());
                },
                Err(failure) => failure,
            };

            match failure.kind() {
                RemoteErrorKind::TableNotFound if operation == BatchOperation::Insert => {
                    if table_created {
                        return Err(Error::RemoteStructural{ context, source : failure.source });
                    }
                    self.create_table()?;
                    table_created = true;
                },
                _ if degrades(&failure.source) => {
                    warn!(table = self.table, partition = %first.partition_key, entities = group.len(), error = %failure.source, "batch rejected, writing one entity at a time");
                    self.remote.counters.update(|c| c.degrade_count += 1);
                    self.batch_mode = false;
                    return self.submit_singly(operation, group);
                },
                _ => return Err(failure.into_error(context)),
            }
        }
    }

    fn submit_singly(&self, operation : BatchOperation, group : &[RawEntity]) -> Result<()> {
        for entity in group {
            let context = OpContext::new(operation_of(operation), self.table).with_entity(&entity.partition_key, &entity.row_key);
            let mut table_created = false;
            loop {
                let outcome = self.remote.storage_policy.run(&context, self.remote.counters, |_| false, || {
                    self.remote.counters.update(|c| c.single_submit_count += 1);
                    self.remote.service.submit_single(self.table, operation, entity)
                });
                match outcome {
                    Ok(()) => break,
                    Err(failure) if failure.kind() == RemoteErrorKind::TableNotFound && operation == BatchOperation::Insert => {
                        if table_created {
                            return Err(Error::RemoteStructural{ context, source : failure.source });
                        }
                        self.create_table()?;
                        table_created = true;
                    },
                    Err(failure) => return Err(failure.into_error(context)),
                }
            }
        }
        Ok(())
    }

    fn create_table(&self) -> Result<()> {
        create_table(self.remote, self.table)?;
        self.remote.counters.update(|c| c.table_create_count += 1);
        Ok(())
    }
}

/// Creates a table under the instantiation policy
pub(crate) fn create_table<S : TableService + ?Sized>(remote : Remote<'_, S>, table : &str) -> Result<bool> {
    let context = OpContext::new(Operation::CreateTable, table);
    let created = remote.instantiation_policy
        .run(&context, remote.counters, |_| false, || remote.service.create_table_if_absent(table))
        .map_err(|failure| failure.into_error(context.clone()))?;
    if created {
        info!(table, "created table");
    }
    Ok(created)
}

/// Deletes the entities of one partition with the given row keys
///
/// Keys are de-duplicated and deleted in batches.  A batch that fails because some of its
/// entities are already gone is sent again with only the keys that still exist.  A missing table
/// means there is nothing to delete.
pub(crate) fn delete_rows<S : TableService + ?Sized>(remote : Remote<'_, S>, table : &str, partition_key : &str, row_keys : Vec<String>) -> Result<()> {
    let mut seen = std::collections::HashSet::with_capacity(row_keys.len());
    let row_keys : Vec<String> = row_keys.into_iter().filter(|key| seen.insert(key.clone())).collect();

    for slice in row_keys.chunks(remote.max_count.max(1)) {
        let mut pending : Vec<String> = slice.to_vec();
        let mut stalled_rounds = 0;

        while !pending.is_empty() {
            let context = OpContext::new(Operation::Delete, table).with_partition(partition_key);
            let keys : Vec<RawEntity> = pending.iter().map(|row_key| RawEntity::key_only(partition_key, row_key)).collect();
            let outcome = remote.storage_policy.run(&context, remote.counters, |_| false, || {
                remote.counters.update(|c| c.batch_submit_count += 1);
                remote.service.submit_batch(table, BatchOperation::Delete, &keys)
            });

            match outcome {
                Ok(()) => break,
                Err(failure) if failure.kind() == RemoteErrorKind::TableNotFound => {
                    debug!(table, partition = partition_key, "table does not exist, nothing to delete");
                    return Ok(());
                },
                Err(failure) if failure.kind() == RemoteErrorKind::EntityNotFound => {
                    warn!(table, partition = partition_key, keys = pending.len(), "entities already gone, checking which remain");
                    remote.counters.update(|c| c.delete_requery_count += 1);

                    let remaining = RowKeysReader::new(remote, table, partition_key, pending.clone())?
                        .map(|entity| entity.map(|entity| entity.row_key))
                        .collect::<Result<Vec<String>>>()?;
                    if remaining.len() < pending.len() {
                        stalled_rounds = 0;
                    } else {
                        stalled_rounds += 1;
                        if stalled_rounds >= remote.storage_policy.max_attempts.max(1) {
                            return Err(stalled(context, failure));
                        }
                    }
                    //Keep the requested order
                    pending.retain(|key| remaining.contains(key));
                },
                Err(failure) => return Err(failure.into_error(context)),
            }
        }
    }
    Ok(())
}

/// The store keeps reporting missing entities that it also lists as present
fn stalled(context : OpContext, failure : Failure) -> Error {
    Error::RemoteStructural{ context, source : failure.source }
}
