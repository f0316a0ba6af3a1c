//!
//! A [TableService] for the protocol tests: it records every call and fails the calls it was told
//! to fail, passing everything else to a [MemoryTableService].
//!

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::error::RemoteError;
use crate::filter::TableFilter;
use crate::memory::MemoryTableService;
use crate::records::RawEntity;
use crate::service::{BatchOperation, Continuation, QueryPage, ServiceLimits, TableService};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateTable,
    DeleteTable,
    ListTables,
    Query(Option<TableFilter>),
    Batch(BatchOperation, usize),
    Single(BatchOperation),
}

impl Call {
    fn kind(&self) -> CallKind {
        match self {
            Call::CreateTable => CallKind::CreateTable,
            Call::DeleteTable => CallKind::DeleteTable,
            Call::ListTables => CallKind::ListTables,
            Call::Query(_) => CallKind::Query,
            Call::Batch(..) => CallKind::Batch,
            Call::Single(_) => CallKind::Single,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    CreateTable,
    DeleteTable,
    ListTables,
    Query,
    Batch,
    Single,
}

pub struct ScriptedService {
    pub inner : MemoryTableService,
    calls : Mutex<Vec<Call>>,
    faults : Mutex<VecDeque<(CallKind, RemoteError)>>,
}

impl ScriptedService {
    pub fn new(limits : ServiceLimits) -> Self {
        Self{ inner : MemoryTableService::with_limits(limits), calls : Mutex::new(vec![]), faults : Mutex::new(VecDeque::new()) }
    }

    /// The next call of `kind` fails with `err`.  Faults are used in the order they were added
    pub fn fail_next(&self, kind : CallKind, err : RemoteError) {
        self.faults.lock().unwrap().push_back((kind, err));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, kind : CallKind) -> usize {
        self.calls.lock().unwrap().iter().filter(|call| call.kind() == kind).count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, call : Call) -> Result<(), RemoteError> {
        let kind = call.kind();
        self.calls.lock().unwrap().push(call);
        let mut faults = self.faults.lock().unwrap();
        match faults.iter().position(|(fault_kind, _)| *fault_kind == kind) {
            Some(i) => Err(faults.remove(i).unwrap().1),
            None => Ok(()),
        }
    }
}

impl TableService for ScriptedService {
    fn create_table_if_absent(&self, table : &str) -> Result<bool, RemoteError> {
        self.record(Call::CreateTable)?;
        self.inner.create_table_if_absent(table)
    }
    fn delete_table_if_exists(&self, table : &str) -> Result<bool, RemoteError> {
        self.record(Call::DeleteTable)?;
        self.inner.delete_table_if_exists(table)
    }
    fn list_tables(&self) -> Result<Vec<String>, RemoteError> {
        self.record(Call::ListTables)?;
        self.inner.list_tables()
    }
    fn query(&self, table : &str, filter : Option<&TableFilter>, continuation : Option<&Continuation>) -> Result<QueryPage, RemoteError> {
        self.record(Call::Query(filter.cloned()))?;
        self.inner.query(table, filter, continuation)
    }
    fn submit_batch(&self, table : &str, operation : BatchOperation, entities : &[RawEntity]) -> Result<(), RemoteError> {
        self.record(Call::Batch(operation, entities.len()))?;
        self.inner.submit_batch(table, operation, entities)
    }
    fn submit_single(&self, table : &str, operation : BatchOperation, entity : &RawEntity) -> Result<(), RemoteError> {
        self.record(Call::Single(operation))?;
        self.inner.submit_single(table, operation, entity)
    }
}
