//!
//! The PerfCounters module contains everything associated with the "perf_counters" feature
//!

#[cfg(feature = "perf_counters")]
use std::sync::{Mutex, PoisonError};

/// All of the performance counters to measure the remote traffic of a [TableStorage](crate::TableStorage)
///
/// These counters don't reflect totals across the life of the store, rather they can be reset and
/// therefore used to measure individual operations or sequences of operations.
///
/// NOTE: In order to get valid data, you must enable the `perf_counters` feature in the `Cargo.toml` file
/// with an entry similar to this:
///
/// ```toml
/// [dependencies]
/// resilient_tables = { version = "0.1.0", features = ["perf_counters"] }
/// ```
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct PerfCounterFields {

    /// The number of query requests sent, one per page read
    pub query_count : usize,

    /// The number of batch transactions submitted, including ones that failed and were retried
    pub batch_submit_count : usize,

    /// The number of single-entity requests submitted, after a batch was split up
    pub single_submit_count : usize,

    /// The number of times a failed request was sent again by a retry policy
    pub retry_count : usize,

    /// The number of times a write switched from batches to single-entity requests
    ///
    /// A high value suggests the [MAX_ENTITY_TRANSACTION_PAYLOAD](crate::TableConfig::MAX_ENTITY_TRANSACTION_PAYLOAD)
    /// is larger than what the store accepts.
    pub degrade_count : usize,

    /// The number of times a delete asked the store which of its keys were still present
    pub delete_requery_count : usize,

    /// The number of tables created on the fly, because an insert found its table missing
    pub table_create_count : usize,
}

impl PerfCounterFields {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(feature = "perf_counters")]
pub struct PerfCounters(Mutex<PerfCounterFields>);

#[cfg(feature = "perf_counters")]
impl PerfCounters {
    pub fn new() -> Self {
        Self(Mutex::new(PerfCounterFields::new()))
    }
    pub fn reset(&self) {
        self.set(PerfCounterFields::new())
    }
    pub fn update<F : Fn(&mut PerfCounterFields)>(&self, func : F) {
        let mut fields = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        func(&mut fields);
    }
    pub fn get(&self) -> PerfCounterFields {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
    pub fn set(&self, fields : PerfCounterFields) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = fields;
    }
}

#[cfg(not(feature = "perf_counters"))]
pub struct PerfCounters();

#[cfg(not(feature = "perf_counters"))]
impl PerfCounters {
    pub fn new() -> Self {
        Self()
    }
    pub fn reset(&self) {
    }
    pub fn update<F : Fn(&mut PerfCounterFields)>(&self, _func : F) {
    }
    pub fn get(&self) -> PerfCounterFields {
        PerfCounterFields::new()
    }
}
