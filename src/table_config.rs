//!
//! The TableConfig module contains the parameters for configuring a [TableStorage](crate::TableStorage).
//! The TableConfig trait and the DefaultTableConfig struct are re-exported.
//!

use crate::retry::RetryPolicy;

/// The largest number of entities the store accepts in one batch transaction
pub const MAX_ENTITY_TRANSACTION_COUNT : usize = 100;

/// The largest payload the store accepts in one batch transaction, 4 MiB less a 128 KiB margin
/// for the envelope of the request
pub const MAX_ENTITY_TRANSACTION_PAYLOAD : usize = 4 * 1024 * 1024 - 128 * 1024;

/// The TableConfig trait specifies all of the parameters for configuring a [TableStorage](crate::TableStorage)
///
/// ## An example creating a [TableStorage](crate::TableStorage) using a custom [TableConfig]
/// ```
/// use resilient_tables::{*};
///
/// struct Config();
/// impl TableConfig for Config {
///     type CoderT = DefaultCoder;
///     const MAX_ENTITY_TRANSACTION_COUNT : usize = 20;
///     fn storage_policy(&self) -> RetryPolicy {
///         RetryPolicy::immediate(3)
///     }
/// }
/// let storage = TableStorage::new(MemoryTableService::new(), Config());
/// assert!(storage.list_tables().unwrap().is_empty());
/// ```
pub trait TableConfig : Send + Sync {

    //TODO: Give CoderT a default of DefaultCoder, once associated type defaults are stabilized.
    //https://github.com/rust-lang/rust/issues/29661

    /// The [Coder](crate::Coder) that turns entity values into the content bytes of a
    /// [RawEntity](crate::RawEntity).  A table must be read with the coder that wrote it.
    type CoderT : 'static + crate::Coder + Send + Sync;

    /// The largest number of entities sent in one batch transaction
    ///
    /// The same number bounds the row keys of one query in [get_rows](crate::TableStorage::get_rows)
    /// and the keys of one batch in [delete](crate::TableStorage::delete).
    const MAX_ENTITY_TRANSACTION_COUNT : usize = MAX_ENTITY_TRANSACTION_COUNT;

    /// The largest total [payload_size](crate::RawEntity::payload_size) sent in one batch transaction
    ///
    /// An entity that is larger than this on its own is still sent, alone in its batch.  Should the
    /// store reject a batch as too large anyway, the rest of the write proceeds one entity at a time.
    const MAX_ENTITY_TRANSACTION_PAYLOAD : usize = MAX_ENTITY_TRANSACTION_PAYLOAD;

    /// The retry policy for queries and writes
    fn storage_policy(&self) -> RetryPolicy {
        RetryPolicy::transient_table_errors()
    }

    /// The retry policy for creating and deleting tables
    fn instantiation_policy(&self) -> RetryPolicy {
        RetryPolicy::slow_instantiation()
    }
}

/// A struct that implements [TableConfig] with default values.  This can be passed as a convenience
/// when a default configuration for [TableStorage](crate::TableStorage) is acceptable
pub struct DefaultTableConfig();

impl TableConfig for DefaultTableConfig {
    type CoderT = crate::DefaultCoder;
}
