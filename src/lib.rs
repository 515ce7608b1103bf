//! Time-bucketed partitioning of append-only event logs on redb.
//!
//! Each logical stream is split into partitions covering fixed-width time
//! buckets counted from a reference epoch. A per-stream registry cache and
//! resolver decide which partition an event timestamp belongs to and create
//! partitions lazily, with the store's uniqueness constraint on partition
//! names settling races between concurrent creators.

pub mod catalog;
pub mod encoding;
pub mod error;
pub mod indexes;
pub mod partition;
pub mod store;

// Re-export common types for convenience
pub use catalog::PartitionCatalog;
pub use error::{Error, Result};
pub use indexes::IndexAssurance;
pub use partition::{
    PartitionDescriptor, PartitionError, ShardingConfig, StreamConfig, StreamPartitions,
};
pub use store::{PartitionStore, RedbStore, StoreError};
