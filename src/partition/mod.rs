//! Time-bucketed partition registry and resolution.
//!
//! This module decides which physical partition an event timestamp belongs
//! to. It keeps a per-stream cache of the partition registry and creates new
//! partitions lazily as time advances, arbitrating races through the store's
//! uniqueness constraint on partition names.

pub mod config;
pub mod descriptor;
pub mod registry;
pub mod resolver;

// Re-export main types for public API
pub use config::{ShardingConfig, StreamConfig};
pub use descriptor::PartitionDescriptor;
pub use registry::RegistryCache;
pub use resolver::StreamPartitions;

/// Errors specific to the partition layer.
#[derive(Debug, thiserror::Error)]
pub enum PartitionError {
    /// Bucket width must be at least one day when sharding is enabled
    #[error("Invalid bucket width {0}: must be greater than 0 days")]
    InvalidBucketWidth(u32),

    /// Streams need a non-empty name to derive collection names from
    #[error("Stream name must not be empty")]
    EmptyStreamName,

    /// A stream was registered twice with different configurations
    #[error("Stream {stream} is already registered with a different configuration")]
    ConfigMismatch { stream: String },

    /// Partition creation kept losing uniqueness races past the configured bound
    #[error("Gave up creating partition {name} after {attempts} uniqueness conflicts")]
    ConflictRetriesExhausted { name: String, attempts: u32 },
}
