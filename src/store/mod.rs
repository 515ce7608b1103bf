//! Partition metadata store.
//!
//! The resolution engine talks to its backing store only through the
//! [`PartitionStore`] trait: reading and inserting partition descriptors, and
//! declaring indexes on named collections. [`RedbStore`] implements it on a
//! redb database.

use crate::encoding::EncodingError;
use crate::partition::PartitionDescriptor;

pub mod index;
pub mod redb_store;

// Re-export main types for public API
pub use index::{IndexField, IndexSpec, SortOrder};
pub use redb_store::{RedbStore, REGISTRY_COLLECTION};

/// Errors reported by a metadata store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An insert would duplicate a value that must be unique
    #[error("Uniqueness conflict in {collection}: {name} already exists")]
    UniquenessConflict { collection: String, name: String },

    /// An index with the same name is already declared on the collection
    #[error("Index {index} already exists on {collection}")]
    IndexExists { collection: String, index: String },

    /// The backing database failed
    #[error("Storage backend failure: {0}")]
    Backend(#[from] redb::Error),

    /// A stored record could not be decoded
    #[error("Corrupt stored record: {0}")]
    Corrupt(#[from] EncodingError),
}

/// Accessor for partition descriptors and collection indexes.
///
/// Calls are blocking round trips. Implementations must be safe to share
/// between threads, and `insert_partition` must be atomic with respect to its
/// uniqueness check: it is the arbiter between concurrent creators.
pub trait PartitionStore: Send + Sync {
    /// Returns every descriptor of `stream_type`, ordered by ascending version.
    fn find_partitions(&self, stream_type: &str) -> Result<Vec<PartitionDescriptor>, StoreError>;

    /// Inserts a new descriptor.
    ///
    /// Fails with [`StoreError::UniquenessConflict`] if a descriptor with the
    /// same name, or the same type and version, already exists.
    fn insert_partition(&self, descriptor: &PartitionDescriptor) -> Result<(), StoreError>;

    /// Returns the names of the indexes declared on `collection`.
    fn list_indexes(&self, collection: &str) -> Result<Vec<String>, StoreError>;

    /// Declares an index on `collection`.
    ///
    /// Fails with [`StoreError::IndexExists`] if an index of the same name is
    /// already present.
    fn create_index(&self, collection: &str, spec: &IndexSpec) -> Result<(), StoreError>;
}
