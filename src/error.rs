//! Crate-scoped error handling for redb-event-partitions.
//!
//! This module provides a unified error type for public APIs while keeping
//! the precise layer errors available for callers that need to match on them.

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type exposed to users of the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Errors from the partition layer (configuration and resolution)
    #[error("Partition error: {0}")]
    Partition(#[from] crate::partition::PartitionError),

    /// Errors from the metadata store
    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),

    /// Errors from key/value encoding
    #[error("Encoding error: {0}")]
    Encoding(#[from] crate::encoding::EncodingError),
}

impl Error {
    /// Returns true if this error is a uniqueness conflict reported by the store.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::Store(crate::store::StoreError::UniquenessConflict { .. })
        )
    }
}
