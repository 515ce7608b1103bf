//! Per-stream cache of the partition registry.
//!
//! The cache memoizes the ordered descriptor list of one stream type so that
//! resolution does not query the store on every call. Readers take a cheap
//! snapshot (`Arc` clone); the first reader after construction or
//! invalidation fills it, and concurrent readers of an empty cache wait for
//! that single fill instead of querying the store themselves.

use crate::partition::PartitionDescriptor;
use crate::store::PartitionStore;
use crate::Result;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::debug;

/// Lazily populated, invalidatable descriptor list for one stream type.
#[derive(Debug)]
pub struct RegistryCache {
    stream_type: String,
    entries: RwLock<Option<Arc<Vec<PartitionDescriptor>>>>,
    fill: Mutex<()>,
}

impl RegistryCache {
    /// Creates an empty cache for `stream_type`.
    pub fn new(stream_type: impl Into<String>) -> Self {
        Self {
            stream_type: stream_type.into(),
            entries: RwLock::new(None),
            fill: Mutex::new(()),
        }
    }

    /// Returns the descriptors of the stream, ordered by ascending version.
    ///
    /// The first call after construction or [`invalidate`](Self::invalidate)
    /// queries `store`; later calls return the memoized list.
    pub fn load_all<S>(&self, store: &S) -> Result<Arc<Vec<PartitionDescriptor>>>
    where
        S: PartitionStore + ?Sized,
    {
        if let Some(entries) = self.snapshot() {
            return Ok(entries);
        }

        let _fill = self.fill.lock();
        if let Some(entries) = self.snapshot() {
            return Ok(entries);
        }

        let loaded = Arc::new(store.find_partitions(&self.stream_type)?);
        debug!(
            stream = %self.stream_type,
            partitions = loaded.len(),
            "loaded partition registry"
        );
        *self.entries.write() = Some(Arc::clone(&loaded));
        Ok(loaded)
    }

    /// Adds a newly created descriptor without reloading.
    ///
    /// Does nothing on an empty cache: the next load reads the descriptor
    /// from the store anyway.
    pub fn append(&self, descriptor: PartitionDescriptor) {
        let mut guard = self.entries.write();
        let Some(entries) = guard.as_mut() else {
            return;
        };

        match entries.binary_search_by_key(&descriptor.version, |d| d.version) {
            Ok(_) => {}
            Err(position) => Arc::make_mut(entries).insert(position, descriptor),
        }
    }

    /// Drops the memoized list so the next load re-queries the store.
    pub fn invalidate(&self) {
        // Serialized with fills so an in-flight load cannot resurrect stale data.
        let _fill = self.fill.lock();
        *self.entries.write() = None;
        debug!(stream = %self.stream_type, "invalidated partition registry cache");
    }

    /// Returns true if a memoized list is present.
    pub fn is_populated(&self) -> bool {
        self.entries.read().is_some()
    }

    fn snapshot(&self) -> Option<Arc<Vec<PartitionDescriptor>>> {
        self.entries.read().as_ref().map(Arc::clone)
    }
}
