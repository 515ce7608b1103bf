//! Partition resolution for one configured stream.
//!
//! [`StreamPartitions`] maps an event timestamp to the partition its data
//! belongs in, creating partitions as time crosses bucket boundaries.
//!
//! Creation runs under a per-stream mutex and re-validates against the cache
//! before inserting, so threads of one process do not race each other to the
//! store. Writers in other processes (or other catalogs on the same database)
//! are arbitrated by the store's uniqueness constraint on partition names: the
//! loser invalidates its cache, reloads, and finds the winner's descriptor.

use crate::indexes::IndexAssurance;
use crate::partition::{PartitionDescriptor, PartitionError, RegistryCache, StreamConfig};
use crate::store::{PartitionStore, StoreError};
use crate::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Registry cache and resolution engine for one logical stream.
pub struct StreamPartitions<S> {
    config: StreamConfig,
    stream_type: String,
    store: Arc<S>,
    cache: RegistryCache,
    indexes: IndexAssurance<S>,
    creation: Mutex<()>,
    indexed: Mutex<HashSet<String>>,
}

impl<S: PartitionStore> StreamPartitions<S> {
    /// Creates the resolver for a stream.
    ///
    /// Validates the configuration; no store access happens until the first
    /// resolution or [`initialize`](Self::initialize).
    pub fn new(store: Arc<S>, config: StreamConfig) -> Result<Self> {
        config.sharding().validate()?;
        let stream_type = config.event_type();

        Ok(Self {
            cache: RegistryCache::new(stream_type.clone()),
            indexes: IndexAssurance::new(Arc::clone(&store)),
            stream_type,
            config,
            store,
            creation: Mutex::new(()),
            indexed: Mutex::new(HashSet::new()),
        })
    }

    /// Returns the stream configuration.
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Returns the partition type of this stream, e.g. `OrderEvent`.
    pub fn stream_type(&self) -> &str {
        &self.stream_type
    }

    /// Returns the registry cache backing this stream.
    pub fn cache(&self) -> &RegistryCache {
        &self.cache
    }

    /// Declares the registry and snapshot indexes of this stream.
    pub fn initialize(&self) -> Result<()> {
        self.ensure_registry_index()?;
        self.ensure_snapshot_index()
    }

    /// Declares the unique `name` index on the partition registry.
    pub fn ensure_registry_index(&self) -> Result<()> {
        self.indexes.ensure_registry_index()
    }

    /// Declares the unique `state` index on the stream's snapshot collection.
    pub fn ensure_snapshot_index(&self) -> Result<()> {
        self.indexes
            .ensure_snapshot_index(&self.config.snapshot_collection())
    }

    /// Declares the event indexes of one partition and records it as indexed.
    pub fn ensure_partition_indexes(&self, partition_name: &str) -> Result<()> {
        self.indexes.ensure_partition_indexes(partition_name)?;
        self.indexed.lock().insert(partition_name.to_string());
        Ok(())
    }

    /// Returns `descriptor` once its partition indexes are confirmed.
    ///
    /// Partitions created by a writer that failed before declaring their
    /// indexes get them here, the first time this resolver hands them out.
    fn with_indexes(&self, descriptor: PartitionDescriptor) -> Result<PartitionDescriptor> {
        if !self.indexed.lock().contains(&descriptor.name) {
            self.ensure_partition_indexes(&descriptor.name)?;
        }
        Ok(descriptor)
    }

    /// Returns the current (highest version) partition, if any exists.
    pub fn current(&self) -> Result<Option<PartitionDescriptor>> {
        Ok(self.cache.load_all(self.store.as_ref())?.last().cloned())
    }

    /// Returns the partition that new data for `event_time` is written to,
    /// creating it if the stream has not reached that bucket yet.
    ///
    /// Events older than the current partition resolve to the current
    /// partition; partitions are only ever added at the head.
    pub fn resolve(&self, event_time: DateTime<Utc>) -> Result<PartitionDescriptor> {
        let target = self.config.sharding().version_for(event_time);
        if let Some(current) = self.covering(target)? {
            return self.with_indexes(current);
        }

        let _creation = self.creation.lock();
        let mut conflicts = 0u32;

        loop {
            // Another thread may have created the partition while we waited.
            if let Some(current) = self.covering(target)? {
                return self.with_indexes(current);
            }

            let descriptor = PartitionDescriptor::new(self.stream_type.as_str(), target);
            match self.store.insert_partition(&descriptor) {
                Ok(()) => {
                    info!(
                        stream = %self.stream_type,
                        version = descriptor.version,
                        name = %descriptor.name,
                        "created partition"
                    );
                    self.cache.append(descriptor.clone());
                    return self.with_indexes(descriptor);
                }
                Err(StoreError::UniquenessConflict { .. }) => {
                    conflicts += 1;
                    warn!(
                        stream = %self.stream_type,
                        name = %descriptor.name,
                        conflicts,
                        "partition created concurrently, reloading registry"
                    );
                    self.cache.invalidate();

                    if conflicts > self.config.max_conflict_retries() {
                        return Err(PartitionError::ConflictRetriesExhausted {
                            name: descriptor.name,
                            attempts: conflicts,
                        }
                        .into());
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Returns the partitions needed to replay history from `reference_time`.
    ///
    /// This never creates partitions. The anchor is the partition that was
    /// current at `reference_time`: the newest one whose version does not
    /// exceed the bucket of `reference_time`. The anchor and every later
    /// partition are returned. If every partition is newer than the
    /// reference bucket, all of them are returned; if none exist, none are.
    pub fn resolve_at_or_after(
        &self,
        reference_time: DateTime<Utc>,
    ) -> Result<Vec<PartitionDescriptor>> {
        let entries = self.cache.load_all(self.store.as_ref())?;
        let Some(last) = entries.last() else {
            return Ok(Vec::new());
        };

        let anchor = if self.config.sharding().enabled {
            let target = self.config.sharding().version_for(reference_time);
            entries.iter().rev().find(|d| d.version <= target)
        } else {
            Some(last)
        };

        let Some(anchor) = anchor else {
            return Ok(entries.to_vec());
        };
        Ok(entries
            .iter()
            .filter(|d| d.version >= anchor.version)
            .cloned()
            .collect())
    }

    /// Lists the partitions a reader should scan.
    ///
    /// With a reference time this is [`resolve_at_or_after`](Self::resolve_at_or_after).
    /// Without one every partition is returned, and a stream with no
    /// partitions yet gets its current one created first.
    pub fn partitions(
        &self,
        reference_time: Option<DateTime<Utc>>,
    ) -> Result<Vec<PartitionDescriptor>> {
        if let Some(reference_time) = reference_time {
            return self.resolve_at_or_after(reference_time);
        }

        let entries = self.cache.load_all(self.store.as_ref())?;
        if entries.is_empty() {
            return Ok(vec![self.resolve(Utc::now())?]);
        }
        Ok(entries.to_vec())
    }

    /// Returns the current partition if it already covers `target`.
    fn covering(&self, target: u64) -> Result<Option<PartitionDescriptor>> {
        let entries = self.cache.load_all(self.store.as_ref())?;
        let Some(last) = entries.last() else {
            return Ok(None);
        };

        if !self.config.sharding().enabled || last.version >= target {
            debug!(
                stream = %self.stream_type,
                version = last.version,
                target,
                "current partition covers event"
            );
            return Ok(Some(last.clone()));
        }
        Ok(None)
    }
}
