//! Stream registry exposed to the host framework.
//!
//! A [`PartitionCatalog`] owns one [`StreamPartitions`] per stream type over a
//! shared store. Streams are registered on first use: the configuration is
//! validated and the registry and snapshot indexes are declared before the
//! stream resolves anything.

use crate::partition::{PartitionDescriptor, PartitionError, StreamConfig, StreamPartitions};
use crate::store::PartitionStore;
use crate::Result;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Per-stream resolvers keyed by stream type.
pub struct PartitionCatalog<S> {
    store: Arc<S>,
    streams: RwLock<HashMap<String, Arc<StreamPartitions<S>>>>,
}

impl<S: PartitionStore> PartitionCatalog<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            streams: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the resolver for `config`, registering the stream on first use.
    ///
    /// A stream's configuration is fixed once registered; asking for the same
    /// stream type with a different configuration fails with
    /// [`PartitionError::ConfigMismatch`].
    pub fn stream(&self, config: &StreamConfig) -> Result<Arc<StreamPartitions<S>>> {
        let stream_type = config.event_type();
        if let Some(stream) = self.streams.read().get(&stream_type) {
            return Self::check_config(stream, config);
        }

        // Built outside the lock: initialization talks to the store.
        let stream = StreamPartitions::new(Arc::clone(&self.store), config.clone())?;
        stream.initialize()?;

        let mut streams = self.streams.write();
        let stream = streams
            .entry(stream_type)
            .or_insert_with(|| {
                info!(
                    stream = %stream.stream_type(),
                    sharding = stream.config().sharding().enabled,
                    bucket_width_days = stream.config().sharding().bucket_width_days,
                    "registered stream"
                );
                Arc::new(stream)
            });
        Self::check_config(stream, config)
    }

    /// Returns the partition that new data for `event_time` is written to.
    pub fn resolve(
        &self,
        config: &StreamConfig,
        event_time: DateTime<Utc>,
    ) -> Result<PartitionDescriptor> {
        self.stream(config)?.resolve(event_time)
    }

    /// Returns the partitions needed to replay `config`'s stream from
    /// `reference_time`.
    pub fn resolve_at_or_after(
        &self,
        config: &StreamConfig,
        reference_time: DateTime<Utc>,
    ) -> Result<Vec<PartitionDescriptor>> {
        self.stream(config)?.resolve_at_or_after(reference_time)
    }

    /// Returns the stream types registered so far.
    pub fn stream_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.streams.read().keys().cloned().collect();
        types.sort();
        types
    }

    fn check_config(
        stream: &Arc<StreamPartitions<S>>,
        config: &StreamConfig,
    ) -> Result<Arc<StreamPartitions<S>>> {
        if stream.config() != config {
            return Err(PartitionError::ConfigMismatch {
                stream: config.name().to_string(),
            }
            .into());
        }
        Ok(Arc::clone(stream))
    }
}
