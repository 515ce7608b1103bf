//! Configuration for time-partitioned streams.
//!
//! Contains the sharding parameters that map event time onto bucket versions,
//! and the per-stream configuration that derives collection names.

use crate::partition::PartitionError;
use chrono::{DateTime, Utc};

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Default bucket width, in days.
pub const DEFAULT_BUCKET_WIDTH_DAYS: u32 = 90;

/// Default bound on consecutive uniqueness conflicts during partition creation.
pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 16;

/// Sharding parameters for one logical stream.
///
/// The configuration is fixed for the lifetime of a stream: changing the epoch
/// or bucket width after partitions exist would remap timestamps onto
/// different versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardingConfig {
    /// Whether the stream is split into time buckets at all
    ///
    /// When false, exactly one partition (version 0) ever exists.
    pub enabled: bool,

    /// Width of each time bucket, in days
    ///
    /// Must be greater than 0 when sharding is enabled.
    pub bucket_width_days: u32,

    /// Instant from which elapsed time is measured
    pub reference_epoch: DateTime<Utc>,
}

impl ShardingConfig {
    /// Creates a validated sharding configuration.
    ///
    /// # Arguments
    /// * `enabled` - Whether to split the stream into time buckets
    /// * `bucket_width_days` - Bucket width in days (must be > 0 when enabled)
    /// * `reference_epoch` - Start of bucket 0
    pub fn new(
        enabled: bool,
        bucket_width_days: u32,
        reference_epoch: DateTime<Utc>,
    ) -> crate::Result<Self> {
        let config = Self {
            enabled,
            bucket_width_days,
            reference_epoch,
        };
        config.validate()?;
        Ok(config)
    }

    /// A configuration that keeps the whole stream in a single partition.
    pub fn disabled(reference_epoch: DateTime<Utc>) -> Self {
        Self {
            enabled: false,
            bucket_width_days: DEFAULT_BUCKET_WIDTH_DAYS,
            reference_epoch,
        }
    }

    /// Checks the invariants `new` enforces, for configs built field by field.
    pub fn validate(&self) -> crate::Result<()> {
        if self.enabled && self.bucket_width_days == 0 {
            return Err(PartitionError::InvalidBucketWidth(self.bucket_width_days).into());
        }
        Ok(())
    }

    /// Computes the bucket version that `event_time` falls into.
    ///
    /// Elapsed days are fractional and floored after dividing by the bucket
    /// width. Times at or before the reference epoch map to version 0, as does
    /// every time when sharding is disabled.
    pub fn version_for(&self, event_time: DateTime<Utc>) -> u64 {
        if !self.enabled {
            return 0;
        }

        let elapsed_ms = event_time
            .signed_duration_since(self.reference_epoch)
            .num_milliseconds();
        if elapsed_ms <= 0 {
            return 0;
        }

        let width_ms = i64::from(self.bucket_width_days.max(1)) * MILLIS_PER_DAY;
        (elapsed_ms / width_ms) as u64
    }
}

impl Default for ShardingConfig {
    fn default() -> Self {
        Self::disabled(DateTime::<Utc>::UNIX_EPOCH)
    }
}

/// Configuration for one logical event stream.
///
/// A stream named `Order` writes its events to partitions of type
/// `OrderEvent` (`OrderEvent_0`, `OrderEvent_1`, ...) and its snapshots to
/// the `OrderState` collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    name: String,
    sharding: ShardingConfig,
    max_conflict_retries: u32,
}

impl StreamConfig {
    /// Creates a validated stream configuration.
    pub fn new(name: impl Into<String>, sharding: ShardingConfig) -> crate::Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(PartitionError::EmptyStreamName.into());
        }
        sharding.validate()?;

        Ok(Self {
            name,
            sharding,
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
        })
    }

    /// Overrides how many consecutive creation conflicts are tolerated before
    /// resolution gives up.
    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    /// Returns the stream name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the sharding parameters.
    pub fn sharding(&self) -> &ShardingConfig {
        &self.sharding
    }

    /// Returns how many consecutive creation conflicts are tolerated.
    pub fn max_conflict_retries(&self) -> u32 {
        self.max_conflict_retries
    }

    /// The partition type shared by every event partition of this stream.
    pub fn event_type(&self) -> String {
        format!("{}Event", self.name)
    }

    /// The (unpartitioned) snapshot collection of this stream.
    pub fn snapshot_collection(&self) -> String {
        format!("{}State", self.name)
    }
}
