//! Partition descriptor records.
//!
//! A descriptor identifies one physical partition of a logical stream. It is
//! written to the registry exactly once and never modified afterwards.

use crate::encoding::value::{ValueReader, ValueWriter};
use crate::encoding::EncodingError;
use chrono::{DateTime, SubsecRound, Utc};
use uuid::Uuid;

/// Registry record for one physical partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionDescriptor {
    /// Globally unique identifier assigned at creation
    pub id: Uuid,
    /// Logical stream type shared by all partitions of the stream
    pub stream_type: String,
    /// Bucket index, strictly increasing within `stream_type`
    pub version: u64,
    /// Physical partition name, `{stream_type}_{version}`
    pub name: String,
    /// Creation time, informational only
    pub create_time: DateTime<Utc>,
}

/// Derives the physical partition name for a stream type and bucket version.
pub fn partition_name(stream_type: &str, version: u64) -> String {
    format!("{}_{}", stream_type, version)
}

impl PartitionDescriptor {
    /// Creates a fresh descriptor stamped with a new id and the current time.
    ///
    /// The timestamp is truncated to milliseconds, the precision it is
    /// persisted with.
    pub fn new(stream_type: impl Into<String>, version: u64) -> Self {
        let stream_type = stream_type.into();
        Self {
            id: Uuid::new_v4(),
            name: partition_name(&stream_type, version),
            stream_type,
            version,
            create_time: Utc::now().trunc_subsecs(3),
        }
    }

    /// Encodes the descriptor into storage format:
    /// [version][id][bucket_version][create_time_ms][type][name]
    pub fn encode(&self) -> Result<Vec<u8>, EncodingError> {
        let mut writer = ValueWriter::new();
        writer
            .put_fixed(self.id.as_bytes())
            .put_u64(self.version)
            .put_i64(self.create_time.timestamp_millis());
        writer.put_str(&self.stream_type)?;
        writer.put_str(&self.name)?;
        Ok(writer.finish())
    }

    /// Decodes storage bytes into a descriptor.
    pub fn decode(data: &[u8]) -> Result<Self, EncodingError> {
        let mut reader = ValueReader::new(data)?;
        let id = Uuid::from_bytes(reader.fixed::<16>()?);
        let version = reader.u64()?;
        let millis = reader.i64()?;
        let stream_type = reader.string()?;
        let name = reader.string()?;
        reader.finish()?;

        let create_time = DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(|| {
            EncodingError::InvalidValueEncoding(format!("Timestamp out of range: {}", millis))
        })?;

        Ok(Self {
            id,
            stream_type,
            version,
            name,
            create_time,
        })
    }
}
