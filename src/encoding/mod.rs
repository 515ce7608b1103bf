//! Key and value encoding for the redb-backed metadata tables.

pub mod key;
pub mod value;

/// Errors raised while encoding or decoding stored keys and values.
#[derive(Debug, thiserror::Error)]
pub enum EncodingError {
    /// A key could not be encoded or did not have the expected layout
    #[error("Invalid key encoding: {0}")]
    InvalidKeyEncoding(String),

    /// A value could not be decoded
    #[error("Invalid value encoding: {0}")]
    InvalidValueEncoding(String),

    /// A stored value carries a version prefix this build does not understand
    #[error("Unsupported value version: {0}")]
    UnsupportedVersion(u8),
}
