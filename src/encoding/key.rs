//! Key encoding and decoding for the metadata tables.
//!
//! Keys are encoded with a length prefix so that arbitrary stream and
//! collection names sort and scan safely:
//!
//! Registry-by-type key: [type_len][type][version]
//! Index catalog key:    [collection_len][collection][index_len][index]

use super::EncodingError;

pub type Result<T> = std::result::Result<T, EncodingError>;

fn push_len_prefixed(buf: &mut Vec<u8>, bytes: &[u8]) -> Result<()> {
    let len: u32 = bytes
        .len()
        .try_into()
        .map_err(|_| EncodingError::InvalidKeyEncoding("Key component too long".to_string()))?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}

/// Builds the scan prefix shared by every registry entry of one stream type.
///
/// # Arguments
/// * `stream_type` - The logical stream type
///
/// # Returns
/// Prefix bytes for range scanning
pub fn build_type_prefix(stream_type: &str) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(4 + stream_type.len());
    push_len_prefixed(&mut buf, stream_type.as_bytes())?;
    Ok(buf)
}

/// Encodes a registry-by-type key with the format: [type_len][type][version]
///
/// The version is big-endian so that a prefix scan yields ascending versions.
pub fn encode_type_version_key(stream_type: &str, version: u64) -> Result<Vec<u8>> {
    let mut buf = build_type_prefix(stream_type)?;
    buf.extend_from_slice(&version.to_be_bytes());
    Ok(buf)
}

/// Extracts the version from a registry-by-type key, checking that it
/// belongs to `stream_type`.
///
/// Returns `None` for keys of another type or with a malformed version.
pub fn decode_type_version_key(encoded_key: &[u8], stream_type: &str) -> Option<u64> {
    let rest = strip_len_prefixed(encoded_key, stream_type.as_bytes())?;
    let bytes: [u8; 8] = rest.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

/// Builds the scan prefix shared by every index declared on `collection`.
pub fn build_collection_prefix(collection: &str) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(4 + collection.len());
    push_len_prefixed(&mut buf, collection.as_bytes())?;
    Ok(buf)
}

/// Encodes an index catalog key: [collection_len][collection][index_len][index]
pub fn encode_index_key(collection: &str, index_name: &str) -> Result<Vec<u8>> {
    let mut buf = build_collection_prefix(collection)?;
    push_len_prefixed(&mut buf, index_name.as_bytes())?;
    Ok(buf)
}

/// Extracts the index name from an index catalog key for `collection`.
pub fn decode_index_key(encoded_key: &[u8], collection: &str) -> Result<Option<String>> {
    let Some(rest) = strip_len_prefixed(encoded_key, collection.as_bytes()) else {
        return Ok(None);
    };
    if rest.len() < 4 {
        return Err(EncodingError::InvalidKeyEncoding(
            "Index key too short to contain index name".to_string(),
        ));
    }

    let name_len = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
    let name = rest.get(4..4 + name_len).ok_or_else(|| {
        EncodingError::InvalidKeyEncoding("Index name truncated".to_string())
    })?;

    String::from_utf8(name.to_vec())
        .map(Some)
        .map_err(|e| EncodingError::InvalidKeyEncoding(e.to_string()))
}

/// Strips a `[len][expected]` component from the front of `encoded_key`,
/// returning the remainder only when the component matches exactly.
fn strip_len_prefixed<'a>(encoded_key: &'a [u8], expected: &[u8]) -> Option<&'a [u8]> {
    if encoded_key.len() < 4 {
        return None;
    }
    let len = u32::from_be_bytes([
        encoded_key[0],
        encoded_key[1],
        encoded_key[2],
        encoded_key[3],
    ]) as usize;

    if len != expected.len() || encoded_key.len() < 4 + len {
        return None;
    }
    if &encoded_key[4..4 + len] != expected {
        return None;
    }

    Some(&encoded_key[4 + len..])
}
