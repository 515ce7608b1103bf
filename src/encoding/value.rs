//! Versioned value encoding.
//!
//! Every stored value starts with a single version byte followed by a
//! sequence of fixed-width big-endian integers and length-prefixed byte
//! strings: [version][field]...

use super::EncodingError;

pub type Result<T> = std::result::Result<T, EncodingError>;

/// Current encoding version for stored values
pub const VALUE_VERSION: u8 = 1;

/// Appends fields to a versioned value buffer.
#[derive(Debug)]
pub struct ValueWriter {
    buf: Vec<u8>,
}

impl ValueWriter {
    /// Starts a new value with the current version prefix.
    pub fn new() -> Self {
        let mut buf = Vec::with_capacity(64);
        buf.push(VALUE_VERSION);
        Self { buf }
    }

    pub fn put_u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    pub fn put_u64(&mut self, value: u64) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn put_i64(&mut self, value: i64) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn put_fixed(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    /// Appends a `[len][bytes]` field.
    pub fn put_bytes(&mut self, bytes: &[u8]) -> Result<&mut Self> {
        let len: u32 = bytes.len().try_into().map_err(|_| {
            EncodingError::InvalidValueEncoding("Field too long".to_string())
        })?;
        self.buf.extend_from_slice(&len.to_be_bytes());
        self.buf.extend_from_slice(bytes);
        Ok(self)
    }

    pub fn put_str(&mut self, value: &str) -> Result<&mut Self> {
        self.put_bytes(value.as_bytes())
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

impl Default for ValueWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads fields back out of a versioned value.
#[derive(Debug)]
pub struct ValueReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> ValueReader<'a> {
    /// Validates the version prefix and positions the reader after it.
    pub fn new(data: &'a [u8]) -> Result<Self> {
        let Some(&version) = data.first() else {
            return Err(EncodingError::InvalidValueEncoding("Empty value".to_string()));
        };
        if version != VALUE_VERSION {
            return Err(EncodingError::UnsupportedVersion(version));
        }
        Ok(Self { data, offset: 1 })
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.offset.checked_add(len).filter(|end| *end <= self.data.len());
        let Some(end) = end else {
            return Err(EncodingError::InvalidValueEncoding(format!(
                "Value truncated at offset {}",
                self.offset
            )));
        };
        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.fixed::<8>()?))
    }

    pub fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.fixed::<8>()?))
    }

    pub fn fixed<const N: usize>(&mut self) -> Result<[u8; N]> {
        let slice = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    pub fn bytes(&mut self) -> Result<&'a [u8]> {
        let len = u32::from_be_bytes(self.fixed::<4>()?) as usize;
        self.take(len)
    }

    pub fn string(&mut self) -> Result<String> {
        let bytes = self.bytes()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| EncodingError::InvalidValueEncoding(e.to_string()))
    }

    /// Fails if any bytes remain unread.
    pub fn finish(self) -> Result<()> {
        if self.offset != self.data.len() {
            return Err(EncodingError::InvalidValueEncoding(format!(
                "{} trailing bytes",
                self.data.len() - self.offset
            )));
        }
        Ok(())
    }
}
