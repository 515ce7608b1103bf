//! Index specifications.

use crate::encoding::value::{ValueReader, ValueWriter};
use crate::encoding::EncodingError;

/// Sort direction of one indexed field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
}

impl SortOrder {
    fn to_byte(self) -> u8 {
        match self {
            SortOrder::Ascending => 1,
        }
    }

    fn from_byte(byte: u8) -> Result<Self, EncodingError> {
        match byte {
            1 => Ok(SortOrder::Ascending),
            other => Err(EncodingError::InvalidValueEncoding(format!(
                "Unknown sort order: {}",
                other
            ))),
        }
    }
}

/// One field of a (possibly compound) index key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexField {
    pub name: String,
    pub order: SortOrder,
}

/// A named index over one or more document fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub fields: Vec<IndexField>,
    pub unique: bool,
}

impl IndexSpec {
    /// Starts a unique index with no fields.
    pub fn unique(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            unique: true,
        }
    }

    /// Appends an ascending key field.
    pub fn ascending(mut self, field: impl Into<String>) -> Self {
        self.fields.push(IndexField {
            name: field.into(),
            order: SortOrder::Ascending,
        });
        self
    }

    /// Names of the indexed fields, in key order.
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Encodes the spec: [version][unique][field_count]([order][field])*[name]
    pub fn encode(&self) -> Result<Vec<u8>, EncodingError> {
        let field_count: u64 = self.fields.len() as u64;
        let mut writer = ValueWriter::new();
        writer.put_u8(u8::from(self.unique)).put_u64(field_count);
        for field in &self.fields {
            writer.put_u8(field.order.to_byte());
            writer.put_str(&field.name)?;
        }
        writer.put_str(&self.name)?;
        Ok(writer.finish())
    }

    /// Decodes a spec written by [`encode`](Self::encode).
    pub fn decode(data: &[u8]) -> Result<Self, EncodingError> {
        let mut reader = ValueReader::new(data)?;
        let unique = reader.u8()? != 0;
        let field_count = reader.u64()?;

        let mut fields = Vec::new();
        for _ in 0..field_count {
            let order = SortOrder::from_byte(reader.u8()?)?;
            let name = reader.string()?;
            fields.push(IndexField { name, order });
        }
        let name = reader.string()?;
        reader.finish()?;

        Ok(Self {
            name,
            fields,
            unique,
        })
    }
}
