//! redb-backed partition metadata store.
//!
//! The registry lives in two tables written in the same transaction:
//!
//! - `partition_registry`: partition name -> encoded descriptor. The table key
//!   is the uniqueness constraint on names that arbitrates creation races.
//! - `partition_registry_by_type`: [type_len][type][version] -> name, scanned
//!   by prefix to list a type's partitions in ascending version order.
//!
//! Declared indexes are recorded in `index_catalog`, keyed by
//! [collection_len][collection][index_len][index].

use super::{IndexSpec, PartitionStore, StoreError};
use crate::encoding::key::{
    build_collection_prefix, build_type_prefix, decode_index_key, decode_type_version_key,
    encode_index_key, encode_type_version_key,
};
use crate::encoding::EncodingError;
use crate::partition::PartitionDescriptor;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, TableError};
use std::path::Path;
use std::sync::Arc;

/// Collection name of the partition registry, for index declarations.
pub const REGISTRY_COLLECTION: &str = "partition_registry";

const REGISTRY: TableDefinition<&str, &[u8]> = TableDefinition::new(REGISTRY_COLLECTION);
const REGISTRY_BY_TYPE: TableDefinition<&[u8], &str> =
    TableDefinition::new("partition_registry_by_type");
const INDEX_CATALOG: TableDefinition<&[u8], &[u8]> = TableDefinition::new("index_catalog");

fn backend<E: Into<redb::Error>>(err: E) -> StoreError {
    StoreError::Backend(err.into())
}

/// Partition metadata store on a shared redb database.
///
/// Several stores (and the catalogs built on them) may share one `Database`;
/// redb serializes their write transactions, so the registry's uniqueness
/// checks hold across all of them.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Wraps an open database.
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Opens or creates the database file at `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path).map_err(backend)?;
        Ok(Self::new(Arc::new(db)))
    }

    /// Returns the underlying database.
    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Returns the full spec of a declared index, if present.
    pub fn index_spec(&self, collection: &str, index: &str) -> Result<Option<IndexSpec>, StoreError> {
        let txn = self.db.begin_read().map_err(backend)?;
        let catalog = match txn.open_table(INDEX_CATALOG) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(err) => return Err(backend(err)),
        };

        let key = encode_index_key(collection, index)?;
        let spec = match catalog.get(key.as_slice()).map_err(backend)? {
            Some(encoded) => Some(IndexSpec::decode(encoded.value())?),
            None => None,
        };
        Ok(spec)
    }
}

impl PartitionStore for RedbStore {
    fn find_partitions(&self, stream_type: &str) -> Result<Vec<PartitionDescriptor>, StoreError> {
        let txn = self.db.begin_read().map_err(backend)?;
        let by_type = match txn.open_table(REGISTRY_BY_TYPE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(err) => return Err(backend(err)),
        };
        let registry = txn.open_table(REGISTRY).map_err(backend)?;

        let prefix = build_type_prefix(stream_type)?;
        let mut partitions = Vec::new();

        for entry in by_type.range(prefix.as_slice()..).map_err(backend)? {
            let (key, name) = entry.map_err(backend)?;
            let key = key.value();
            if !key.starts_with(&prefix) {
                break;
            }
            let version = decode_type_version_key(key, stream_type).ok_or_else(|| {
                EncodingError::InvalidKeyEncoding(format!(
                    "Malformed registry key under type {}",
                    stream_type
                ))
            })?;

            let name = name.value();
            let encoded = registry.get(name).map_err(backend)?.ok_or_else(|| {
                EncodingError::InvalidValueEncoding(format!(
                    "Registry entry {} missing for version {}",
                    name, version
                ))
            })?;
            partitions.push(PartitionDescriptor::decode(encoded.value())?);
        }

        Ok(partitions)
    }

    fn insert_partition(&self, descriptor: &PartitionDescriptor) -> Result<(), StoreError> {
        let encoded = descriptor.encode()?;
        let type_key = encode_type_version_key(&descriptor.stream_type, descriptor.version)?;

        let txn = self.db.begin_write().map_err(backend)?;
        let conflict = {
            let mut registry = txn.open_table(REGISTRY).map_err(backend)?;
            let mut by_type = txn.open_table(REGISTRY_BY_TYPE).map_err(backend)?;

            if registry
                .get(descriptor.name.as_str())
                .map_err(backend)?
                .is_some()
                || by_type
                    .get(type_key.as_slice())
                    .map_err(backend)?
                    .is_some()
            {
                true
            } else {
                registry
                    .insert(descriptor.name.as_str(), encoded.as_slice())
                    .map_err(backend)?;
                by_type
                    .insert(type_key.as_slice(), descriptor.name.as_str())
                    .map_err(backend)?;
                false
            }
        };

        if conflict {
            txn.abort().map_err(backend)?;
            return Err(StoreError::UniquenessConflict {
                collection: REGISTRY_COLLECTION.to_string(),
                name: descriptor.name.clone(),
            });
        }

        txn.commit().map_err(backend)?;
        Ok(())
    }

    fn list_indexes(&self, collection: &str) -> Result<Vec<String>, StoreError> {
        let txn = self.db.begin_read().map_err(backend)?;
        let catalog = match txn.open_table(INDEX_CATALOG) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(err) => return Err(backend(err)),
        };

        let prefix = build_collection_prefix(collection)?;
        let mut names = Vec::new();

        for entry in catalog.range(prefix.as_slice()..).map_err(backend)? {
            let (key, _) = entry.map_err(backend)?;
            let key = key.value();
            if !key.starts_with(&prefix) {
                break;
            }
            if let Some(name) = decode_index_key(key, collection)? {
                names.push(name);
            }
        }

        Ok(names)
    }

    fn create_index(&self, collection: &str, spec: &IndexSpec) -> Result<(), StoreError> {
        let key = encode_index_key(collection, &spec.name)?;
        let encoded = spec.encode()?;

        let txn = self.db.begin_write().map_err(backend)?;
        let exists = {
            let mut catalog = txn.open_table(INDEX_CATALOG).map_err(backend)?;
            if catalog.get(key.as_slice()).map_err(backend)?.is_some() {
                true
            } else {
                catalog
                    .insert(key.as_slice(), encoded.as_slice())
                    .map_err(backend)?;
                false
            }
        };

        if exists {
            txn.abort().map_err(backend)?;
            return Err(StoreError::IndexExists {
                collection: collection.to_string(),
                index: spec.name.clone(),
            });
        }

        txn.commit().map_err(backend)?;
        Ok(())
    }
}
