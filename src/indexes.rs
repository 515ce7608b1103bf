//! Idempotent index assurance.
//!
//! Declares the uniqueness indexes each collection needs before it takes
//! writes: the registry, a stream's snapshot collection, and every event
//! partition. Each call lists the collection's indexes first and only creates
//! the missing ones; losing a creation race to another writer counts as done.

use crate::store::{IndexSpec, PartitionStore, StoreError, REGISTRY_COLLECTION};
use crate::Result;
use std::sync::Arc;
use tracing::{debug, info};

/// Unique index on partition names in the registry.
pub const REGISTRY_NAME_INDEX: &str = "name";
/// Unique index on state identity in a snapshot collection.
pub const SNAPSHOT_STATE_INDEX: &str = "state";
/// Unique index on (state identity, sequence version) in an event partition.
pub const STATE_VERSION_INDEX: &str = "state_version";
/// Unique index on (state identity, type code, message id) in an event partition.
pub const STATE_MSG_ID_INDEX: &str = "state_msg_id";

/// Indexes on the partition registry.
pub fn registry_indexes() -> Vec<IndexSpec> {
    vec![IndexSpec::unique(REGISTRY_NAME_INDEX).ascending("name")]
}

/// Indexes on a stream's snapshot collection.
pub fn snapshot_indexes() -> Vec<IndexSpec> {
    vec![IndexSpec::unique(SNAPSHOT_STATE_INDEX).ascending("state_id")]
}

/// Indexes every event partition carries.
///
/// `state_version` stops two events from claiming the same position in a
/// state's history; `state_msg_id` rejects redelivery of the same message.
pub fn partition_indexes() -> Vec<IndexSpec> {
    vec![
        IndexSpec::unique(STATE_VERSION_INDEX)
            .ascending("state_id")
            .ascending("version"),
        IndexSpec::unique(STATE_MSG_ID_INDEX)
            .ascending("state_id")
            .ascending("type_code")
            .ascending("msg_id"),
    ]
}

/// Creates the indexes a collection is missing.
pub struct IndexAssurance<S> {
    store: Arc<S>,
}

impl<S: PartitionStore> IndexAssurance<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Ensures the registry's unique `name` index.
    pub fn ensure_registry_index(&self) -> Result<()> {
        self.ensure(REGISTRY_COLLECTION, &registry_indexes())
    }

    /// Ensures the unique `state` index on a snapshot collection.
    pub fn ensure_snapshot_index(&self, collection: &str) -> Result<()> {
        self.ensure(collection, &snapshot_indexes())
    }

    /// Ensures both uniqueness indexes on an event partition.
    pub fn ensure_partition_indexes(&self, partition_name: &str) -> Result<()> {
        self.ensure(partition_name, &partition_indexes())
    }

    fn ensure(&self, collection: &str, specs: &[IndexSpec]) -> Result<()> {
        let existing = self.store.list_indexes(collection)?;

        for spec in specs {
            if existing.iter().any(|name| name == &spec.name) {
                debug!(collection, index = %spec.name, "index already present");
                continue;
            }

            match self.store.create_index(collection, spec) {
                Ok(()) => {
                    info!(collection, index = %spec.name, fields = ?spec.field_names(), "created index");
                }
                Err(StoreError::IndexExists { .. }) => {
                    debug!(collection, index = %spec.name, "index created concurrently");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RedbStore;
    use tempfile::NamedTempFile;

    fn assurance() -> (NamedTempFile, Arc<RedbStore>, IndexAssurance<RedbStore>) {
        let temp_file = NamedTempFile::new().unwrap();
        let store = Arc::new(RedbStore::create(temp_file.path()).unwrap());
        let indexes = IndexAssurance::new(Arc::clone(&store));
        (temp_file, store, indexes)
    }

    fn sorted(mut names: Vec<String>) -> Vec<String> {
        names.sort();
        names
    }

    #[test]
    fn test_partition_indexes_idempotent() {
        let (_file, store, indexes) = assurance();

        indexes.ensure_partition_indexes("OrderEvent_0").unwrap();
        indexes.ensure_partition_indexes("OrderEvent_0").unwrap();

        assert_eq!(
            sorted(store.list_indexes("OrderEvent_0").unwrap()),
            vec![STATE_MSG_ID_INDEX.to_string(), STATE_VERSION_INDEX.to_string()]
        );
        let spec = store
            .index_spec("OrderEvent_0", STATE_MSG_ID_INDEX)
            .unwrap()
            .unwrap();
        assert!(spec.unique);
        assert_eq!(spec.field_names(), vec!["state_id", "type_code", "msg_id"]);
    }

    #[test]
    fn test_partition_indexes_fill_in_missing() {
        let (_file, store, indexes) = assurance();
        let specs = partition_indexes();
        store.create_index("OrderEvent_2", &specs[1]).unwrap();

        indexes.ensure_partition_indexes("OrderEvent_2").unwrap();

        assert_eq!(store.list_indexes("OrderEvent_2").unwrap().len(), 2);
    }

    #[test]
    fn test_registry_and_snapshot_indexes() {
        let (_file, store, indexes) = assurance();

        indexes.ensure_registry_index().unwrap();
        indexes.ensure_snapshot_index("OrderState").unwrap();
        indexes.ensure_registry_index().unwrap();
        indexes.ensure_snapshot_index("OrderState").unwrap();

        assert_eq!(
            store.list_indexes(REGISTRY_COLLECTION).unwrap(),
            vec![REGISTRY_NAME_INDEX.to_string()]
        );
        assert_eq!(
            store.list_indexes("OrderState").unwrap(),
            vec![SNAPSHOT_STATE_INDEX.to_string()]
        );
    }

    #[test]
    fn test_concurrent_assurance() {
        let (_file, store, _) = assurance();

        std::thread::scope(|scope| {
            for _ in 0..8 {
                let store = Arc::clone(&store);
                scope.spawn(move || {
                    IndexAssurance::new(store)
                        .ensure_partition_indexes("OrderEvent_5")
                        .unwrap();
                });
            }
        });

        assert_eq!(store.list_indexes("OrderEvent_5").unwrap().len(), 2);
    }
}
