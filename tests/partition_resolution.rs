//! Integration tests for partition resolution against a redb-backed registry.

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use redb::Database;
    use redb_event_partitions::encoding::EncodingError;
    use redb_event_partitions::indexes::{
        REGISTRY_NAME_INDEX, SNAPSHOT_STATE_INDEX, STATE_MSG_ID_INDEX, STATE_VERSION_INDEX,
    };
    use redb_event_partitions::store::{IndexSpec, REGISTRY_COLLECTION};
    use redb_event_partitions::{
        Error, PartitionCatalog, PartitionDescriptor, PartitionError, PartitionStore, RedbStore,
        ShardingConfig, StoreError, StreamConfig, StreamPartitions,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use tempfile::NamedTempFile;

    fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn order_stream() -> StreamConfig {
        StreamConfig::new("Order", ShardingConfig::new(true, 90, epoch()).unwrap()).unwrap()
    }

    fn open_db() -> (NamedTempFile, Arc<Database>) {
        let temp_file = NamedTempFile::new().unwrap();
        let db = Database::create(temp_file.path()).unwrap();
        (temp_file, Arc::new(db))
    }

    fn versions(partitions: &[PartitionDescriptor]) -> Vec<u64> {
        partitions.iter().map(|d| d.version).collect()
    }

    fn sorted(mut names: Vec<String>) -> Vec<String> {
        names.sort();
        names
    }

    /// Counts store calls and can inject insert and index failures.
    struct CountingStore {
        inner: RedbStore,
        finds: AtomicUsize,
        inserts: AtomicUsize,
        fail_inserts: Option<fn(&PartitionDescriptor) -> StoreError>,
        index_failures: AtomicUsize,
    }

    impl CountingStore {
        fn new(inner: RedbStore) -> Self {
            Self {
                inner,
                finds: AtomicUsize::new(0),
                inserts: AtomicUsize::new(0),
                fail_inserts: None,
                index_failures: AtomicUsize::new(0),
            }
        }

        /// Fails the next `count` index creations.
        fn failing_indexes(inner: RedbStore, count: usize) -> Self {
            Self {
                index_failures: AtomicUsize::new(count),
                ..Self::new(inner)
            }
        }

        fn failing(inner: RedbStore, fail: fn(&PartitionDescriptor) -> StoreError) -> Self {
            Self {
                fail_inserts: Some(fail),
                ..Self::new(inner)
            }
        }

        fn finds(&self) -> usize {
            self.finds.load(Ordering::SeqCst)
        }

        fn inserts(&self) -> usize {
            self.inserts.load(Ordering::SeqCst)
        }
    }

    impl PartitionStore for CountingStore {
        fn find_partitions(
            &self,
            stream_type: &str,
        ) -> Result<Vec<PartitionDescriptor>, StoreError> {
            self.finds.fetch_add(1, Ordering::SeqCst);
            self.inner.find_partitions(stream_type)
        }

        fn insert_partition(&self, descriptor: &PartitionDescriptor) -> Result<(), StoreError> {
            self.inserts.fetch_add(1, Ordering::SeqCst);
            if let Some(fail) = self.fail_inserts {
                return Err(fail(descriptor));
            }
            self.inner.insert_partition(descriptor)
        }

        fn list_indexes(&self, collection: &str) -> Result<Vec<String>, StoreError> {
            self.inner.list_indexes(collection)
        }

        fn create_index(&self, collection: &str, spec: &IndexSpec) -> Result<(), StoreError> {
            let remaining = self
                .index_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
            if remaining.is_ok() {
                return Err(StoreError::Corrupt(EncodingError::InvalidValueEncoding(
                    "index write failed".to_string(),
                )));
            }
            self.inner.create_index(collection, spec)
        }
    }

    #[test]
    fn test_quarterly_buckets() {
        let (_file, db) = open_db();
        let catalog = PartitionCatalog::new(Arc::new(RedbStore::new(db)));
        let order = order_stream();

        let first = catalog
            .resolve(&order, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
            .unwrap();
        assert_eq!(first.version, 0);
        assert_eq!(first.name, "OrderEvent_0");
        assert_eq!(first.stream_type, "OrderEvent");

        let second = catalog
            .resolve(&order, Utc.with_ymd_and_hms(2024, 4, 5, 0, 0, 0).unwrap())
            .unwrap();
        assert_eq!(second.version, 1);
        assert_eq!(second.name, "OrderEvent_1");

        let from_start = catalog
            .resolve_at_or_after(&order, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
            .unwrap();
        assert_eq!(from_start, vec![first, second.clone()]);

        let from_may = catalog
            .resolve_at_or_after(&order, Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap())
            .unwrap();
        assert_eq!(from_may, vec![second]);
    }

    #[test]
    fn test_same_bucket_resolves_to_same_partition() {
        let (_file, db) = open_db();
        let catalog = PartitionCatalog::new(Arc::new(RedbStore::new(db)));
        let order = order_stream();

        let first = catalog.resolve(&order, epoch() + Duration::days(95)).unwrap();
        for offset in [90, 100, 150, 179] {
            let again = catalog
                .resolve(&order, epoch() + Duration::days(offset))
                .unwrap();
            assert_eq!(again, first);
        }
    }

    #[test]
    fn test_versions_are_monotonic() {
        let (_file, db) = open_db();
        let catalog = PartitionCatalog::new(Arc::new(RedbStore::new(db)));
        let order = order_stream();

        let later = catalog.resolve(&order, epoch() + Duration::days(400)).unwrap();
        assert_eq!(later.version, 4);

        // Older events land in the current partition; nothing is created
        // behind the head.
        let older = catalog.resolve(&order, epoch() + Duration::days(10)).unwrap();
        assert_eq!(older, later);

        let newest = catalog.resolve(&order, epoch() + Duration::days(800)).unwrap();
        assert_eq!(newest.version, 8);

        let all = catalog.resolve_at_or_after(&order, epoch()).unwrap();
        assert_eq!(versions(&all), vec![4, 8]);
        assert!(all.contains(&later));
    }

    #[test]
    fn test_resolve_at_or_after_edges() {
        let (_file, db) = open_db();
        let catalog = PartitionCatalog::new(Arc::new(RedbStore::new(db)));
        let order = order_stream();

        // Nothing exists yet, and a read never creates.
        assert!(catalog.resolve_at_or_after(&order, epoch()).unwrap().is_empty());

        catalog.resolve(&order, epoch() + Duration::days(200)).unwrap();
        catalog.resolve(&order, epoch() + Duration::days(500)).unwrap();

        // Reference bucket predates every partition.
        let before = catalog.resolve_at_or_after(&order, epoch()).unwrap();
        assert_eq!(versions(&before), vec![2, 5]);

        // Reference bucket between partitions anchors on the older one.
        let between = catalog
            .resolve_at_or_after(&order, epoch() + Duration::days(400))
            .unwrap();
        assert_eq!(versions(&between), vec![2, 5]);

        // Reference bucket beyond the head yields just the head.
        let beyond = catalog
            .resolve_at_or_after(&order, epoch() + Duration::days(2000))
            .unwrap();
        assert_eq!(versions(&beyond), vec![5]);
    }

    #[test]
    fn test_disabled_sharding_uses_single_partition() {
        let (_file, db) = open_db();
        let catalog = PartitionCatalog::new(Arc::new(RedbStore::new(db)));
        let audit = StreamConfig::new("Audit", ShardingConfig::disabled(epoch())).unwrap();

        let first = catalog.resolve(&audit, epoch()).unwrap();
        assert_eq!(first.version, 0);
        assert_eq!(first.name, "AuditEvent_0");

        for days in [1, 365, 10_000] {
            let again = catalog.resolve(&audit, epoch() + Duration::days(days)).unwrap();
            assert_eq!(again, first);
        }
        assert_eq!(
            catalog.resolve_at_or_after(&audit, epoch() + Duration::days(5000)).unwrap(),
            vec![first]
        );
    }

    #[test]
    fn test_partitions_without_reference_creates_current() {
        let (_file, db) = open_db();
        let store = Arc::new(RedbStore::new(db));
        let stream = StreamPartitions::new(Arc::clone(&store), order_stream()).unwrap();

        let created = stream.partitions(None).unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(
            created[0].version,
            order_stream().sharding().version_for(Utc::now())
        );

        // Second call lists instead of creating.
        assert_eq!(stream.partitions(None).unwrap(), created);
        assert_eq!(store.find_partitions("OrderEvent").unwrap(), created);
        assert_eq!(stream.current().unwrap(), Some(created[0].clone()));
    }

    #[test]
    fn test_registration_and_creation_declare_indexes() {
        let (_file, db) = open_db();
        let store = Arc::new(RedbStore::new(db));
        let catalog = PartitionCatalog::new(Arc::clone(&store));
        let order = order_stream();

        catalog.stream(&order).unwrap();
        assert_eq!(
            store.list_indexes(REGISTRY_COLLECTION).unwrap(),
            vec![REGISTRY_NAME_INDEX.to_string()]
        );
        assert_eq!(
            store.list_indexes("OrderState").unwrap(),
            vec![SNAPSHOT_STATE_INDEX.to_string()]
        );

        let partition = catalog.resolve(&order, epoch() + Duration::days(91)).unwrap();
        assert_eq!(
            sorted(store.list_indexes(&partition.name).unwrap()),
            vec![STATE_MSG_ID_INDEX.to_string(), STATE_VERSION_INDEX.to_string()]
        );

        // Re-running assurance leaves exactly the same two indexes.
        let stream = catalog.stream(&order).unwrap();
        stream.ensure_partition_indexes(&partition.name).unwrap();
        stream.ensure_partition_indexes(&partition.name).unwrap();
        assert_eq!(store.list_indexes(&partition.name).unwrap().len(), 2);
    }

    #[test]
    fn test_config_mismatch_rejected() {
        let (_file, db) = open_db();
        let catalog = PartitionCatalog::new(Arc::new(RedbStore::new(db)));
        catalog.stream(&order_stream()).unwrap();

        let narrower =
            StreamConfig::new("Order", ShardingConfig::new(true, 30, epoch()).unwrap()).unwrap();
        match catalog.resolve(&narrower, epoch()) {
            Err(Error::Partition(PartitionError::ConfigMismatch { stream })) => {
                assert_eq!(stream, "Order");
            }
            other => panic!("unexpected result: {other:?}"),
        }

        let other_stream =
            StreamConfig::new("Invoice", ShardingConfig::new(true, 30, epoch()).unwrap()).unwrap();
        catalog.stream(&other_stream).unwrap();
        assert_eq!(catalog.stream_types(), vec!["InvoiceEvent", "OrderEvent"]);
    }

    #[test]
    fn test_concurrent_threads_create_one_partition() {
        let (_file, db) = open_db();
        let store = Arc::new(RedbStore::new(db));
        let catalog = Arc::new(PartitionCatalog::new(Arc::clone(&store)));
        let order = order_stream();
        let threads = 16;
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|i| {
                let catalog = Arc::clone(&catalog);
                let barrier = Arc::clone(&barrier);
                let order = order.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    catalog
                        .resolve(&order, epoch() + Duration::days(270 + i as i64))
                        .unwrap()
                })
            })
            .collect();
        let results: Vec<PartitionDescriptor> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        let stored = store.find_partitions("OrderEvent").unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].version, 3);
        for result in &results {
            assert_eq!(result, &stored[0]);
        }
    }

    #[test]
    fn test_cache_fill_queries_store_once() {
        let (_file, db) = open_db();
        let store = Arc::new(CountingStore::new(RedbStore::new(db)));
        let stream = Arc::new(StreamPartitions::new(Arc::clone(&store), order_stream()).unwrap());
        stream.resolve(epoch()).unwrap();
        stream.cache().invalidate();
        let finds_before = store.finds();

        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));
        std::thread::scope(|scope| {
            for _ in 0..threads {
                let stream = Arc::clone(&stream);
                let barrier = Arc::clone(&barrier);
                scope.spawn(move || {
                    barrier.wait();
                    stream.resolve(epoch() + Duration::days(1)).unwrap();
                });
            }
        });

        assert_eq!(store.finds() - finds_before, 1);
    }

    #[test]
    fn test_competing_catalogs_converge_through_conflict() {
        let (_file, db) = open_db();
        let store_a = Arc::new(RedbStore::new(Arc::clone(&db)));
        let store_b = Arc::new(CountingStore::new(RedbStore::new(db)));
        let catalog_a = PartitionCatalog::new(Arc::clone(&store_a));
        let catalog_b = PartitionCatalog::new(Arc::clone(&store_b));
        let order = order_stream();

        // B caches a registry holding only version 0.
        let v0 = catalog_b.resolve(&order, epoch()).unwrap();
        assert_eq!(catalog_a.resolve(&order, epoch()).unwrap(), v0);

        // A creates version 1 behind B's back.
        let v1 = catalog_a.resolve(&order, epoch() + Duration::days(100)).unwrap();

        // B's stale cache makes it try to create version 1 as well; it loses
        // the race, reloads, and adopts A's descriptor.
        let inserts_before = store_b.inserts();
        let seen_by_b = catalog_b.resolve(&order, epoch() + Duration::days(120)).unwrap();
        assert_eq!(seen_by_b, v1);
        assert_eq!(store_b.inserts() - inserts_before, 1);

        assert_eq!(
            versions(&store_a.find_partitions("OrderEvent").unwrap()),
            vec![0, 1]
        );
        assert_eq!(
            catalog_b.resolve_at_or_after(&order, epoch()).unwrap(),
            vec![v0, v1]
        );
    }

    #[test]
    fn test_concurrent_catalogs_agree() {
        let (_file, db) = open_db();
        let catalogs: Vec<_> = (0..4)
            .map(|_| Arc::new(PartitionCatalog::new(Arc::new(RedbStore::new(Arc::clone(&db))))))
            .collect();
        let order = order_stream();
        for catalog in &catalogs {
            catalog.resolve(&order, epoch()).unwrap();
        }

        let barrier = Arc::new(Barrier::new(catalogs.len() * 4));
        let results: Vec<PartitionDescriptor> = std::thread::scope(|scope| {
            let handles: Vec<_> = catalogs
                .iter()
                .flat_map(|catalog| std::iter::repeat(catalog).take(4))
                .map(|catalog| {
                    let barrier = Arc::clone(&barrier);
                    let order = order.clone();
                    scope.spawn(move || {
                        barrier.wait();
                        catalog.resolve(&order, epoch() + Duration::days(185)).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let store = RedbStore::new(db);
        let stored = store.find_partitions("OrderEvent").unwrap();
        assert_eq!(versions(&stored), vec![0, 2]);
        for result in &results {
            assert_eq!(result, &stored[1]);
        }
    }

    #[test]
    fn test_persistent_conflict_is_bounded() {
        let (_file, db) = open_db();
        let store = Arc::new(CountingStore::failing(RedbStore::new(db), |descriptor| {
            StoreError::UniquenessConflict {
                collection: REGISTRY_COLLECTION.to_string(),
                name: descriptor.name.clone(),
            }
        }));
        let config = order_stream().with_max_conflict_retries(2);
        let stream = StreamPartitions::new(Arc::clone(&store), config).unwrap();

        match stream.resolve(epoch()) {
            Err(Error::Partition(PartitionError::ConflictRetriesExhausted { name, attempts })) => {
                assert_eq!(name, "OrderEvent_0");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(store.inserts(), 3);
    }

    #[test]
    fn test_store_failure_propagates_without_caching() {
        let (_file, db) = open_db();
        let store = Arc::new(CountingStore::failing(RedbStore::new(db), |_| {
            StoreError::Corrupt(EncodingError::InvalidValueEncoding("disk on fire".to_string()))
        }));
        let stream = StreamPartitions::new(Arc::clone(&store), order_stream()).unwrap();

        let err = stream.resolve(epoch()).unwrap_err();
        assert!(matches!(err, Error::Store(StoreError::Corrupt(_))));
        assert!(!err.is_conflict());
        assert_eq!(stream.current().unwrap(), None);
        assert_eq!(store.inserts(), 1);
    }

    #[test]
    fn test_failed_index_creation_retried_on_next_resolve() {
        let (_file, db) = open_db();
        let store = Arc::new(CountingStore::failing_indexes(RedbStore::new(db), 1));
        let stream = StreamPartitions::new(Arc::clone(&store), order_stream()).unwrap();

        let err = stream.resolve(epoch()).unwrap_err();
        assert!(matches!(err, Error::Store(StoreError::Corrupt(_))));

        // The partition was committed, so it is not created again.
        let partition = stream.resolve(epoch()).unwrap();
        assert_eq!(partition.name, "OrderEvent_0");
        assert_eq!(store.inserts(), 1);
        assert_eq!(
            sorted(store.list_indexes(&partition.name).unwrap()),
            vec![STATE_MSG_ID_INDEX.to_string(), STATE_VERSION_INDEX.to_string()]
        );
    }

    #[test]
    fn test_adopted_partition_gets_indexes() {
        let (_file, db) = open_db();
        let raw = RedbStore::new(Arc::clone(&db));

        // A writer that registered the partition but never declared its indexes.
        let orphan = PartitionDescriptor::new("OrderEvent", 0);
        raw.insert_partition(&orphan).unwrap();
        assert!(raw.list_indexes(&orphan.name).unwrap().is_empty());

        let catalog = PartitionCatalog::new(Arc::new(RedbStore::new(db)));
        let resolved = catalog.resolve(&order_stream(), epoch()).unwrap();
        assert_eq!(resolved, orphan);
        assert_eq!(
            sorted(raw.list_indexes(&orphan.name).unwrap()),
            vec![STATE_MSG_ID_INDEX.to_string(), STATE_VERSION_INDEX.to_string()]
        );
    }
}
