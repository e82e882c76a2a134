//! Integration tests for the cached repository over in-memory storage.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dao_cache::{
    CacheError, CacheMetric, CacheSettings, Column, Conditions, HashMapStore,
    HashMapStoreConfig, MemoryStorage, MetricsSink, MetricsStore, MokaStore, MokaStoreConfig,
    Operator, Params, ReadOutcome, RepoError, Repository, RepositoryPool, Store, StoredEntry,
    UserBasic,
};

type Users = Repository<UserBasic, MemoryStorage<UserBasic>>;

// ============================================================================
// Helper Functions
// ============================================================================

fn user(name: &str) -> UserBasic {
    UserBasic {
        identity: format!("uid-{}", name),
        name: name.to_string(),
        password: "secret".to_string(),
        email: format!("{}@example.com", name),
        ..Default::default()
    }
}

fn hashmap_store() -> Arc<dyn Store> {
    Arc::new(HashMapStore::new(HashMapStoreConfig::default()))
}

fn cached_users(storage: MemoryStorage<UserBasic>) -> Users {
    Repository::new(Arc::new(storage), Some(hashmap_store()))
}

async fn seed(repo: &Users, names: &[&str]) -> Vec<u64> {
    let mut ids = Vec::new();
    for name in names {
        let mut record = user(name);
        repo.create(&mut record).await.unwrap();
        ids.push(record.model.id);
    }
    ids
}

/// A store whose every operation fails.
struct BrokenStore;

#[async_trait]
impl Store for BrokenStore {
    fn name(&self) -> &'static str {
        "broken"
    }

    async fn get(&self, _namespace: &str, key: &str) -> Result<Option<StoredEntry>, CacheError> {
        Err(CacheError::operation("broken", key, "connection refused"))
    }

    async fn set(&self, _namespace: &str, key: &str, _entry: StoredEntry) -> Result<(), CacheError> {
        Err(CacheError::operation("broken", key, "connection refused"))
    }

    async fn remove(&self, _namespace: &str, _keys: &[&str]) -> Result<(), CacheError> {
        Err(CacheError::operation("broken", "", "connection refused"))
    }
}

// ============================================================================
// Read Path
// ============================================================================

#[tokio::test]
async fn test_cache_hit_skips_storage() {
    let repo = cached_users(MemoryStorage::new());
    let ids = seed(&repo, &["alice"]).await;

    let first = repo.get_by_id(ids[0]).await.unwrap();
    assert_eq!(repo.storage().read_count(), 1);

    for _ in 0..5 {
        let cached = repo.get_by_id(ids[0]).await.unwrap();
        assert_eq!(cached, first);
    }
    assert_eq!(repo.storage().read_count(), 1);

    let stored = repo.storage().raw(ids[0]).await.unwrap();
    assert_eq!(first, stored);
}

#[tokio::test]
async fn test_concurrent_misses_share_one_fetch() {
    let repo = cached_users(MemoryStorage::new().with_latency(Duration::from_millis(50)));
    let ids = seed(&repo, &["alice"]).await;

    let mut handles = Vec::new();
    for _ in 0..32 {
        let repo = repo.clone();
        let id = ids[0];
        handles.push(tokio::spawn(async move { repo.get_by_id(id).await }));
    }

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(repo.storage().read_count(), 1);
    assert!(results.iter().all(|r| *r == results[0]));
    assert_eq!(results[0].name, "alice");
}

#[tokio::test]
async fn test_concurrent_misses_for_absent_id_share_one_error() {
    let repo = cached_users(MemoryStorage::new().with_latency(Duration::from_millis(50)));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let repo = repo.clone();
        handles.push(tokio::spawn(async move { repo.get_by_id(404).await }));
    }

    for handle in handles {
        assert!(handle.await.unwrap().unwrap_err().is_not_found());
    }
    assert_eq!(repo.storage().read_count(), 1);
}

#[tokio::test]
async fn test_placeholder_stops_repeated_lookups() {
    let repo = cached_users(MemoryStorage::new());

    assert!(repo.get_by_id(999).await.unwrap_err().is_not_found());
    assert_eq!(repo.storage().read_count(), 1);

    let cache = repo.cache().unwrap();
    assert!(cache.get(999).await.unwrap_err().is_placeholder());

    for _ in 0..3 {
        assert!(repo.get_by_id(999).await.unwrap_err().is_not_found());
    }
    assert_eq!(repo.storage().read_count(), 1);
}

#[tokio::test]
async fn test_placeholder_expires() {
    let settings = CacheSettings {
        placeholder_ttl: Duration::from_millis(30),
        ..CacheSettings::for_entity::<UserBasic>()
    };
    let repo: Users = Repository::with_settings(
        Arc::new(MemoryStorage::new()),
        Some(hashmap_store()),
        settings,
    );

    assert!(repo.get_by_id(5).await.unwrap_err().is_not_found());
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(repo.get_by_id(5).await.unwrap_err().is_not_found());

    assert_eq!(repo.storage().read_count(), 2);
}

#[tokio::test]
async fn test_storage_error_propagates_and_leaves_cache_alone() {
    let repo = cached_users(MemoryStorage::new());
    let ids = seed(&repo, &["alice"]).await;

    repo.storage().set_failing(true);
    let err = repo.get_by_id(ids[0]).await.unwrap_err();
    assert!(matches!(err, RepoError::Storage(_)));
    assert!(repo.cache().unwrap().get(ids[0]).await.unwrap().is_none());

    // Not a placeholder either: the next read goes back to storage.
    repo.storage().set_failing(false);
    assert_eq!(repo.get_by_id(ids[0]).await.unwrap().name, "alice");
}

#[tokio::test]
async fn test_cancelled_read_leaves_no_placeholder_or_stuck_waiter() {
    let repo = cached_users(MemoryStorage::new().with_latency(Duration::from_millis(200)));

    let timed_out = tokio::time::timeout(Duration::from_millis(20), repo.get_by_id(77)).await;
    assert!(timed_out.is_err());

    assert!(repo.cache().unwrap().get(77).await.unwrap().is_none());

    let result = tokio::time::timeout(Duration::from_secs(2), repo.get_by_id(77))
        .await
        .expect("second read must not wait on the abandoned fetch");
    assert!(result.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_broken_cache_falls_back_to_storage() {
    let repo: Users = Repository::new(Arc::new(MemoryStorage::new()), Some(Arc::new(BrokenStore)));

    let mut alice = user("alice");
    repo.create(&mut alice).await.unwrap();

    assert_eq!(repo.get_by_id(alice.model.id).await.unwrap().name, "alice");
    assert_eq!(repo.get_by_id(alice.model.id).await.unwrap().name, "alice");
    assert_eq!(repo.storage().read_count(), 2);

    let patch = UserBasic {
        model: alice.model.clone(),
        name: "alicia".into(),
        ..Default::default()
    };
    repo.update_by_id(&patch).await.unwrap();
    repo.delete_by_id(alice.model.id).await.unwrap();

    let found = repo.get_by_ids(&[alice.model.id]).await.unwrap();
    assert!(found.is_empty());
}

#[tokio::test]
async fn test_no_cache_reads_storage_every_time() {
    let repo: Users = Repository::new(Arc::new(MemoryStorage::new()), None);
    let ids = seed(&repo, &["alice", "bob"]).await;

    repo.get_by_id(ids[0]).await.unwrap();
    repo.get_by_id(ids[0]).await.unwrap();
    assert!(repo.get_by_id(999).await.unwrap_err().is_not_found());
    assert_eq!(repo.storage().read_count(), 3);

    let found = repo.get_by_ids(&[ids[0], ids[1], 999]).await.unwrap();
    assert_eq!(found.len(), 2);
    assert_eq!(found[&ids[1]].name, "bob");
}

#[tokio::test]
async fn test_works_over_moka() {
    let store: Arc<dyn Store> = Arc::new(MokaStore::new(MokaStoreConfig::default()));
    let repo: Users = Repository::new(Arc::new(MemoryStorage::new()), Some(store));
    let ids = seed(&repo, &["alice"]).await;

    repo.get_by_id(ids[0]).await.unwrap();
    repo.get_by_id(ids[0]).await.unwrap();
    assert!(repo.get_by_id(500).await.unwrap_err().is_not_found());
    assert!(repo.get_by_id(500).await.unwrap_err().is_not_found());

    assert_eq!(repo.storage().read_count(), 2);
}

#[derive(Default)]
struct RecordingSink {
    metrics: std::sync::Mutex<Vec<CacheMetric>>,
}

#[async_trait]
impl MetricsSink for RecordingSink {
    fn emit(&self, metric: CacheMetric) {
        self.metrics.lock().unwrap().push(metric);
    }

    async fn flush(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }
}

#[tokio::test]
async fn test_metrics_store_reports_placeholder_reads() {
    let sink = Arc::new(RecordingSink::default());
    let store: Arc<dyn Store> = Arc::new(MetricsStore::new(hashmap_store(), sink.clone()));
    let repo: Users = Repository::new(Arc::new(MemoryStorage::new()), Some(store));
    let ids = seed(&repo, &["alice"]).await;

    repo.get_by_id(ids[0]).await.unwrap();
    repo.get_by_id(ids[0]).await.unwrap();
    repo.get_by_id(500).await.unwrap_err();
    repo.get_by_id(500).await.unwrap_err();

    let metrics = sink.metrics.lock().unwrap().clone();
    let reads: Vec<ReadOutcome> = metrics
        .iter()
        .filter_map(|m| match m {
            CacheMetric::Read { outcome, .. } => Some(*outcome),
            _ => None,
        })
        .collect();
    assert_eq!(
        reads,
        vec![
            ReadOutcome::Miss,
            ReadOutcome::Hit,
            ReadOutcome::Miss,
            ReadOutcome::Placeholder
        ]
    );

    let placeholders: usize = metrics
        .iter()
        .filter_map(|m| match m {
            CacheMetric::Write { placeholders, .. } => Some(*placeholders),
            _ => None,
        })
        .sum();
    assert_eq!(placeholders, 1);
    assert!(metrics.iter().any(|m| matches!(m, CacheMetric::Remove { .. })));
}

#[tokio::test]
async fn test_expired_placeholders_do_not_accumulate() {
    let store = Arc::new(HashMapStore::new(HashMapStoreConfig::default()));
    let settings = CacheSettings {
        placeholder_ttl: Duration::from_millis(20),
        ..CacheSettings::for_entity::<UserBasic>()
    };
    let repo: Users = Repository::with_settings(
        Arc::new(MemoryStorage::new()),
        Some(store.clone() as Arc<dyn Store>),
        settings,
    );

    for id in 1..=5_000 {
        assert!(repo.get_by_id(id).await.unwrap_err().is_not_found());
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    for id in 5_001..=7_000 {
        assert!(repo.get_by_id(id).await.unwrap_err().is_not_found());
    }

    assert!(store.len().await <= 2_000);
}

// ============================================================================
// Batch Reads
// ============================================================================

#[tokio::test]
async fn test_get_by_ids_reconciles_partial_hits() {
    let repo = cached_users(MemoryStorage::new());
    let ids = seed(&repo, &["a", "c"]).await;
    let (a, c) = (ids[0], ids[1]);
    let b = 999;

    repo.get_by_id(a).await.unwrap();
    assert!(repo.get_by_id(b).await.unwrap_err().is_not_found());
    let reads_before = repo.storage().read_count();

    let found = repo.get_by_ids(&[a, b, c]).await.unwrap();

    let mut keys: Vec<u64> = found.keys().copied().collect();
    keys.sort();
    assert_eq!(keys, vec![a, c]);
    assert_eq!(found[&c].name, "c");

    assert_eq!(repo.storage().read_count(), reads_before + 1);
    assert_eq!(repo.storage().id_lookups().await.last(), Some(&vec![c]));

    // c is now cached: a second batch needs no storage at all.
    repo.get_by_ids(&[a, b, c]).await.unwrap();
    assert_eq!(repo.storage().read_count(), reads_before + 1);
}

#[tokio::test]
async fn test_get_by_ids_placeholders_confirmed_absent() {
    let repo = cached_users(MemoryStorage::new());
    let ids = seed(&repo, &["a"]).await;

    let found = repo.get_by_ids(&[ids[0], 500, 501]).await.unwrap();
    assert_eq!(found.len(), 1);

    let cache = repo.cache().unwrap();
    assert!(cache.get(500).await.unwrap_err().is_placeholder());
    assert!(cache.get(501).await.unwrap_err().is_placeholder());
    assert!(repo.get_by_id(500).await.unwrap_err().is_not_found());
    assert_eq!(repo.storage().read_count(), 1);
}

#[tokio::test]
async fn test_get_by_ids_empty_and_duplicates() {
    let repo = cached_users(MemoryStorage::new());
    let ids = seed(&repo, &["a"]).await;

    assert!(repo.get_by_ids(&[]).await.unwrap().is_empty());
    assert_eq!(repo.storage().read_count(), 0);

    let found = repo.get_by_ids(&[ids[0], ids[0]]).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(repo.storage().id_lookups().await, vec![vec![ids[0]]]);
}

#[tokio::test]
async fn test_get_by_ids_refetches_only_corrupt_entry() {
    let store = hashmap_store();
    let repo: Users = Repository::new(Arc::new(MemoryStorage::new()), Some(store.clone()));
    let ids = seed(&repo, &["alice", "bob", "carol"]).await;
    repo.get_by_ids(&ids).await.unwrap();

    store
        .set(
            "userBasic",
            &ids[1].to_string(),
            StoredEntry::present("not json".into(), i64::MAX),
        )
        .await
        .unwrap();

    let found = repo.get_by_ids(&ids).await.unwrap();
    assert_eq!(found.len(), 3);
    assert_eq!(found[&ids[1]].name, "bob");
    assert_eq!(
        repo.storage().id_lookups().await,
        vec![ids.clone(), vec![ids[1]]]
    );
}

// ============================================================================
// Write Path
// ============================================================================

#[tokio::test]
async fn test_update_with_zero_id_touches_nothing() {
    let store = Arc::new(HashMapStore::new(HashMapStoreConfig::default()));
    let repo: Users = Repository::new(
        Arc::new(MemoryStorage::new()),
        Some(store.clone() as Arc<dyn Store>),
    );

    let err = repo.update_by_id(&user("nobody")).await.unwrap_err();
    assert!(err.is_validation());
    assert_eq!(repo.storage().read_count(), 0);
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_create_read_update_read() {
    let repo = cached_users(MemoryStorage::new());

    let mut record = user("alice");
    repo.create(&mut record).await.unwrap();
    assert_eq!(record.model.id, 1);

    let read = repo.get_by_id(1).await.unwrap();
    assert_eq!(read.name, "alice");

    let mut patch = UserBasic {
        name: "x".into(),
        ..Default::default()
    };
    patch.model.id = 1;
    repo.update_by_id(&patch).await.unwrap();

    let read = repo.get_by_id(1).await.unwrap();
    assert_eq!(read.name, "x");
    // Sparse patch: untouched fields survive.
    assert_eq!(read.email, "alice@example.com");
    assert!(read.model.updated_at >= read.model.created_at);
}

#[tokio::test]
async fn test_create_clears_stale_placeholder() {
    let repo = cached_users(MemoryStorage::new());

    assert!(repo.get_by_id(1).await.unwrap_err().is_not_found());

    let mut record = user("late");
    repo.create(&mut record).await.unwrap();
    assert_eq!(record.model.id, 1);

    assert_eq!(repo.get_by_id(1).await.unwrap().name, "late");
}

#[tokio::test]
async fn test_delete_invalidates() {
    let repo = cached_users(MemoryStorage::new());
    let ids = seed(&repo, &["a", "b", "c"]).await;

    for id in &ids {
        repo.get_by_id(*id).await.unwrap();
    }

    repo.delete_by_id(ids[0]).await.unwrap();
    assert!(repo.get_by_id(ids[0]).await.unwrap_err().is_not_found());
    assert!(repo.storage().raw(ids[0]).await.unwrap().model.is_deleted());

    repo.delete_by_ids(&ids[1..]).await.unwrap();
    let found = repo.get_by_ids(&ids).await.unwrap();
    assert!(found.is_empty());
}

#[tokio::test]
async fn test_transactional_variants_invalidate() {
    let repo = cached_users(MemoryStorage::new());
    let ids = seed(&repo, &["a", "b"]).await;
    repo.get_by_id(ids[0]).await.unwrap();
    repo.get_by_id(ids[1]).await.unwrap();

    let mut tx = repo.begin().await.unwrap();
    let mut created = user("c");
    let new_id = repo.create_by_tx(&mut tx, &mut created).await.unwrap();
    assert_eq!(created.model.id, new_id);

    let mut patch = UserBasic {
        name: "a2".into(),
        ..Default::default()
    };
    patch.model.id = ids[0];
    repo.update_by_tx(&mut tx, &patch).await.unwrap();
    repo.delete_by_tx(&mut tx, ids[1]).await.unwrap();

    // Invalidated before commit.
    let cache = repo.cache().unwrap();
    assert!(cache.get(ids[0]).await.unwrap().is_none());
    assert!(cache.get(ids[1]).await.unwrap().is_none());

    repo.commit(tx).await.unwrap();

    assert_eq!(repo.get_by_id(ids[0]).await.unwrap().name, "a2");
    assert!(repo.get_by_id(ids[1]).await.unwrap_err().is_not_found());
    assert_eq!(repo.get_by_id(new_id).await.unwrap().name, "c");
}

#[tokio::test]
async fn test_rollback_after_invalidation_reads_storage_state() {
    let repo = cached_users(MemoryStorage::new());
    let ids = seed(&repo, &["a"]).await;
    repo.get_by_id(ids[0]).await.unwrap();

    let mut tx = repo.begin().await.unwrap();
    let mut patch = UserBasic {
        name: "never".into(),
        ..Default::default()
    };
    patch.model.id = ids[0];
    repo.update_by_tx(&mut tx, &patch).await.unwrap();
    repo.rollback(tx).await.unwrap();

    let reads_before = repo.storage().read_count();
    assert_eq!(repo.get_by_id(ids[0]).await.unwrap().name, "a");
    assert_eq!(repo.storage().read_count(), reads_before + 1);
}

// ============================================================================
// Queries
// ============================================================================

async fn seeded_pool() -> Repository<RepositoryPool, MemoryStorage<RepositoryPool>> {
    let repo = Repository::new(Arc::new(MemoryStorage::new()), Some(hashmap_store()));
    for (name, size) in [("a.txt", 10), ("b.png", 20), ("c.txt", 30), ("d.txt", 40)] {
        let mut file = RepositoryPool {
            identity: format!("pool-{}", name),
            hash: format!("hash-{}", name),
            name: name.to_string(),
            ext: name.rsplit('.').next().unwrap_or_default().to_string(),
            size,
            path: format!("/pool/{}", name),
            ..Default::default()
        };
        repo.create(&mut file).await.unwrap();
    }
    repo
}

#[tokio::test]
async fn test_get_by_columns_pages_and_counts() {
    let repo = seeded_pool().await;

    let params = Params::new(0, 2)
        .sort("-size")
        .column(Column::new("ext", "txt"));
    let (records, total) = repo.get_by_columns(&params).await.unwrap();

    assert_eq!(total, 3);
    let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["d.txt", "c.txt"]);

    let params = Params::new(1, 2)
        .sort("-size")
        .column(Column::new("ext", "txt"));
    let (records, _) = repo.get_by_columns(&params).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].name, "a.txt");
}

#[tokio::test]
async fn test_get_by_columns_skip_count_and_empty() {
    let repo = seeded_pool().await;

    let params = Params::new(0, 10)
        .column(Column::new("size", 20i64).op(Operator::Gte))
        .skip_count();
    let (records, total) = repo.get_by_columns(&params).await.unwrap();
    assert_eq!(total, 0);
    assert_eq!(records.len(), 3);
    assert_eq!(repo.storage().read_count(), 1);

    let params = Params::new(0, 10).column(Column::new("name", "missing"));
    let (records, total) = repo.get_by_columns(&params).await.unwrap();
    assert_eq!(total, 0);
    assert!(records.is_empty());
    // Count only; the page query is skipped.
    assert_eq!(repo.storage().read_count(), 2);
}

#[tokio::test]
async fn test_unknown_columns_are_validation_errors() {
    let repo = seeded_pool().await;

    let params = Params::new(0, 10).column(Column::new("password", "x"));
    assert!(repo.get_by_columns(&params).await.unwrap_err().is_validation());

    let params = Params::new(0, 10).sort("-owner");
    assert!(repo.get_by_columns(&params).await.unwrap_err().is_validation());

    assert!(
        repo.get_by_last_id(10, 5, "evil; DROP TABLE")
            .await
            .unwrap_err()
            .is_validation()
    );
    assert_eq!(repo.storage().read_count(), 0);
}

#[tokio::test]
async fn test_get_by_condition() {
    let repo = seeded_pool().await;

    let found = repo
        .get_by_condition(&Conditions::new(vec![
            Column::new("ext", "txt"),
            Column::new("size", 25i64).op(Operator::Gt),
        ]))
        .await
        .unwrap();
    assert_eq!(found.name, "c.txt");

    let err = repo
        .get_by_condition(&Conditions::new(vec![Column::new("hash", "nope")]))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_get_by_last_id() {
    let repo = seeded_pool().await;

    let records = repo.get_by_last_id(4, 2, "-id").await.unwrap();
    let ids: Vec<u64> = records.iter().map(|r| r.model.id).collect();
    assert_eq!(ids, vec![3, 2]);

    let records = repo.get_by_last_id(3, 10, "size").await.unwrap();
    let sizes: Vec<i64> = records.iter().map(|r| r.size).collect();
    assert_eq!(sizes, vec![10, 20]);

    assert!(repo.get_by_last_id(1, 10, "").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_queries_skip_soft_deleted_rows() {
    let repo = seeded_pool().await;
    repo.delete_by_id(4).await.unwrap();

    let (records, total) = repo.get_by_columns(&Params::new(0, 10)).await.unwrap();
    assert_eq!(total, 3);
    let names: HashMap<u64, String> = records.into_iter().map(|r| (r.model.id, r.name)).collect();
    assert!(!names.contains_key(&4));

    let err = repo
        .get_by_condition(&Conditions::new(vec![Column::new("name", "d.txt")]))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}
