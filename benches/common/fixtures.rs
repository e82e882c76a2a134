use dao_cache::{MemoryStorage, StorageBackend, UserBasic};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

fn bench_user(n: usize) -> UserBasic {
    UserBasic {
        identity: format!("user-{}", n),
        name: format!("User {}", n),
        email: format!("user{}@example.com", n),
        ..Default::default()
    }
}

/// Storage holding `rows` users with ids `1..=rows`.
pub async fn seeded_storage(rows: usize, latency_ms: u64) -> Arc<MemoryStorage<UserBasic>> {
    let storage = MemoryStorage::new().with_latency(Duration::from_millis(latency_ms));
    for n in 0..rows {
        storage
            .insert(&bench_user(n))
            .await
            .expect("seeding in-memory storage");
    }
    Arc::new(storage)
}

/// Id workloads over a table of `rows` rows.
pub struct IdGenerator {
    rows: u64,
}

impl IdGenerator {
    pub fn new(rows: usize) -> Self {
        Self { rows: rows as u64 }
    }

    /// Every stored id once.
    pub fn sequential(&self) -> Vec<u64> {
        (1..=self.rows).collect()
    }

    /// Ids that were never stored.
    pub fn absent(&self, count: usize) -> Vec<u64> {
        (1..=count as u64).map(|n| self.rows + n).collect()
    }

    /// Random ids, `hit_ratio` of them from the first fifth of the table.
    pub fn mixed(&self, count: usize, hit_ratio: f64) -> Vec<u64> {
        let mut rng = rand::thread_rng();
        let hot = (self.rows / 5).max(1);
        (0..count)
            .map(|_| {
                if rng.gen_bool(hit_ratio) {
                    rng.gen_range(1..=hot)
                } else {
                    rng.gen_range(1..=self.rows)
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    #[tokio::test]
    async fn test_seeded_storage() {
        use super::seeded_storage;
        use dao_cache::StorageBackend;

        let storage = seeded_storage(10, 0).await;
        let user = storage.find_by_id(1).await.unwrap();
        assert_eq!(user.unwrap().name, "User 0");
        assert_eq!(storage.read_count(), 1);
    }

    #[test]
    fn test_id_generator() {
        use super::IdGenerator;

        let ids = IdGenerator::new(100);
        assert_eq!(ids.sequential().len(), 100);
        assert_eq!(ids.absent(3), vec![101, 102, 103]);

        let mixed = ids.mixed(50, 0.8);
        assert_eq!(mixed.len(), 50);
        assert!(mixed.iter().all(|id| (1..=100).contains(id)));
    }
}
