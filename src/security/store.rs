//! Shared rate counter store.
//!
//! The limiter only needs two operations from a store: an atomic
//! increment-and-get that attaches a TTL when it creates the key, and a plain
//! read. Anything offering those can back the limiter; redis is the shared
//! deployment choice, the in-memory store serves single instances and tests.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

/// Errors surfaced by a counter store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or rejected the command.
    #[error("counter store unavailable: {0}")]
    Unavailable(String),

    /// The store did not answer within the configured deadline.
    #[error("counter store timed out after {0:?}")]
    Timeout(Duration),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Atomic counter store with per-key expiry.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment `key` and return the new value.
    ///
    /// When the increment creates the key (result == 1) the store attaches
    /// `ttl` to it. Later increments never extend the TTL.
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, StoreError>;

    /// Current value of `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<u64>, StoreError>;

    /// Whether the store drops expired keys on its own.
    fn native_ttl(&self) -> bool {
        true
    }

    /// Remove expired keys. Returns how many were dropped.
    async fn sweep_expired(&self) -> Result<usize, StoreError> {
        Ok(0)
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    count: u64,
    expires_at: Instant,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Process-local counter store.
///
/// Expiry is enforced lazily on access; stale keys stay in memory until
/// [`CounterStore::sweep_expired`] runs.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    slots: DashMap<String, Slot>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently held, expired ones included.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let now = Instant::now();
        // The entry guard holds the shard lock, so the read-modify-write is atomic.
        let mut slot = self.slots.entry(key.to_string()).or_insert(Slot {
            count: 0,
            expires_at: now + ttl,
        });
        if slot.is_expired(now) {
            *slot = Slot {
                count: 0,
                expires_at: now + ttl,
            };
        }
        slot.count += 1;
        Ok(slot.count)
    }

    async fn get(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let now = Instant::now();
        Ok(self
            .slots
            .get(key)
            .filter(|slot| !slot.is_expired(now))
            .map(|slot| slot.count))
    }

    fn native_ttl(&self) -> bool {
        false
    }

    async fn sweep_expired(&self) -> Result<usize, StoreError> {
        let now = Instant::now();
        let before = self.slots.len();
        self.slots.retain(|_, slot| !slot.is_expired(now));
        Ok(before.saturating_sub(self.slots.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn increments_and_reads() {
        let store = MemoryCounterStore::new();
        let ttl = Duration::from_secs(60);

        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.increment("k", ttl).await.unwrap(), 1);
        assert_eq!(store.increment("k", ttl).await.unwrap(), 2);
        assert_eq!(store.get("k").await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn expired_key_restarts_at_one() {
        let store = MemoryCounterStore::new();
        let ttl = Duration::from_millis(20);

        store.increment("k", ttl).await.unwrap();
        store.increment("k", ttl).await.unwrap();
        std::thread::sleep(Duration::from_millis(30));

        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.increment("k", ttl).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn sweep_drops_only_expired() {
        let store = MemoryCounterStore::new();
        store.increment("short", Duration::from_millis(10)).await.unwrap();
        store.increment("long", Duration::from_secs(60)).await.unwrap();
        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(store.sweep_expired().await.unwrap(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("long").await.unwrap(), Some(1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_are_not_lost() {
        let store = Arc::new(MemoryCounterStore::new());
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..250 {
                    store.increment("hot", Duration::from_secs(60)).await.unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(store.get("hot").await.unwrap(), Some(2000));
    }
}
