//! Sharded cache: N thread-safe LRUs, one lock each

use ahash::RandomState;
use std::hash::BuildHasher;
use tracing::debug;

use crate::error::{Result, StorageError};
use crate::stats::StatsSnapshot;
use crate::thread_safe::ThreadSafeLru;
use crate::Storage;

/// Smallest byte budget a shard may be given
pub const MIN_SHARD_BYTES: usize = 1024;

/// Settings for [`StripedLru`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// Total bytes, split evenly across shards
    pub memory_limit: usize,
    /// Number of independently locked shards
    pub shard_count: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            memory_limit: 4 * 1024,
            shard_count: 4,
        }
    }
}

/// Keyspace partitioned over independently locked [`ThreadSafeLru`] shards.
///
/// A key always lands on the same shard for the lifetime of the instance.
/// Nothing spans two shards.
pub struct StripedLru {
    shards: Vec<ThreadSafeLru>,
    hasher: RandomState,
}

impl StripedLru {
    /// Split `memory_limit` evenly over `shard_count` shards.
    ///
    /// # Errors
    /// * [`StorageError::NoShards`] if `shard_count` is zero
    /// * [`StorageError::ShardTooSmall`] if a shard would get under [`MIN_SHARD_BYTES`]
    pub fn new(memory_limit: usize, shard_count: usize) -> Result<Self> {
        if shard_count == 0 {
            return Err(StorageError::NoShards);
        }

        let per_shard = memory_limit / shard_count;
        if per_shard < MIN_SHARD_BYTES {
            return Err(StorageError::ShardTooSmall {
                per_shard,
                minimum: MIN_SHARD_BYTES,
            });
        }

        let shards = (0..shard_count)
            .map(|_| ThreadSafeLru::new(per_shard))
            .collect();
        debug!(shard_count, per_shard, "striped cache created");

        Ok(Self {
            shards,
            hasher: RandomState::new(),
        })
    }

    /// Build from a [`StorageConfig`]
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        Self::new(config.memory_limit, config.shard_count)
    }

    /// Number of shards
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Index of the shard owning `key`
    pub fn shard_for(&self, key: &[u8]) -> usize {
        (BuildHasher::hash_one(&self.hasher, key) % self.shards.len() as u64) as usize
    }

    fn shard(&self, key: &[u8]) -> &ThreadSafeLru {
        &self.shards[self.shard_for(key)]
    }
}

impl Storage for StripedLru {
    fn put(&self, key: &[u8], value: &[u8]) -> bool {
        self.shard(key).put(key, value)
    }

    fn put_if_absent(&self, key: &[u8], value: &[u8]) -> bool {
        self.shard(key).put_if_absent(key, value)
    }

    fn set(&self, key: &[u8], value: &[u8]) -> bool {
        self.shard(key).set(key, value)
    }

    fn delete(&self, key: &[u8]) -> bool {
        self.shard(key).delete(key)
    }

    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.shard(key).get(key)
    }

    /// Clears one shard at a time; not atomic across shards.
    fn clear(&self) {
        for shard in &self.shards {
            shard.clear();
        }
    }

    fn len(&self) -> usize {
        self.shards.iter().map(ThreadSafeLru::len).sum()
    }

    fn is_empty(&self) -> bool {
        self.shards.iter().all(ThreadSafeLru::is_empty)
    }

    fn used_bytes(&self) -> usize {
        self.shards.iter().map(ThreadSafeLru::used_bytes).sum()
    }

    fn max_bytes(&self) -> usize {
        self.shards.iter().map(ThreadSafeLru::max_bytes).sum()
    }

    fn stats(&self) -> StatsSnapshot {
        let mut total = StatsSnapshot::default();
        for shard in &self.shards {
            total += shard.stats();
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_rejects_small_shards() {
        assert_eq!(
            StripedLru::new(4 * 1024 - 1, 4).err(),
            Some(StorageError::ShardTooSmall {
                per_shard: 1023,
                minimum: MIN_SHARD_BYTES
            })
        );
        assert_eq!(StripedLru::new(4096, 0).err(), Some(StorageError::NoShards));
        assert!(StripedLru::new(4096, 4).is_ok());
    }

    #[test]
    fn test_default_config() {
        let cache = StripedLru::from_config(&StorageConfig::default()).unwrap();
        assert_eq!(cache.shard_count(), 4);
        assert_eq!(cache.max_bytes(), 4096);
    }

    #[test]
    fn test_routing_is_stable() {
        let cache = StripedLru::new(16 * 1024, 8).unwrap();

        for i in 0..100 {
            let key = format!("key-{}", i);
            let first = cache.shard_for(key.as_bytes());
            for _ in 0..5 {
                assert_eq!(cache.shard_for(key.as_bytes()), first);
            }
            assert!(first < 8);
        }
    }

    #[test]
    fn test_operations_delegate() {
        let cache = StripedLru::new(8 * 1024, 4).unwrap();

        assert!(cache.put(b"a", b"1"));
        assert!(!cache.put_if_absent(b"a", b"2"));
        assert!(!cache.set(b"b", b"2"));
        assert!(cache.set(b"a", b"3"));
        assert_eq!(cache.get(b"a"), Some(b"3".to_vec()));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.used_bytes(), 2);

        assert!(cache.delete(b"a"));
        assert!(!cache.delete(b"a"));
        assert!(cache.is_empty());

        let stats = cache.stats();
        assert_eq!(stats.inserts, 1);
        assert_eq!(stats.updates, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.rejections, 2);
    }

    #[test]
    fn test_shards_have_independent_budgets() {
        let cache = StripedLru::new(4 * 1024, 4).unwrap();

        for i in 0..2000 {
            let key = format!("k{}", i);
            cache.put(key.as_bytes(), b"0123456789");
        }
        for shard in &cache.shards {
            assert!(shard.used_bytes() <= 1024);
            shard.check_invariants();
        }
    }

    #[test]
    fn test_concurrent_shards() {
        let cache = Arc::new(StripedLru::new(64 * 1024, 8).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..500 {
                        let key = format!("{}:{}", t, i);
                        assert!(cache.put(key.as_bytes(), b"v"));
                        assert_eq!(cache.get(key.as_bytes()), Some(b"v".to_vec()));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(cache.used_bytes() <= cache.max_bytes());
    }
}
