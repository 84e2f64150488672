//! # memkvcache
//!
//! Bounded-memory LRU storage for memkv.
//!
//! ## Architecture
//! - **SimpleLru**: arena-backed doubly-linked list plus AHash index, one byte budget
//! - **ThreadSafeLru**: one `parking_lot::Mutex` around a `SimpleLru`
//! - **StripedLru**: N independently locked shards, keys routed by hash
//!
//! Budgets count `key.len() + value.len()` per entry and nothing else.

#![warn(missing_docs)]

mod error;
mod lru;
mod stats;
mod striped;
mod thread_safe;


pub use error::{Result, StorageError};
pub use lru::SimpleLru;
pub use stats::{CacheStats, StatsSnapshot};
pub use striped::{StorageConfig, StripedLru, MIN_SHARD_BYTES};
pub use thread_safe::ThreadSafeLru;

/// Key-value operations shared by every synchronized cache in this crate.
///
/// All methods report policy outcomes as booleans; a `false` is never an error.
pub trait Storage: Send + Sync {
    /// Insert or overwrite `key`. Fails only if the entry can never fit.
    fn put(&self, key: &[u8], value: &[u8]) -> bool;

    /// Insert `key` only if it is not already present.
    fn put_if_absent(&self, key: &[u8], value: &[u8]) -> bool;

    /// Overwrite `key` only if it is already present.
    fn set(&self, key: &[u8], value: &[u8]) -> bool;

    /// Remove `key`, returning whether it was present.
    fn delete(&self, key: &[u8]) -> bool;

    /// Copy out the value of `key` and mark it most recently used.
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /// Drop every entry
    fn clear(&self);

    /// Number of entries
    fn len(&self) -> usize;

    /// Check if the storage holds nothing
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes currently charged against the budget
    fn used_bytes(&self) -> usize;

    /// Total byte budget
    fn max_bytes(&self) -> usize;

    /// Counter snapshot
    fn stats(&self) -> StatsSnapshot;
}
