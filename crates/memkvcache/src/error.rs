//! Error types for memkvcache

use thiserror::Error;

/// Result type alias for cache construction
pub type Result<T> = std::result::Result<T, StorageError>;

/// Configuration errors reported when building a cache.
///
/// Steady-state operations never return these; they answer with booleans.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Shard count of zero
    #[error("shard count must be at least 1")]
    NoShards,

    /// Per-shard budget below the usable minimum
    #[error("cache size of each shard is too small: {per_shard} bytes (min {minimum})")]
    ShardTooSmall {
        /// Bytes each shard would get
        per_shard: usize,
        /// Smallest accepted shard budget
        minimum: usize,
    },
}
