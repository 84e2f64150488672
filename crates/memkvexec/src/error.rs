//! Error types for memkvexec

use thiserror::Error;

/// Result type alias for executor construction
pub type Result<T> = std::result::Result<T, ExecutorError>;

/// Rejected executor configurations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    /// Floor above ceiling
    #[error("low watermark {low} exceeds high watermark {high}")]
    InvalidWatermarks {
        /// Requested floor
        low: usize,
        /// Requested ceiling
        high: usize,
    },

    /// Pool that could never run anything
    #[error("high watermark must be at least 1")]
    NoWorkers,

    /// Queue that could never accept anything
    #[error("max queue size must be at least 1")]
    NoQueue,
}
