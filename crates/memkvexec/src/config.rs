//! Executor configuration

use std::time::Duration;

use crate::error::{ExecutorError, Result};

/// Sizing and timing for an [`Executor`](crate::Executor)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Workers kept alive while running
    pub low_watermark: usize,
    /// Most workers the pool may grow to
    pub high_watermark: usize,
    /// Queued, not yet running tasks before `submit` is refused
    pub max_queue_size: usize,
    /// How long a worker above the floor idles before retiring
    pub idle_timeout: Duration,
    /// Prefix for worker thread names
    pub thread_name: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            low_watermark: 1,
            high_watermark: 16,
            max_queue_size: 128,
            idle_timeout: Duration::from_secs(5),
            thread_name: "memkv-worker".to_string(),
        }
    }
}

impl ExecutorConfig {
    /// Check the watermarks and queue bound
    pub fn validate(&self) -> Result<()> {
        if self.high_watermark == 0 {
            return Err(ExecutorError::NoWorkers);
        }
        if self.low_watermark > self.high_watermark {
            return Err(ExecutorError::InvalidWatermarks {
                low: self.low_watermark,
                high: self.high_watermark,
            });
        }
        if self.max_queue_size == 0 {
            return Err(ExecutorError::NoQueue);
        }
        Ok(())
    }
}
