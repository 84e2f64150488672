//! # memkvexec
//!
//! Elastic thread pool executing opaque units of work.
//!
//! ## Architecture
//! - **Queue**: bounded FIFO of boxed closures
//! - **Workers**: between `low_watermark` and `high_watermark` OS threads
//! - **Growth**: a submission that outruns the live workers spawns one more
//! - **Shrink**: idle workers above the floor retire after `idle_timeout`
//! - **Shutdown**: `stop` drains queued work, optionally blocking until done
//!
//! A task that panics aborts the whole process.

#![warn(missing_docs)]

mod config;
mod error;
mod executor;

pub use config::ExecutorConfig;
pub use error::{ExecutorError, Result};
pub use executor::{Executor, State};
