//! Watch-progress persistence worker.
//!
//! Consumes due tasks from the coalescing delay queue and upserts the
//! durable record, with bounded-backoff retries and dead-letter routing.

pub mod config;
pub mod error;
pub mod flusher;
pub mod retry;
pub mod store;

pub use config::FlusherConfig;
pub use error::{WorkerError, WorkerResult};
pub use flusher::ProgressFlusher;
pub use store::{ProgressStore, StoreError};
