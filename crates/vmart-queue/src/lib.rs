//! Coalescing delay queue for watch-progress persistence.
//!
//! This crate provides:
//! - A key-addressable, time-delayed task queue with at most one pending
//!   task per `(video, user)` key
//! - Debounce/throttle coalescing policies
//! - The dead-letter list for tasks that exhausted their retries

pub mod config;
pub mod dead_letter;
pub mod error;
pub mod queue;

pub use config::{CoalescePolicy, QueueConfig};
pub use dead_letter::{DeadLetter, DeadLetterList};
pub use error::{QueueError, QueueResult};
pub use queue::{CoalescingDelayQueue, DueTask, EnqueueOutcome};
