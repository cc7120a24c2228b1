//! Firestore REST API client for the VidMart document store.
//!
//! Production-grade client with:
//! - Token caching with refresh margin
//! - Exponential backoff with jitter
//! - Observability (tracing spans, metrics)
//! - The typed watch-progress repository (upsert/get)

pub mod client;
pub mod error;
pub mod metrics;
pub mod progress_repo;
pub mod retry;
pub mod token_cache;
pub mod types;

pub use client::{FirestoreClient, FirestoreConfig};
pub use error::{FirestoreError, FirestoreResult};
pub use progress_repo::WatchProgressRepository;
pub use retry::{with_retry, RetryConfig};
pub use token_cache::TokenCache;
pub use types::{Document, FromFirestoreValue, ToFirestoreValue, Value};
