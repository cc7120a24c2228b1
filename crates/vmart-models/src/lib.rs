//! Shared data models for the VidMart backend.
//!
//! This crate provides Serde-serializable types for:
//! - Watch-progress events and durable records
//! - Video/user identifiers and the composite progress key
//! - WebSocket reply schemas for the progress ingress channel

pub mod ids;
pub mod progress;
pub mod ws;

// Re-export common types
pub use ids::{UserId, VideoId};
pub use progress::{ProgressEvent, ProgressKey, ProgressRecord, RejectionReason, ValidatedEvent};
pub use ws::WsReply;
