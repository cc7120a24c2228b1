//! HTTP request handlers.

pub mod admin;
pub mod health;
pub mod progress;

pub use health::{health, ready};
