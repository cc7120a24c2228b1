//! WebSocket reply schemas for the progress ingress channel.
//!
//! These shapes maintain compatibility with the existing storefront clients.

use serde::{Deserialize, Serialize};

/// Outbound reply to a client event.
///
/// Untagged on the wire: acks serialize as `{"queued":true}`, failures as
/// `{"message":"..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WsReply {
    /// Event accepted and queued for persistence
    Queued { queued: bool },
    /// Validation or enqueue failure, local to this event
    Error { message: String },
}

impl WsReply {
    /// Acknowledge a queued event.
    pub fn queued() -> Self {
        Self::Queued { queued: true }
    }

    /// Report a failure to the originating client.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Serialize for the socket. Replies are infallible to encode.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"message":"internal error"}"#.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_wire_shape() {
        assert_eq!(WsReply::queued().to_json(), r#"{"queued":true}"#);
    }

    #[test]
    fn error_wire_shape() {
        assert_eq!(
            WsReply::error("userId is required").to_json(),
            r#"{"message":"userId is required"}"#
        );
    }
}
