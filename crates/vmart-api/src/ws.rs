//! WebSocket ingestion endpoint with backpressure support.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, info, warn};

use vmart_models::{ProgressEvent, RejectionReason, WsReply};
use vmart_queue::{CoalescingDelayQueue, EnqueueOutcome};

use crate::metrics;
use crate::state::AppState;

/// Maximum concurrent WebSocket connections per user.
/// Prevents a single user from consuming too many resources.
const MAX_CONCURRENT_CONNECTIONS_PER_USER: usize = 3;

/// Per-user connection tracking.
pub struct UserConnectionTracker {
    connections: tokio::sync::RwLock<std::collections::HashMap<String, usize>>,
}

impl UserConnectionTracker {
    pub fn new() -> Self {
        Self {
            connections: tokio::sync::RwLock::new(std::collections::HashMap::new()),
        }
    }

    /// Try to acquire a connection slot for a user.
    /// Returns an error message if the user has too many concurrent connections.
    pub async fn try_acquire(&self, user_id: &str) -> Result<(), &'static str> {
        let mut connections = self.connections.write().await;
        let count = connections.entry(user_id.to_string()).or_insert(0);
        if *count >= MAX_CONCURRENT_CONNECTIONS_PER_USER {
            return Err("Too many concurrent connections for this user");
        }
        *count += 1;
        Ok(())
    }

    /// Release a connection slot for a user.
    pub async fn release(&self, user_id: &str) {
        let mut connections = self.connections.write().await;
        if let Some(count) = connections.get_mut(user_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                connections.remove(user_id);
            }
        }
    }
}

impl Default for UserConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Global user connection tracker.
static USER_CONNECTIONS: std::sync::LazyLock<UserConnectionTracker> =
    std::sync::LazyLock::new(UserConnectionTracker::new);

/// Global counter for active WebSocket connections.
static ACTIVE_WS_CONNECTIONS: AtomicI64 = AtomicI64::new(0);

/// Configuration for WebSocket backpressure.
const WS_SEND_BUFFER_SIZE: usize = 32;
const WS_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Send a WebSocket message with backpressure handling.
async fn send_ws_message(tx: &mpsc::Sender<Message>, reply: WsReply) -> bool {
    let json = reply.to_json();
    // Use try_send for non-blocking, fall back to blocking send
    match tx.try_send(Message::Text(json.clone())) {
        Ok(_) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            debug!("WebSocket send buffer full, applying backpressure");
            tx.send(Message::Text(json)).await.is_ok()
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

/// WebSocket progress ingestion endpoint.
pub async fn progress_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let count = ACTIVE_WS_CONNECTIONS.fetch_add(1, Ordering::SeqCst) + 1;
    metrics::set_ws_active_connections(count);
    metrics::record_ws_connection();

    ws.on_upgrade(|socket| async move {
        handle_progress_socket(socket, state).await;
        let count = ACTIVE_WS_CONNECTIONS.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_ws_active_connections(count);
    })
}

/// Handle a progress WebSocket connection.
///
/// Every text frame is an independent progress event: parse, validate,
/// enqueue, acknowledge. A rejected frame only fails that frame; the
/// connection stays open.
async fn handle_progress_socket(socket: WebSocket, state: AppState) {
    let (ws_sender, mut receiver) = socket.split();

    // Bounded channel so a slow client cannot pile up replies
    let (tx, mut rx) = mpsc::channel::<Message>(WS_SEND_BUFFER_SIZE);

    let send_task = tokio::spawn(async move {
        let mut ws_sender = ws_sender;
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    // The user is only known once a frame validates; the slot is held
    // until disconnect.
    let mut tracked_user: Option<String> = None;
    let mut heartbeat = interval(WS_HEARTBEAT_INTERVAL);
    heartbeat.tick().await; // first tick fires immediately

    loop {
        tokio::select! {
            frame = receiver.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        metrics::record_ws_message_received();
                        let (reply, close) =
                            handle_frame(&state.queue, &USER_CONNECTIONS, &mut tracked_user, &text)
                                .await;
                        let sent = send_ws_message(&tx, reply).await;
                        if close || !sent {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        send_ws_message(&tx, WsReply::error("Expected a JSON text frame")).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Client closed connection");
                        break;
                    }
                    Some(Ok(_)) => {} // Ping/Pong handled by axum
                    Some(Err(e)) => {
                        debug!("WebSocket receive error: {}", e);
                        break;
                    }
                }
            }
            _ = heartbeat.tick() => {
                if tx.send(Message::Ping(vec![])).await.is_err() {
                    warn!("Heartbeat failed, client disconnected");
                    break;
                }
            }
        }
    }

    if let Some(uid) = tracked_user {
        USER_CONNECTIONS.release(&uid).await;
        info!(user = %uid, "WebSocket progress session ended");
    }

    drop(tx);
    let _ = send_task.await;
}

/// Process one text frame: parse, validate, bind the connection's user,
/// enqueue.
///
/// The first valid frame takes a per-user connection slot before anything
/// is enqueued, so an over-cap connection never gets an event into the
/// queue. Returns the reply for the client and whether the connection
/// should be closed.
async fn handle_frame(
    queue: &CoalescingDelayQueue,
    tracker: &UserConnectionTracker,
    tracked_user: &mut Option<String>,
    text: &str,
) -> (WsReply, bool) {
    metrics::record_event_received();

    let event: ProgressEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            metrics::record_event_rejected("malformed");
            return (WsReply::error(format!("Invalid request: {}", e)), false);
        }
    };

    let validated = match event.validate() {
        Ok(v) => v,
        Err(reason) => {
            metrics::record_event_rejected(rejection_label(&reason));
            return (WsReply::error(reason.to_string()), false);
        }
    };

    if tracked_user.is_none() {
        if let Err(msg) = tracker.try_acquire(validated.user_id.as_str()).await {
            warn!(user = %validated.user_id, "WebSocket connection limit hit");
            return (WsReply::error(msg), true);
        }
        *tracked_user = Some(validated.user_id.as_str().to_string());
    }

    match queue.enqueue(validated).await {
        Ok(outcome) => {
            metrics::record_event_queued(outcome_label(&outcome));
            metrics::set_queue_depth(queue.len().await as u64);
            (WsReply::queued(), false)
        }
        Err(e) => {
            warn!("Failed to enqueue progress event: {}", e);
            (WsReply::error("Service is shutting down"), false)
        }
    }
}

fn rejection_label(reason: &RejectionReason) -> &'static str {
    match reason {
        RejectionReason::MissingVideoId => "missing_video_id",
        RejectionReason::MissingUserId => "missing_user_id",
        RejectionReason::MissingCurrentTime => "missing_current_time",
        RejectionReason::InvalidCurrentTime(_) => "invalid_current_time",
    }
}

fn outcome_label(outcome: &EnqueueOutcome) -> &'static str {
    match outcome {
        EnqueueOutcome::Created => "created",
        EnqueueOutcome::Coalesced => "coalesced",
        EnqueueOutcome::Parked => "parked",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmart_queue::QueueConfig;

    fn test_queue() -> CoalescingDelayQueue {
        CoalescingDelayQueue::new(QueueConfig::default())
    }

    #[tokio::test]
    async fn valid_frame_is_queued_and_acknowledged() {
        let queue = test_queue();
        let tracker = UserConnectionTracker::new();
        let mut user = None;
        let frame = r#"{"videoId":"vid-1","userId":"u1","currentTime":12.5}"#;

        let (reply, close) = handle_frame(&queue, &tracker, &mut user, frame).await;

        assert_eq!(reply.to_json(), r#"{"queued":true}"#);
        assert!(!close);
        assert_eq!(user.as_deref(), Some("u1"));
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn rejected_event_never_enqueued() {
        let queue = test_queue();
        let tracker = UserConnectionTracker::new();
        let mut user = None;
        let frame = r#"{"videoId":"vid-1","currentTime":12.5}"#;

        let (reply, close) = handle_frame(&queue, &tracker, &mut user, frame).await;

        assert!(reply.to_json().contains("userId is required"));
        assert!(!close);
        assert_eq!(user, None);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn malformed_json_is_rejected() {
        let queue = test_queue();
        let tracker = UserConnectionTracker::new();
        let mut user = None;

        let (reply, close) = handle_frame(&queue, &tracker, &mut user, "not json").await;

        assert!(reply.to_json().contains("Invalid request"));
        assert!(!close);
        assert_eq!(user, None);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn negative_current_time_is_rejected() {
        let queue = test_queue();
        let tracker = UserConnectionTracker::new();
        let mut user = None;
        let frame = r#"{"videoId":"vid-1","userId":"u1","currentTime":-3.0}"#;

        let (reply, _) = handle_frame(&queue, &tracker, &mut user, frame).await;

        assert!(reply.to_json().contains("currentTime"));
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn over_cap_connection_never_enqueues() {
        let queue = test_queue();
        let tracker = UserConnectionTracker::new();
        for _ in 0..MAX_CONCURRENT_CONNECTIONS_PER_USER {
            tracker.try_acquire("u1").await.unwrap();
        }

        let mut user = None;
        let frame = r#"{"videoId":"vid-1","userId":"u1","currentTime":5.0}"#;
        let (reply, close) = handle_frame(&queue, &tracker, &mut user, frame).await;

        assert!(reply.to_json().contains("Too many concurrent connections"));
        assert!(close);
        assert_eq!(user, None);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn tracker_caps_concurrent_connections_per_user() {
        let tracker = UserConnectionTracker::new();
        for _ in 0..MAX_CONCURRENT_CONNECTIONS_PER_USER {
            assert!(tracker.try_acquire("u1").await.is_ok());
        }
        assert!(tracker.try_acquire("u1").await.is_err());
        assert!(tracker.try_acquire("u2").await.is_ok());

        tracker.release("u1").await;
        assert!(tracker.try_acquire("u1").await.is_ok());
    }
}
