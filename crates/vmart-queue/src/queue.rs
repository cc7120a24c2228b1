//! The coalescing delay queue.
//!
//! Key-addressable, time-delayed task queue: enqueuing under a key that
//! already has a pending task replaces that task's payload in place instead
//! of queuing a duplicate, so at most one task per `(video, user)` key is
//! ever pending. Tasks become due `flush_delay` after the window-opening
//! enqueue (throttle) or after the last enqueue (debounce).

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, info};

use vmart_models::{ProgressKey, ValidatedEvent};

use crate::config::{CoalescePolicy, QueueConfig};
use crate::error::{QueueError, QueueResult};

/// What happened to an enqueued event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// No task existed for the key; a new one was created
    Created,
    /// A pending task existed; its payload was replaced in place
    Coalesced,
    /// The key's task is firing; the payload was parked and will re-arm
    /// a fresh task once the in-flight one completes
    Parked,
}

/// A task handed to the persistence worker. The key stays reserved (state
/// `firing`) until [`CoalescingDelayQueue::complete`] is called for it.
#[derive(Debug, Clone)]
pub struct DueTask {
    pub key: ProgressKey,
    pub payload: ValidatedEvent,
}

/// Per-key slot in the index.
enum KeySlot {
    /// Waiting for its delay window to elapse
    Pending {
        payload: ValidatedEvent,
        seq: u64,
    },
    /// Handed to a worker; a payload arriving now is parked, not dropped
    Firing { parked: Option<ValidatedEvent> },
}

/// Time-ordered heap entry. Entries are invalidated lazily: an entry is live
/// only while the key's slot is pending with a matching sequence number.
struct HeapEntry {
    fire_at: Instant,
    seq: u64,
    key: ProgressKey,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at && self.seq == other.seq
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.fire_at
            .cmp(&other.fire_at)
            .then(self.seq.cmp(&other.seq))
    }
}

struct QueueInner {
    tasks: HashMap<ProgressKey, KeySlot>,
    heap: BinaryHeap<Reverse<HeapEntry>>,
    next_seq: u64,
    closed: bool,
}

/// Coalescing delay queue.
///
/// All mutation goes through one mutex; [`Self::next_due`] is intended for a
/// single consumer loop that dispatches tasks to workers (workers for
/// different keys may then run concurrently).
pub struct CoalescingDelayQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    config: QueueConfig,
}

impl CoalescingDelayQueue {
    /// Create a new queue.
    pub fn new(config: QueueConfig) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                tasks: HashMap::new(),
                heap: BinaryHeap::new(),
                next_seq: 0,
                closed: false,
            }),
            notify: Notify::new(),
            config,
        }
    }

    /// Create from environment variables.
    pub fn from_env() -> Self {
        Self::new(QueueConfig::from_env())
    }

    /// The configured coalescing window.
    pub fn flush_delay(&self) -> std::time::Duration {
        self.config.flush_delay
    }

    /// Enqueue an event under its `(video, user)` key.
    ///
    /// Fails with [`QueueError::Closed`] once shutdown has begun.
    pub async fn enqueue(&self, event: ValidatedEvent) -> QueueResult<EnqueueOutcome> {
        let key = event.key();
        let mut inner = self.inner.lock().await;

        if inner.closed {
            return Err(QueueError::Closed);
        }

        let outcome = match inner.tasks.get(&key) {
            None => {
                inner.next_seq += 1;
                let seq = inner.next_seq;
                let fire_at = Instant::now() + self.config.flush_delay;
                inner.tasks.insert(
                    key.clone(),
                    KeySlot::Pending {
                        payload: event,
                        seq,
                    },
                );
                inner.heap.push(Reverse(HeapEntry {
                    fire_at,
                    seq,
                    key: key.clone(),
                }));
                EnqueueOutcome::Created
            }
            Some(KeySlot::Pending { .. }) => {
                let debounce = self.config.policy == CoalescePolicy::Debounce;
                let new_seq = if debounce {
                    // Restart the window: new sequence number, old heap
                    // entry goes stale and is pruned lazily.
                    inner.next_seq += 1;
                    Some(inner.next_seq)
                } else {
                    None
                };
                if let Some(KeySlot::Pending { payload, seq }) = inner.tasks.get_mut(&key) {
                    *payload = event;
                    if let Some(new_seq) = new_seq {
                        *seq = new_seq;
                    }
                }
                if let Some(new_seq) = new_seq {
                    inner.heap.push(Reverse(HeapEntry {
                        fire_at: Instant::now() + self.config.flush_delay,
                        seq: new_seq,
                        key: key.clone(),
                    }));
                }
                EnqueueOutcome::Coalesced
            }
            Some(KeySlot::Firing { .. }) => {
                // Latest parked payload wins; the in-flight task proceeds.
                if let Some(KeySlot::Firing { parked }) = inner.tasks.get_mut(&key) {
                    *parked = Some(event);
                }
                EnqueueOutcome::Parked
            }
        };

        drop(inner);
        self.notify.notify_one();

        debug!(key = %key, ?outcome, "enqueued progress event");
        Ok(outcome)
    }

    /// Remove a pending task for `key`. No-op (returns false) when the key
    /// has no task or its task is already firing.
    pub async fn cancel(&self, key: &ProgressKey) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.tasks.get(key) {
            Some(KeySlot::Pending { .. }) => {
                // The heap entry goes stale and is pruned lazily.
                inner.tasks.remove(key);
                debug!(key = %key, "cancelled pending task");
                true
            }
            _ => false,
        }
    }

    /// Wait for the next due task and hand it out, transitioning the key to
    /// `firing`. Returns `None` once the queue is closed and fully drained.
    ///
    /// Never returns a task before its fire time, with one exception: after
    /// [`Self::close`], remaining pending tasks are drained immediately so
    /// their final positions are persisted on shutdown.
    pub async fn next_due(&self) -> Option<DueTask> {
        loop {
            let mut next_deadline: Option<Instant> = None;
            {
                let mut inner = self.inner.lock().await;
                let now = Instant::now();

                while let Some(Reverse(top)) = inner.heap.peek() {
                    let live = matches!(
                        inner.tasks.get(&top.key),
                        Some(KeySlot::Pending { seq, .. }) if *seq == top.seq
                    );
                    if !live {
                        inner.heap.pop();
                        continue;
                    }
                    if inner.closed || top.fire_at <= now {
                        let key = top.key.clone();
                        inner.heap.pop();
                        if let Some(KeySlot::Pending { payload, .. }) = inner
                            .tasks
                            .insert(key.clone(), KeySlot::Firing { parked: None })
                        {
                            debug!(key = %key, "task due, handing to worker");
                            return Some(DueTask { key, payload });
                        }
                    } else {
                        next_deadline = Some(top.fire_at);
                    }
                    break;
                }

                if inner.closed && next_deadline.is_none() {
                    // Closed with no live pending tasks left.
                    return None;
                }
            }

            match next_deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(deadline) => {}
                        _ = self.notify.notified() => {}
                    }
                }
                None => self.notify.notified().await,
            }
        }
    }

    /// Retire a firing task, freeing its key. A payload parked while the
    /// task was in flight re-arms a fresh pending task for the key.
    pub async fn complete(&self, key: &ProgressKey) {
        let mut inner = self.inner.lock().await;
        match inner.tasks.remove(key) {
            Some(KeySlot::Firing { parked: Some(event) }) => {
                inner.next_seq += 1;
                let seq = inner.next_seq;
                let fire_at = Instant::now() + self.config.flush_delay;
                inner.tasks.insert(
                    key.clone(),
                    KeySlot::Pending {
                        payload: event,
                        seq,
                    },
                );
                inner.heap.push(Reverse(HeapEntry {
                    fire_at,
                    seq,
                    key: key.clone(),
                }));
                drop(inner);
                self.notify.notify_one();
                debug!(key = %key, "re-armed task from parked payload");
            }
            Some(KeySlot::Firing { parked: None }) => {
                debug!(key = %key, "task completed");
            }
            Some(slot) => {
                // complete() raced with something unexpected; restore.
                inner.tasks.insert(key.clone(), slot);
            }
            None => {}
        }
    }

    /// Number of tasks currently pending or firing.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.tasks.len()
    }

    /// True when no task is pending or firing.
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.tasks.is_empty()
    }

    /// Begin shutdown: further enqueues fail, and remaining pending tasks
    /// become due immediately so the worker can drain them.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        if !inner.closed {
            inner.closed = true;
            info!(remaining = inner.tasks.len(), "queue closed, draining");
        }
        drop(inner);
        self.notify.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use vmart_models::ProgressEvent;

    use super::*;

    fn queue(delay_ms: u64, policy: CoalescePolicy) -> CoalescingDelayQueue {
        CoalescingDelayQueue::new(QueueConfig {
            flush_delay: Duration::from_millis(delay_ms),
            policy,
        })
    }

    fn event(video: &str, user: &str, t: f64) -> ValidatedEvent {
        ProgressEvent::new(video, user, t).validate().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn task_is_not_delivered_before_fire_at() {
        let q = queue(1000, CoalescePolicy::Debounce);
        q.enqueue(event("v1", "u1", 5.0)).await.unwrap();

        let early = tokio::time::timeout(Duration::from_millis(500), q.next_due()).await;
        assert!(early.is_err(), "task fired before its delay elapsed");

        let task = tokio::time::timeout(Duration::from_millis(600), q.next_due())
            .await
            .expect("task should fire after the delay")
            .unwrap();
        assert_eq!(task.key, ProgressKey::new("v1", "u1"));
        assert_eq!(task.payload.current_time, 5.0);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_key_coalesces_in_place() {
        let q = queue(1000, CoalescePolicy::Debounce);
        assert_eq!(
            q.enqueue(event("v1", "u1", 10.0)).await.unwrap(),
            EnqueueOutcome::Created
        );
        assert_eq!(
            q.enqueue(event("v1", "u1", 25.0)).await.unwrap(),
            EnqueueOutcome::Coalesced
        );
        assert_eq!(q.len().await, 1);

        tokio::time::advance(Duration::from_millis(1100)).await;
        let task = q.next_due().await.unwrap();
        assert_eq!(task.payload.current_time, 25.0);
        q.complete(&task.key).await;
        assert!(q.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_restarts_the_window() {
        let q = queue(1000, CoalescePolicy::Debounce);
        q.enqueue(event("v1", "u1", 1.0)).await.unwrap();

        tokio::time::advance(Duration::from_millis(800)).await;
        q.enqueue(event("v1", "u1", 2.0)).await.unwrap();

        // 1.3s after the first enqueue, but only 0.5s after the restart.
        let early = tokio::time::timeout(Duration::from_millis(500), q.next_due()).await;
        assert!(early.is_err(), "debounce should have restarted the window");

        let task = tokio::time::timeout(Duration::from_millis(600), q.next_due())
            .await
            .expect("task fires once the restarted window elapses")
            .unwrap();
        assert_eq!(task.payload.current_time, 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_keeps_the_original_fire_time() {
        let q = queue(1000, CoalescePolicy::Throttle);
        q.enqueue(event("v1", "u1", 1.0)).await.unwrap();

        tokio::time::advance(Duration::from_millis(800)).await;
        q.enqueue(event("v1", "u1", 2.0)).await.unwrap();

        // Fires 1s after the first enqueue despite continued activity.
        let task = tokio::time::timeout(Duration::from_millis(250), q.next_due())
            .await
            .expect("throttle should not push the fire time out")
            .unwrap();
        assert_eq!(task.payload.current_time, 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn enqueue_while_firing_parks_and_rearms() {
        let q = queue(100, CoalescePolicy::Debounce);
        q.enqueue(event("v1", "u1", 1.0)).await.unwrap();

        tokio::time::advance(Duration::from_millis(150)).await;
        let task = q.next_due().await.unwrap();

        // Key is firing now; a new event must not be dropped.
        assert_eq!(
            q.enqueue(event("v1", "u1", 2.0)).await.unwrap(),
            EnqueueOutcome::Parked
        );
        q.complete(&task.key).await;

        tokio::time::advance(Duration::from_millis(150)).await;
        let rearmed = q.next_due().await.unwrap();
        assert_eq!(rearmed.payload.current_time, 2.0);
        q.complete(&rearmed.key).await;
        assert!(q.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_removes_pending_only() {
        let q = queue(100, CoalescePolicy::Debounce);
        q.enqueue(event("v1", "u1", 1.0)).await.unwrap();
        assert!(q.cancel(&ProgressKey::new("v1", "u1")).await);
        assert!(!q.cancel(&ProgressKey::new("v1", "u1")).await);
        assert!(q.is_empty().await);

        let nothing = tokio::time::timeout(Duration::from_millis(200), q.next_due()).await;
        assert!(nothing.is_err(), "cancelled task must not fire");
    }

    #[tokio::test(start_paused = true)]
    async fn close_drains_pending_immediately_and_rejects_enqueues() {
        let q = queue(60_000, CoalescePolicy::Debounce);
        q.enqueue(event("v1", "u1", 1.0)).await.unwrap();
        q.enqueue(event("v2", "u1", 2.0)).await.unwrap();

        q.close().await;
        assert!(matches!(
            q.enqueue(event("v3", "u1", 3.0)).await,
            Err(QueueError::Closed)
        ));

        let first = q.next_due().await.unwrap();
        q.complete(&first.key).await;
        let second = q.next_due().await.unwrap();
        q.complete(&second.key).await;
        assert!(q.next_due().await.is_none());
    }
}
