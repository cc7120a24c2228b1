//! Flusher behavior against a scriptable in-memory store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use vmart_models::{ProgressEvent, ProgressKey, ProgressRecord, ValidatedEvent};
use vmart_queue::{CoalescePolicy, CoalescingDelayQueue, DeadLetterList, QueueConfig};
use vmart_worker::{FlusherConfig, ProgressFlusher, ProgressStore, StoreError};

/// In-memory store whose first N upserts per key can be scripted to fail.
#[derive(Default)]
struct MemoryStore {
    records: Mutex<HashMap<ProgressKey, ProgressRecord>>,
    fail_first: Mutex<HashMap<ProgressKey, u32>>,
}

impl MemoryStore {
    async fn fail_next(&self, key: &ProgressKey, times: u32) {
        self.fail_first.lock().await.insert(key.clone(), times);
    }

    async fn get(&self, key: &ProgressKey) -> Option<ProgressRecord> {
        self.records.lock().await.get(key).cloned()
    }
}

#[async_trait]
impl ProgressStore for MemoryStore {
    async fn upsert(&self, key: &ProgressKey, record: &ProgressRecord) -> Result<(), StoreError> {
        let mut failures = self.fail_first.lock().await;
        if let Some(remaining) = failures.get_mut(key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StoreError::unavailable("simulated outage"));
            }
        }
        drop(failures);

        self.records.lock().await.insert(key.clone(), record.clone());
        Ok(())
    }
}

struct Harness {
    queue: Arc<CoalescingDelayQueue>,
    store: Arc<MemoryStore>,
    dead_letters: Arc<DeadLetterList>,
    flusher: tokio::task::JoinHandle<()>,
}

fn start(delay_ms: u64, max_attempts: u32) -> Harness {
    let queue = Arc::new(CoalescingDelayQueue::new(QueueConfig {
        flush_delay: Duration::from_millis(delay_ms),
        policy: CoalescePolicy::Debounce,
    }));
    let store = Arc::new(MemoryStore::default());
    let dead_letters = Arc::new(DeadLetterList::new());

    let config = FlusherConfig {
        max_concurrent: 4,
        max_attempts,
        retry_base: Duration::from_millis(10),
        retry_max: Duration::from_millis(50),
        ..Default::default()
    };
    let flusher = ProgressFlusher::new(
        config,
        Arc::clone(&queue),
        Arc::clone(&store) as Arc<dyn ProgressStore>,
        Arc::clone(&dead_letters),
    );
    let handle = tokio::spawn(async move {
        flusher.run().await.expect("flusher run");
    });

    Harness {
        queue,
        store,
        dead_letters,
        flusher: handle,
    }
}

fn event(video: &str, user: &str, t: f64) -> ValidatedEvent {
    ProgressEvent::new(video, user, t).validate().unwrap()
}

#[tokio::test(start_paused = true)]
async fn persists_the_coalesced_payload() {
    let h = start(100, 3);
    let key = ProgressKey::new("v1", "u1");

    h.queue.enqueue(event("v1", "u1", 10.0)).await.unwrap();
    h.queue.enqueue(event("v1", "u1", 25.0)).await.unwrap();

    h.queue.close().await;
    h.flusher.await.unwrap();

    let record = h.store.get(&key).await.expect("record persisted");
    assert_eq!(record.current_time, 25.0);
    assert!(h.dead_letters.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn retries_then_succeeds_within_ceiling() {
    let h = start(50, 3);
    let key = ProgressKey::new("v1", "u1");
    h.store.fail_next(&key, 1).await;

    h.queue.enqueue(event("v1", "u1", 42.0)).await.unwrap();
    h.queue.close().await;
    h.flusher.await.unwrap();

    let record = h.store.get(&key).await.expect("retry should have succeeded");
    assert_eq!(record.current_time, 42.0);
    assert!(h.dead_letters.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_dead_letter_exactly_once() {
    let h = start(50, 3);
    let key = ProgressKey::new("v1", "u1");
    h.store.fail_next(&key, u32::MAX).await;

    h.queue.enqueue(event("v1", "u1", 7.0)).await.unwrap();
    h.queue.close().await;
    h.flusher.await.unwrap();

    assert!(h.store.get(&key).await.is_none());
    let letters = h.dead_letters.snapshot().await;
    assert_eq!(letters.len(), 1, "exactly one dead letter");
    assert_eq!(letters[0].key, key);
    assert_eq!(letters[0].attempts, 3);
}

#[tokio::test(start_paused = true)]
async fn failing_key_does_not_block_other_keys() {
    let h = start(50, 2);
    let bad = ProgressKey::new("bad", "u1");
    let good = ProgressKey::new("good", "u1");
    h.store.fail_next(&bad, u32::MAX).await;

    h.queue.enqueue(event("bad", "u1", 1.0)).await.unwrap();
    h.queue.enqueue(event("good", "u1", 2.0)).await.unwrap();
    h.queue.close().await;
    h.flusher.await.unwrap();

    let record = h.store.get(&good).await.expect("healthy key persisted");
    assert_eq!(record.current_time, 2.0);
    assert_eq!(h.dead_letters.len().await, 1);
}

#[tokio::test(start_paused = true)]
async fn parked_payload_is_flushed_during_drain() {
    // Window long enough that the payload arrives while the first task is
    // still firing: slow the store down with scripted failures.
    let h = start(20, 3);
    let key = ProgressKey::new("v1", "u1");
    h.store.fail_next(&key, 1).await;

    h.queue.enqueue(event("v1", "u1", 5.0)).await.unwrap();

    // Let the task fire and enter its retry sleep, then send a newer tick.
    tokio::time::sleep(Duration::from_millis(25)).await;
    let _ = h.queue.enqueue(event("v1", "u1", 9.0)).await;

    h.queue.close().await;
    h.flusher.await.unwrap();

    let record = h.store.get(&key).await.expect("record persisted");
    assert_eq!(record.current_time, 9.0, "latest position wins");
}

#[tokio::test]
async fn double_upsert_is_idempotent() {
    let store = MemoryStore::default();
    let key = ProgressKey::new("v1", "u1");
    let record = event("v1", "u1", 33.0).to_record();

    store.upsert(&key, &record).await.unwrap();
    store.upsert(&key, &record).await.unwrap();

    let stored = store.get(&key).await.unwrap();
    assert_eq!(stored, record);
    assert_eq!(store.records.lock().await.len(), 1);
}
