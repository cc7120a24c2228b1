//! End-to-end semantics of the coalescing delay queue.

use std::sync::Arc;
use std::time::Duration;

use vmart_models::{ProgressEvent, ProgressKey, ValidatedEvent};
use vmart_queue::{CoalescePolicy, CoalescingDelayQueue, QueueConfig};

fn queue(delay_ms: u64) -> CoalescingDelayQueue {
    CoalescingDelayQueue::new(QueueConfig {
        flush_delay: Duration::from_millis(delay_ms),
        policy: CoalescePolicy::Debounce,
    })
}

fn event(video: &str, user: &str, t: f64) -> ValidatedEvent {
    ProgressEvent::new(video, user, t).validate().unwrap()
}

/// A burst of enqueues on one key within a single window yields exactly one
/// firing carrying the last payload.
#[tokio::test(start_paused = true)]
async fn coalesces_to_last_payload_within_window() {
    let q = queue(1000);

    q.enqueue(event("v1", "u1", 10.0)).await.unwrap();
    tokio::time::advance(Duration::from_millis(100)).await;
    q.enqueue(event("v1", "u1", 25.0)).await.unwrap();

    tokio::time::advance(Duration::from_millis(1100)).await;
    let task = q.next_due().await.unwrap();
    assert_eq!(task.payload.current_time, 25.0);
    q.complete(&task.key).await;

    // One write, not two: nothing else is pending.
    assert!(q.is_empty().await);
    let extra = tokio::time::timeout(Duration::from_millis(1500), q.next_due()).await;
    assert!(extra.is_err(), "superseded payload must never fire");
}

/// Distinct keys fire and carry their own payloads independently.
#[tokio::test(start_paused = true)]
async fn distinct_keys_fire_independently() {
    let q = queue(500);

    q.enqueue(event("v1", "u1", 11.0)).await.unwrap();
    q.enqueue(event("v2", "u1", 22.0)).await.unwrap();
    assert_eq!(q.len().await, 2);

    tokio::time::advance(Duration::from_millis(600)).await;

    let first = q.next_due().await.unwrap();
    let second = q.next_due().await.unwrap();
    let mut fired = vec![
        (first.key.clone(), first.payload.current_time),
        (second.key.clone(), second.payload.current_time),
    ];
    fired.sort_by(|a, b| a.0.video_id.as_str().cmp(b.0.video_id.as_str()));

    assert_eq!(fired[0], (ProgressKey::new("v1", "u1"), 11.0));
    assert_eq!(fired[1], (ProgressKey::new("v2", "u1"), 22.0));

    q.complete(&first.key).await;
    q.complete(&second.key).await;
    assert!(q.is_empty().await);
}

/// A slow or stuck key does not hold back other keys' tasks.
#[tokio::test(start_paused = true)]
async fn slow_key_does_not_block_others() {
    let q = Arc::new(queue(100));

    q.enqueue(event("stuck", "u1", 1.0)).await.unwrap();
    q.enqueue(event("fine", "u1", 2.0)).await.unwrap();

    tokio::time::advance(Duration::from_millis(150)).await;
    let first = q.next_due().await.unwrap();
    // Leave `first` firing (its worker is stuck); the other key still fires.
    let second = tokio::time::timeout(Duration::from_millis(100), q.next_due())
        .await
        .expect("other key must not be starved")
        .unwrap();
    assert_ne!(first.key, second.key);
}

/// A consumer parked with nothing pending wakes when the first event
/// arrives and delivers it exactly one window later, instead of sleeping
/// indefinitely.
#[tokio::test(start_paused = true)]
async fn enqueue_wakes_an_idle_consumer() {
    let q = Arc::new(queue(1000));

    let consumer = {
        let q = Arc::clone(&q);
        tokio::spawn(async move {
            let started = tokio::time::Instant::now();
            let task = q.next_due().await.unwrap();
            (task, started.elapsed())
        })
    };
    // Let the consumer park before anything is enqueued.
    tokio::task::yield_now().await;

    tokio::time::advance(Duration::from_millis(200)).await;
    q.enqueue(event("v1", "u1", 7.0)).await.unwrap();

    let (task, waited) = consumer.await.unwrap();
    assert_eq!(task.payload.current_time, 7.0);
    assert_eq!(waited, Duration::from_millis(1200));
}

/// Debouncing the key the consumer is parked on must not delay other keys:
/// the consumer re-targets and delivers the next-earliest task at its own
/// fire time.
#[tokio::test(start_paused = true)]
async fn retargets_when_the_earliest_deadline_moves() {
    let q = Arc::new(queue(1000));
    q.enqueue(event("a", "u1", 1.0)).await.unwrap();

    let consumer = {
        let q = Arc::clone(&q);
        tokio::spawn(async move {
            let started = tokio::time::Instant::now();
            let task = q.next_due().await.unwrap();
            (task, started.elapsed())
        })
    };
    // Consumer is now parked on key "a"'s original deadline (t=1000ms).
    tokio::task::yield_now().await;

    tokio::time::advance(Duration::from_millis(300)).await;
    q.enqueue(event("b", "u1", 2.0)).await.unwrap(); // due t=1300ms

    tokio::time::advance(Duration::from_millis(300)).await;
    q.enqueue(event("a", "u1", 3.0)).await.unwrap(); // "a" pushed to t=1600ms

    let (task, waited) = consumer.await.unwrap();
    assert_eq!(task.key, ProgressKey::new("b", "u1"));
    assert_eq!(task.payload.current_time, 2.0);
    assert_eq!(waited, Duration::from_millis(1300));
}

/// The same key is never handed to two consumers at once: while firing, the
/// key yields no second task even though new events arrive.
#[tokio::test(start_paused = true)]
async fn firing_key_is_not_handed_out_twice() {
    let q = queue(100);
    q.enqueue(event("v1", "u1", 1.0)).await.unwrap();

    tokio::time::advance(Duration::from_millis(150)).await;
    let task = q.next_due().await.unwrap();

    q.enqueue(event("v1", "u1", 2.0)).await.unwrap();
    let concurrent = tokio::time::timeout(Duration::from_millis(500), q.next_due()).await;
    assert!(
        concurrent.is_err(),
        "key must stay reserved until the in-flight task completes"
    );

    q.complete(&task.key).await;
    tokio::time::advance(Duration::from_millis(150)).await;
    let rearmed = q.next_due().await.unwrap();
    assert_eq!(rearmed.payload.current_time, 2.0);
}
