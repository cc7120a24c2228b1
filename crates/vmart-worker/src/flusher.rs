//! The progress persistence flusher.
//!
//! Pulls due tasks from the coalescing delay queue and upserts their
//! payloads, with bounded concurrency across keys. A task that keeps failing
//! goes to the dead-letter list after the attempt ceiling; it never blocks
//! other keys and never crashes the flusher.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use vmart_queue::{CoalescingDelayQueue, DeadLetterList, DueTask};

use crate::config::FlusherConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::retry::backoff_delay;
use crate::store::ProgressStore;

/// Metric names.
pub mod metric_names {
    pub const FLUSH_SUCCESS_TOTAL: &str = "vmart_progress_flush_success_total";
    pub const FLUSH_RETRIES_TOTAL: &str = "vmart_progress_flush_retries_total";
    pub const FLUSH_DEAD_LETTERS_TOTAL: &str = "vmart_progress_flush_dead_letters_total";
    pub const FLUSH_DURATION_SECONDS: &str = "vmart_progress_flush_duration_seconds";
}

/// Consumes due tasks and persists them.
pub struct ProgressFlusher {
    config: FlusherConfig,
    queue: Arc<CoalescingDelayQueue>,
    store: Arc<dyn ProgressStore>,
    dead_letters: Arc<DeadLetterList>,
    slots: Arc<Semaphore>,
}

impl ProgressFlusher {
    pub fn new(
        config: FlusherConfig,
        queue: Arc<CoalescingDelayQueue>,
        store: Arc<dyn ProgressStore>,
        dead_letters: Arc<DeadLetterList>,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_concurrent));
        Self {
            config,
            queue,
            store,
            dead_letters,
            slots,
        }
    }

    /// Run until the queue is closed and drained.
    ///
    /// Tasks for different keys flush concurrently up to the configured
    /// slot count; the queue guarantees the same key is never in flight
    /// twice, so no extra per-key locking is needed here.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            max_concurrent = self.config.max_concurrent,
            max_attempts = self.config.max_attempts,
            "starting progress flusher"
        );

        while let Some(task) = self.queue.next_due().await {
            let permit = Arc::clone(&self.slots)
                .acquire_owned()
                .await
                .map_err(|_| WorkerError::stopped("flush semaphore closed"))?;

            let config = self.config.clone();
            let queue = Arc::clone(&self.queue);
            let store = Arc::clone(&self.store);
            let dead_letters = Arc::clone(&self.dead_letters);

            tokio::spawn(async move {
                let _permit = permit;
                flush_task(&config, &queue, store.as_ref(), &dead_letters, task).await;
            });
        }

        // Queue closed. Wait for in-flight flushes, then pick up any tasks
        // re-armed from payloads that were parked while firing.
        let _all = self
            .slots
            .acquire_many(self.config.max_concurrent as u32)
            .await
            .map_err(|_| WorkerError::stopped("flush semaphore closed"))?;

        while let Some(task) = self.queue.next_due().await {
            flush_task(
                &self.config,
                &self.queue,
                self.store.as_ref(),
                &self.dead_letters,
                task,
            )
            .await;
        }

        info!("progress flusher drained and stopped");
        Ok(())
    }
}

/// Persist one due task: upsert with bounded exponential backoff, then
/// retire the key. On exhaustion the task lands on the dead-letter list
/// exactly once.
async fn flush_task(
    config: &FlusherConfig,
    queue: &CoalescingDelayQueue,
    store: &dyn ProgressStore,
    dead_letters: &DeadLetterList,
    task: DueTask,
) {
    let started = Instant::now();
    let record = task.payload.to_record();
    let mut attempt = 1u32;

    loop {
        match store.upsert(&task.key, &record).await {
            Ok(()) => {
                counter!(metric_names::FLUSH_SUCCESS_TOTAL).increment(1);
                histogram!(metric_names::FLUSH_DURATION_SECONDS)
                    .record(started.elapsed().as_secs_f64());
                break;
            }
            Err(e) if attempt < config.max_attempts => {
                let delay = backoff_delay(config, attempt);
                warn!(
                    key = %task.key,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "progress upsert failed, retrying: {}",
                    e
                );
                counter!(metric_names::FLUSH_RETRIES_TOTAL).increment(1);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                counter!(metric_names::FLUSH_DEAD_LETTERS_TOTAL).increment(1);
                dead_letters
                    .push(task.key.clone(), task.payload.clone(), e.to_string(), attempt)
                    .await;
                break;
            }
        }
    }

    // Retire the key either way; a parked payload re-arms a fresh task.
    queue.complete(&task.key).await;
}
