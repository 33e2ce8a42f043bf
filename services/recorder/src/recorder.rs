//! Live recorder: stream in, batched files out
//!
//! One task owns the queue and waits on two wake-up sources:
//!
//! - an inbound batch: each record is queued, and the queue is flushed the
//!   moment it fills
//! - the flush timer: whatever is queued gets flushed (nothing if empty)
//!
//! Both are handled one at a time, so flushes happen in trigger order.
//! Writes run on the blocking pool. A failed write is retried a bounded
//! number of times, then the batch is dropped and counted.

use crate::queue::BatchingQueue;
use crate::stream::{StreamError, Subscription, TickSource};
use persistence::TickStore;
use std::sync::Arc;
use std::time::Duration;
use tick_types::Batch;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Records buffered before a size-triggered flush.
    pub queue_capacity: usize,
    /// Maximum time a record waits in the queue.
    pub flush_interval: Duration,
    /// Pause between a lost subscription and the next attempt.
    pub reconnect_backoff: Duration,
    /// Extra insert attempts before a batch is dropped.
    pub insert_retries: u32,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
            flush_interval: Duration::from_secs(1),
            reconnect_backoff: Duration::from_secs(10),
            insert_retries: 2,
        }
    }
}

/// Counters for one subscription, or summed over a whole `run`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecorderStats {
    pub subscriptions: u64,
    pub batches_received: u64,
    pub records_received: u64,
    /// Successful writes.
    pub flushes: u64,
    pub records_written: u64,
    /// Writes abandoned after all retries.
    pub failed_flushes: u64,
    pub records_dropped: u64,
}

impl RecorderStats {
    fn absorb(&mut self, other: RecorderStats) {
        self.subscriptions += other.subscriptions;
        self.batches_received += other.batches_received;
        self.records_received += other.records_received;
        self.flushes += other.flushes;
        self.records_written += other.records_written;
        self.failed_flushes += other.failed_flushes;
        self.records_dropped += other.records_dropped;
    }
}

pub struct Recorder<S> {
    store: Arc<TickStore>,
    source: S,
    config: RecorderConfig,
    queue: BatchingQueue,
}

impl<S: TickSource> Recorder<S> {
    pub fn new(store: Arc<TickStore>, source: S, config: RecorderConfig) -> Self {
        let queue = BatchingQueue::new(config.queue_capacity);
        Self {
            store,
            source,
            config,
            queue,
        }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Record until the source is permanently closed.
    ///
    /// Each subscription is recorded until it ends; then the recorder waits
    /// `reconnect_backoff` and subscribes again. Subscribe failures are
    /// retried after the same pause. `StreamError::Closed` ends the run.
    pub async fn run(mut self) -> RecorderStats {
        let mut total = RecorderStats::default();
        loop {
            match self.source.subscribe().await {
                Ok(subscription) => {
                    let stats = self.record(subscription).await;
                    info!(
                        records = stats.records_received,
                        written = stats.records_written,
                        dropped = stats.records_dropped,
                        "Subscription ended"
                    );
                    total.absorb(stats);
                }
                Err(StreamError::Closed) => {
                    info!(
                        written = total.records_written,
                        dropped = total.records_dropped,
                        "Source closed; recorder stopping"
                    );
                    return total;
                }
                Err(error) => {
                    warn!(%error, backoff = ?self.config.reconnect_backoff, "Subscribe failed");
                }
            }
            time::sleep(self.config.reconnect_backoff).await;
        }
    }

    /// Record one subscription until it ends, then flush what is left.
    pub async fn record(&mut self, mut subscription: Subscription) -> RecorderStats {
        let mut stats = RecorderStats {
            subscriptions: 1,
            ..RecorderStats::default()
        };
        let period = self.config.flush_interval;
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                received = subscription.recv() => {
                    let Some(batch) = received else { break };
                    stats.batches_received += 1;
                    stats.records_received += batch.len() as u64;
                    for record in batch.iter() {
                        let queued = self.queue.put(record.clone());
                        debug_assert!(queued, "queue is flushed whenever it fills");
                        if self.queue.is_full() {
                            self.flush(&mut stats).await;
                        }
                    }
                }
                _ = ticker.tick() => {
                    self.flush(&mut stats).await;
                }
            }
        }

        self.flush(&mut stats).await;
        stats
    }

    async fn flush(&mut self, stats: &mut RecorderStats) {
        if self.queue.is_empty() {
            return;
        }
        let batch: Arc<Batch> = Arc::new(self.queue.records().to_vec());
        self.queue.clear();
        let count = batch.len() as u64;

        for attempt in 0..=self.config.insert_retries {
            let store = Arc::clone(&self.store);
            let records = Arc::clone(&batch);
            match tokio::task::spawn_blocking(move || store.insert(&records)).await {
                Ok(Ok(path)) => {
                    debug!(records = count, path = ?path, "Flushed");
                    stats.flushes += 1;
                    stats.records_written += count;
                    return;
                }
                Ok(Err(error)) => {
                    warn!(attempt, records = count, %error, "Insert failed");
                }
                Err(error) => {
                    warn!(attempt, records = count, %error, "Insert task failed");
                }
            }
        }

        error!(records = count, retries = self.config.insert_retries, "Dropping batch");
        stats.failed_flushes += 1;
        stats.records_dropped += count;
    }
}
