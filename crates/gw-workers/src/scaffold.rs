//! Generic cancellable polling-queue worker (spec §2 "Worker queues",
//! §5 "Workers shut down cleanly on stop: queues stop accepting,
//! in-flight items drain, timers cancel").
//!
//! Grounded on `chain/client/src/sync_jobs_actor.rs`'s general
//! actor-with-a-queue-and-a-timer shape, generalized away from Actix
//! (per the Open Question decision recorded in DESIGN.md) to a plain
//! poll loop driven by `tokio::time::sleep` and a
//! `tokio_util::sync::CancellationToken`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to poll for pending work: {0}")]
    Poll(String),
    #[error("failed to process item: {0}")]
    Process(String),
}

/// Pulls the next batch of pending work. Implementations close over
/// whatever backing store they have (spec §1 Non-goals: the SQLite
/// schema and the chain importer are collaborator-owned; this trait is
/// the seam between them and the core).
#[async_trait]
pub trait PollingQueue: Send + Sync {
    type Item: Send + 'static;

    async fn poll(&self, max_items: usize) -> Result<Vec<Self::Item>, WorkerError>;
}

/// Processes one item pulled from a [`PollingQueue`].
#[async_trait]
pub trait ItemProcessor: Send + Sync {
    type Item: Send + 'static;

    async fn process(&self, item: Self::Item) -> Result<(), WorkerError>;
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    /// How long to sleep between polls when the previous poll returned
    /// no work.
    pub idle_poll_interval: Duration,
    /// Maximum items pulled per poll.
    pub batch_size: usize,
    /// Maximum items processed concurrently within one batch.
    pub concurrency: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { idle_poll_interval: Duration::from_secs(5), batch_size: 50, concurrency: 8 }
    }
}

/// Drives a [`PollingQueue`] and [`ItemProcessor`] pair until cancelled.
/// A full batch is always drained before the next cancellation check,
/// so `run` never abandons in-flight work mid-item; it simply stops
/// pulling new batches once `cancel` fires.
pub struct PollingWorker<Q, P> {
    name: &'static str,
    queue: Q,
    processor: P,
    config: WorkerConfig,
}

impl<Q, P> PollingWorker<Q, P>
where
    Q: PollingQueue,
    P: ItemProcessor<Item = Q::Item>,
{
    pub fn new(name: &'static str, queue: Q, processor: P, config: WorkerConfig) -> Self {
        Self { name, queue, processor, config }
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                break;
            }

            let items = match self.queue.poll(self.config.batch_size).await {
                Ok(items) => items,
                Err(e) => {
                    warn!(worker = self.name, error = %e, "poll failed, retrying after idle interval");
                    Vec::new()
                }
            };

            if items.is_empty() {
                tokio::select! {
                    _ = sleep(self.config.idle_poll_interval) => {}
                    _ = cancel.cancelled() => break,
                }
                continue;
            }

            let worker = Arc::clone(&self);
            stream::iter(items)
                .for_each_concurrent(self.config.concurrency, |item| {
                    let worker = Arc::clone(&worker);
                    async move {
                        if let Err(e) = worker.processor.process(item).await {
                            warn!(worker = worker.name, error = %e, "item processing failed");
                        }
                    }
                })
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedQueue {
        batches: std::sync::Mutex<Vec<Vec<u32>>>,
    }

    #[async_trait]
    impl PollingQueue for FixedQueue {
        type Item = u32;

        async fn poll(&self, _max_items: usize) -> Result<Vec<u32>, WorkerError> {
            Ok(self.batches.lock().unwrap().pop().unwrap_or_default())
        }
    }

    struct CountingProcessor {
        processed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ItemProcessor for CountingProcessor {
        type Item = u32;

        async fn process(&self, _item: u32) -> Result<(), WorkerError> {
            self.processed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn drains_every_batch_then_stops_on_cancel() {
        let processed = Arc::new(AtomicUsize::new(0));
        let queue = FixedQueue { batches: std::sync::Mutex::new(vec![vec![4, 5], vec![1, 2, 3]]) };
        let worker = Arc::new(PollingWorker::new(
            "test",
            queue,
            CountingProcessor { processed: Arc::clone(&processed) },
            WorkerConfig { idle_poll_interval: Duration::from_millis(5), batch_size: 10, concurrency: 4 },
        ));

        let cancel = CancellationToken::new();
        let cancel_for_run = cancel.clone();
        let handle = tokio::spawn(worker.run(cancel_for_run));

        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(processed.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn a_failed_poll_is_logged_and_does_not_panic() {
        struct FailingQueue;
        #[async_trait]
        impl PollingQueue for FailingQueue {
            type Item = u32;
            async fn poll(&self, _max_items: usize) -> Result<Vec<u32>, WorkerError> {
                Err(WorkerError::Poll("backing store unavailable".to_string()))
            }
        }

        let processed = Arc::new(AtomicUsize::new(0));
        let worker = Arc::new(PollingWorker::new(
            "test",
            FailingQueue,
            CountingProcessor { processed: Arc::clone(&processed) },
            WorkerConfig { idle_poll_interval: Duration::from_millis(5), batch_size: 10, concurrency: 4 },
        ));

        let cancel = CancellationToken::new();
        let cancel_for_run = cancel.clone();
        let handle = tokio::spawn(worker.run(cancel_for_run));
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(processed.load(Ordering::SeqCst), 0);
    }
}
