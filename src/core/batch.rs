//! Dynamic request batching.
//!
//! Producers enqueue single requests and await a per-slot one-shot handle;
//! one long-lived consumer thread assembles batches and hands them to a
//! [`BatchRunner`]. A batch is dispatched as soon as `max_batch_size`
//! requests are queued (size-terminated) or once `timeout` has elapsed
//! since the batch started filling (timeout-terminated).
//!
//! The consumer thread is deliberately a plain OS thread: the model
//! executor behind the runner is synchronous, and parking it on a blocking
//! call must not stall the async transport. Fulfilment goes through
//! `tokio::sync::oneshot`, so waiters integrate with the scheduler instead
//! of blocking a thread each.
//!
//! Every slot resolves exactly once: with a response, with a runner error,
//! or with [`BatchError::Shutdown`] when the processor stops while the slot
//! is still queued.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use tokio::sync::oneshot;
use tracing::{error, warn};

use super::error::BatchError;
use crate::protocols::{InferenceRequest, InferenceResponse};

/// Executes one assembled batch. Injected at construction so the consumer
/// loop stays monomorphic over the concrete runner.
pub trait BatchRunner: Send + Sync + 'static {
    fn run_batch(
        &self,
        requests: Vec<InferenceRequest>,
    ) -> Result<Vec<InferenceResponse>, crate::inference::ExecutorError>;
}

/// Batch assembly tuning.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Requests per batch at which assembly stops waiting.
    pub max_batch_size: usize,
    /// How long a partially filled batch may wait for more requests.
    pub timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 32,
            timeout: Duration::from_millis(20),
        }
    }
}

/// One queued request and its delivery handle. Owned by the queue until the
/// consumer claims it, then by the active batch, then consumed by delivery.
struct Slot {
    request: InferenceRequest,
    reply: oneshot::Sender<Result<InferenceResponse, BatchError>>,
}

struct Queue {
    slots: VecDeque<Slot>,
    stopping: bool,
}

#[derive(Debug, Default)]
struct Metrics {
    total_requests: AtomicU64,
    total_batches: AtomicU64,
    timeout_batches: AtomicU64,
    full_batches: AtomicU64,
    avg_batch_size: Mutex<f64>,
}

/// Point-in-time batch processor metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchMetricsSnapshot {
    pub total_requests: u64,
    pub total_batches: u64,
    pub timeout_batches: u64,
    pub full_batches: u64,
    pub avg_batch_size: f64,
}

struct Shared {
    config: BatchConfig,
    queue: Mutex<Queue>,
    available: Condvar,
    metrics: Metrics,
}

/// Single-consumer request coalescer.
///
/// The consumer thread starts in [`BatchProcessor::new`] and is joined by
/// [`BatchProcessor::shutdown`] (also run on drop), which drains any still
/// queued slots with [`BatchError::Shutdown`] so no caller is left waiting.
pub struct BatchProcessor {
    shared: Arc<Shared>,
    consumer: Mutex<Option<thread::JoinHandle<()>>>,
}

impl BatchProcessor {
    pub fn new<H: BatchRunner>(config: BatchConfig, runner: H) -> Self {
        let shared = Arc::new(Shared {
            config,
            queue: Mutex::new(Queue {
                slots: VecDeque::new(),
                stopping: false,
            }),
            available: Condvar::new(),
            metrics: Metrics::default(),
        });

        let consumer = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("batch-consumer".to_string())
                .spawn(move || consumer_loop(&shared, runner))
                .expect("failed to spawn batch consumer thread")
        };

        Self {
            shared,
            consumer: Mutex::new(Some(consumer)),
        }
    }

    /// Enqueue one request and wait for its slot to resolve.
    pub async fn process(
        &self,
        request: InferenceRequest,
    ) -> Result<InferenceResponse, BatchError> {
        let (reply, receiver) = oneshot::channel();
        {
            let mut queue = self.shared.queue.lock();
            if queue.stopping {
                return Err(BatchError::Shutdown);
            }
            queue.slots.push_back(Slot { request, reply });
        }
        self.shared
            .metrics
            .total_requests
            .fetch_add(1, Ordering::Relaxed);
        self.shared.available.notify_one();

        // The sender is only ever dropped if the consumer dies mid-flight.
        receiver.await.unwrap_or(Err(BatchError::Shutdown))
    }

    /// Stop the consumer and join it. Queued slots resolve with
    /// [`BatchError::Shutdown`]; a batch already executing completes and
    /// delivers normally. Idempotent.
    pub fn shutdown(&self) {
        {
            let mut queue = self.shared.queue.lock();
            queue.stopping = true;
        }
        self.shared.available.notify_all();
        let handle = self.consumer.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("batch consumer thread panicked");
            }
        }
    }

    pub fn metrics(&self) -> BatchMetricsSnapshot {
        let metrics = &self.shared.metrics;
        BatchMetricsSnapshot {
            total_requests: metrics.total_requests.load(Ordering::Relaxed),
            total_batches: metrics.total_batches.load(Ordering::Relaxed),
            timeout_batches: metrics.timeout_batches.load(Ordering::Relaxed),
            full_batches: metrics.full_batches.load(Ordering::Relaxed),
            avg_batch_size: *metrics.avg_batch_size.lock(),
        }
    }
}

impl Drop for BatchProcessor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn consumer_loop<H: BatchRunner>(shared: &Shared, runner: H) {
    loop {
        let mut queue = shared.queue.lock();

        // Sleep until there is work or we are told to stop.
        while queue.slots.is_empty() && !queue.stopping {
            shared.available.wait(&mut queue);
        }
        if queue.stopping {
            drain_with_shutdown_error(queue);
            return;
        }

        // Give the batch up to `timeout` to fill to `max_batch_size`.
        let deadline = Instant::now() + shared.config.timeout;
        let mut timed_out = false;
        while queue.slots.len() < shared.config.max_batch_size && !queue.stopping {
            if shared
                .available
                .wait_until(&mut queue, deadline)
                .timed_out()
            {
                timed_out = true;
                break;
            }
        }
        if queue.stopping {
            drain_with_shutdown_error(queue);
            return;
        }

        let take = queue.slots.len().min(shared.config.max_batch_size);
        let batch: Vec<Slot> = queue.slots.drain(..take).collect();
        drop(queue);

        if batch.is_empty() {
            continue;
        }
        run_batch(shared, &runner, batch, timed_out);
    }
}

fn drain_with_shutdown_error(mut queue: parking_lot::MutexGuard<'_, Queue>) {
    let leftovers: Vec<Slot> = queue.slots.drain(..).collect();
    drop(queue);
    for slot in leftovers {
        let _ = slot.reply.send(Err(BatchError::Shutdown));
    }
}

fn run_batch<H: BatchRunner>(shared: &Shared, runner: &H, batch: Vec<Slot>, timed_out: bool) {
    let batch_len = batch.len();
    let (requests, replies): (Vec<_>, Vec<_>) = batch
        .into_iter()
        .map(|slot| (slot.request, slot.reply))
        .unzip();

    let result = runner.run_batch(requests);

    // Account for the batch before fulfilment: a caller woken by its
    // response must already observe the updated counters.
    {
        let metrics = &shared.metrics;
        let total = metrics.total_batches.fetch_add(1, Ordering::Relaxed) + 1;
        if timed_out {
            metrics.timeout_batches.fetch_add(1, Ordering::Relaxed);
        } else {
            metrics.full_batches.fetch_add(1, Ordering::Relaxed);
        }
        let mut avg = metrics.avg_batch_size.lock();
        *avg = (*avg * (total - 1) as f64 + batch_len as f64) / total as f64;
    }

    match result {
        Ok(responses) => {
            if responses.len() < batch_len {
                warn!(
                    expected = batch_len,
                    got = responses.len(),
                    "runner returned too few responses"
                );
            }
            let mut responses = responses.into_iter();
            for reply in replies {
                let outcome = match responses.next() {
                    Some(response) => Ok(response),
                    None => Err(BatchError::MissingResponse),
                };
                let _ = reply.send(outcome);
            }
        }
        Err(err) => {
            error!(batch_len, error = %err, "batch execution failed");
            let failure = BatchError::Executor(err.to_string());
            for reply in replies {
                let _ = reply.send(Err(failure.clone()));
            }
        }
    }
}
