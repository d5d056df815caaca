//! Time-windowed metric aggregation.
//!
//! A [`MetricBatcher`] queues raw items between flushes. Every flush drains
//! the queue, adds a zero-valued item for each identity that appeared in the
//! previous window but not in this one, reduces the batch to metrics and
//! delivers them. A failed delivery is logged and the window is lost.

use super::error::SinkError;
use super::metric::Metric;
use super::registry::BatcherRegistry;
use super::sink::MetricsSink;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// An item queued in a batcher.
pub trait BatchItem: Clone + Send + Sync + 'static {
    /// Identity used for gap-filling. Items with equal ids describe the same
    /// series.
    fn id(&self) -> String;

    /// Copy of this item with its value set to zero.
    fn zeroed(&self) -> Self;
}

/// Turns one window of items into metrics.
#[async_trait]
pub trait Reducer<T>: Send + Sync {
    async fn reduce(&self, items: Vec<T>) -> Vec<Metric>;
}

#[derive(Debug)]
struct Window<T> {
    queue: Vec<T>,
    previous: Vec<T>,
}

struct Shared<T> {
    name: &'static str,
    window: Mutex<Window<T>>,
    reducer: Box<dyn Reducer<T>>,
    sink: Arc<dyn MetricsSink>,
    flush_lock: tokio::sync::Mutex<()>,
}

impl<T: BatchItem> Shared<T> {
    fn window(&self) -> MutexGuard<'_, Window<T>> {
        self.window
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn flush(&self) -> Result<usize, SinkError> {
        let _flushing = self.flush_lock.lock().await;

        let batch = {
            let mut window = self.window();
            let current = std::mem::take(&mut window.queue);
            let batch = fill_missing(&current, &window.previous);
            window.previous = current;
            batch
        };
        if batch.is_empty() {
            return Ok(0);
        }

        let metrics = self.reducer.reduce(batch).await;
        let count = metrics.len();
        if count > 0 {
            self.sink.send(metrics).await?;
        }
        debug!(batcher = self.name, metrics = count, "Flushed metric batch");
        Ok(count)
    }
}

/// `current` followed by one zeroed item per identity present in `previous`
/// but absent from `current`.
pub fn fill_missing<T: BatchItem>(current: &[T], previous: &[T]) -> Vec<T> {
    let current_ids: HashSet<String> = current.iter().map(BatchItem::id).collect();
    let mut filled: HashSet<String> = HashSet::new();

    let mut batch = current.to_vec();
    for item in previous {
        let id = item.id();
        if !current_ids.contains(&id) && filled.insert(id) {
            batch.push(item.zeroed());
        }
    }
    batch
}

/// Generic batcher driven by its own flush timer.
pub struct MetricBatcher<T: BatchItem> {
    shared: Arc<Shared<T>>,
    cancel: CancellationToken,
    registry: BatcherRegistry,
    registration: u64,
}

impl<T: BatchItem> std::fmt::Debug for MetricBatcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricBatcher")
            .field("name", &self.shared.name)
            .field("stopped", &self.cancel.is_cancelled())
            .finish()
    }
}

impl<T: BatchItem> MetricBatcher<T> {
    /// Start a batcher flushing every `interval` and register it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        name: &'static str,
        interval: Duration,
        reducer: impl Reducer<T> + 'static,
        sink: Arc<dyn MetricsSink>,
        registry: &BatcherRegistry,
    ) -> Self {
        let shared = Arc::new(Shared {
            name,
            window: Mutex::new(Window {
                queue: Vec::new(),
                previous: Vec::new(),
            }),
            reducer: Box::new(reducer),
            sink,
            flush_lock: tokio::sync::Mutex::new(()),
        });
        let cancel = CancellationToken::new();
        let registration = registry.register(name, cancel.clone());

        tokio::spawn(run_timer(shared.clone(), interval, cancel.clone()));

        Self {
            shared,
            cancel,
            registry: registry.clone(),
            registration,
        }
    }

    pub fn name(&self) -> &'static str {
        self.shared.name
    }

    /// Queue an item for the next flush. Never blocks on I/O.
    pub fn push(&self, item: T) {
        self.shared.window().queue.push(item);
    }

    pub fn pending(&self) -> usize {
        self.shared.window().queue.len()
    }

    /// Flush now. Returns the number of metrics delivered.
    pub async fn flush(&self) -> Result<usize, SinkError> {
        self.shared.flush().await
    }

    /// Cancel the flush timer and leave the registry. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
        self.registry.unregister(self.registration);
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl<T: BatchItem> Drop for MetricBatcher<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_timer<T: BatchItem>(shared: Arc<Shared<T>>, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; the first flush is one period in.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                if let Err(e) = shared.flush().await {
                    warn!(batcher = shared.name, error = %e, "Failed to deliver metric batch");
                }
            }
        }
    }
    debug!(batcher = shared.name, "Metric batcher timer stopped");
}
