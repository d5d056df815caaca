//! In-memory sink for tests.

use super::error::SinkError;
use super::metric::Metric;
use super::sink::MetricsSink;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Records every delivered batch. Can be told to reject deliveries.
#[derive(Debug, Default)]
pub struct MockSink {
    batches: Mutex<Vec<Vec<Metric>>>,
    fail: AtomicBool,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent deliveries fail with a rejection.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn batches(&self) -> Vec<Vec<Metric>> {
        self.batches
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// All delivered metrics, flattened in delivery order.
    pub fn metrics(&self) -> Vec<Metric> {
        self.batches().into_iter().flatten().collect()
    }
}

#[async_trait]
impl MetricsSink for MockSink {
    async fn send(&self, metrics: Vec<Metric>) -> Result<(), SinkError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SinkError::Rejected {
                status: 503,
                body: "mock sink failure".to_string(),
            });
        }
        if metrics.is_empty() {
            return Ok(());
        }
        self.batches
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(metrics);
        Ok(())
    }
}
