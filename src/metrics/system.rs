use super::batcher::{BatchItem, MetricBatcher, Reducer};
use super::error::SinkError;
use super::metric::Metric;
use super::registry::BatcherRegistry;
use super::sink::MetricsSink;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sysinfo::System;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SystemMetricType {
    Cpu,
    Memory,
}

impl SystemMetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemMetricType::Cpu => "cpu",
            SystemMetricType::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SystemSample {
    pub kind: SystemMetricType,
    /// Percent, 0 to 100
    pub value: f64,
}

impl BatchItem for SystemSample {
    fn id(&self) -> String {
        self.kind.as_str().to_string()
    }

    fn zeroed(&self) -> Self {
        Self {
            value: 0.0,
            ..self.clone()
        }
    }
}

struct SystemReducer;

#[async_trait]
impl Reducer<SystemSample> for SystemReducer {
    async fn reduce(&self, items: Vec<SystemSample>) -> Vec<Metric> {
        let latest: BTreeMap<SystemMetricType, f64> =
            items.into_iter().map(|item| (item.kind, item.value)).collect();

        latest
            .into_iter()
            .map(|(kind, value)| {
                Metric::gauge("system_usage", "percent", value).with_tag("type", kind.as_str())
            })
            .collect()
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Reads host CPU and memory utilisation.
pub struct SystemSampler {
    system: System,
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        // CPU usage is a delta between refreshes; take the baseline now.
        system.refresh_cpu_usage();
        system.refresh_memory();
        Self { system }
    }

    pub fn sample(&mut self) -> [SystemSample; 2] {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();

        let cpu = f64::from(self.system.global_cpu_usage());
        let total = self.system.total_memory();
        let memory = if total == 0 {
            0.0
        } else {
            self.system.used_memory() as f64 / total as f64 * 100.0
        };

        [
            SystemSample {
                kind: SystemMetricType::Cpu,
                value: round2(cpu),
            },
            SystemSample {
                kind: SystemMetricType::Memory,
                value: round2(memory),
            },
        ]
    }
}

/// Host utilisation gauges. Sampling runs on its own timer, independent of
/// the flush timer, and the last sample per type in a window wins.
#[derive(Debug)]
pub struct SystemMetrics {
    batcher: Arc<MetricBatcher<SystemSample>>,
    collection_interval: Duration,
    collector: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl SystemMetrics {
    pub fn new(
        sink: Arc<dyn MetricsSink>,
        registry: &BatcherRegistry,
        batch_interval: Duration,
        collection_interval: Duration,
    ) -> Self {
        Self {
            batcher: Arc::new(MetricBatcher::new(
                "system",
                batch_interval,
                SystemReducer,
                sink,
                registry,
            )),
            collection_interval,
            collector: Mutex::new(None),
        }
    }

    /// Start periodic sampling. Calling it again while running is a no-op.
    pub fn start(&self) {
        let mut collector = self
            .collector
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if collector.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(collect(
            self.batcher.clone(),
            self.collection_interval,
            cancel.clone(),
        ));
        *collector = Some((cancel, handle));
    }

    /// Stop sampling and the batcher.
    pub fn stop(&self) {
        let running = self
            .collector
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some((cancel, _handle)) = running {
            cancel.cancel();
        }
        self.batcher.stop();
    }

    pub fn is_collecting(&self) -> bool {
        self.collector
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }

    pub fn record(&self, kind: SystemMetricType, value: f64) {
        self.batcher.push(SystemSample { kind, value });
    }

    pub async fn flush(&self) -> Result<usize, SinkError> {
        self.batcher.flush().await
    }

    pub fn batcher(&self) -> &MetricBatcher<SystemSample> {
        &self.batcher
    }
}

impl Drop for SystemMetrics {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn collect(
    batcher: Arc<MetricBatcher<SystemSample>>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut sampler = SystemSampler::new();
    let mut interval = tokio::time::interval(period);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                // sysinfo refreshes synchronously.
                let sampled = tokio::task::spawn_blocking(move || {
                    let samples = sampler.sample();
                    (sampler, samples)
                })
                .await;

                match sampled {
                    Ok((returned, samples)) => {
                        sampler = returned;
                        for sample in samples {
                            batcher.push(sample);
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "System sampler task failed");
                        break;
                    }
                }
            }
        }
    }
    debug!("System metric sampling stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MockSink;

    #[test]
    fn sampler_reports_percentages() {
        let mut sampler = SystemSampler::new();
        let [cpu, memory] = sampler.sample();
        assert_eq!(cpu.kind, SystemMetricType::Cpu);
        assert_eq!(memory.kind, SystemMetricType::Memory);
        for sample in [cpu, memory] {
            assert!((0.0..=100.0).contains(&sample.value), "{:?}", sample);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn last_value_wins() {
        let sink = Arc::new(MockSink::new());
        let registry = BatcherRegistry::new();
        let system = SystemMetrics::new(
            sink.clone(),
            &registry,
            Duration::from_secs(3600),
            Duration::from_secs(3600),
        );

        system.record(SystemMetricType::Cpu, 80.0);
        system.record(SystemMetricType::Memory, 40.0);
        system.record(SystemMetricType::Cpu, 12.5);
        system.flush().await.unwrap();

        let sent = sink.metrics();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].tag("type"), Some("cpu"));
        assert_eq!(sent[0].value.as_f64(), 12.5);
        assert_eq!(sent[1].tag("type"), Some("memory"));
        assert_eq!(sent[1].value.as_f64(), 40.0);
        assert!(sent.iter().all(|m| m.name == "system_usage" && m.unit == "percent"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sampler_runs_on_the_blocking_pool() {
        let sampler = SystemSampler::new();
        let (_sampler, [cpu, memory]) = tokio::task::spawn_blocking(move || {
            let mut sampler = sampler;
            let samples = sampler.sample();
            (sampler, samples)
        })
        .await
        .unwrap();
        assert_eq!(cpu.kind, SystemMetricType::Cpu);
        assert_eq!(memory.kind, SystemMetricType::Memory);
    }

    #[tokio::test(start_paused = true)]
    async fn collector_feeds_the_batcher() {
        let sink = Arc::new(MockSink::new());
        let registry = BatcherRegistry::new();
        let system = SystemMetrics::new(
            sink.clone(),
            &registry,
            Duration::from_secs(3600),
            Duration::from_secs(2),
        );

        system.start();
        system.start();
        assert!(system.is_collecting());

        tokio::time::sleep(Duration::from_secs(5)).await;
        // Two collection ticks, two samples each.
        assert_eq!(system.batcher().pending(), 4);

        system.stop();
        assert!(!system.is_collecting());
        assert!(registry.is_empty());
    }
}
