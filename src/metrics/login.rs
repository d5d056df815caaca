use super::batcher::{BatchItem, MetricBatcher, Reducer};
use super::error::{ReportError, SinkError};
use super::metric::Metric;
use super::registry::BatcherRegistry;
use super::sink::{send_sum, MetricsSink};
use crate::database::Database;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStatus {
    Success,
    Failed,
}

impl LoginStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoginStatus::Success => "success",
            LoginStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoginAttempt {
    pub status: LoginStatus,
    pub value: f64,
}

impl BatchItem for LoginAttempt {
    fn id(&self) -> String {
        self.status.as_str().to_string()
    }

    fn zeroed(&self) -> Self {
        Self {
            value: 0.0,
            ..self.clone()
        }
    }
}

struct LoginReducer;

#[async_trait]
impl Reducer<LoginAttempt> for LoginReducer {
    async fn reduce(&self, items: Vec<LoginAttempt>) -> Vec<Metric> {
        let total = |status: LoginStatus| -> f64 {
            items
                .iter()
                .filter(|item| item.status == status)
                .map(|item| item.value)
                .sum()
        };

        [LoginStatus::Success, LoginStatus::Failed]
            .into_iter()
            .map(|status| {
                Metric::sum("login_attempts", "count", total(status))
                    .with_tag("status", status.as_str())
            })
            .collect()
    }
}

/// Login attempt counters. Every flush reports both statuses.
#[derive(Debug)]
pub struct LoginMetrics {
    batcher: MetricBatcher<LoginAttempt>,
    sink: Arc<dyn MetricsSink>,
}

impl LoginMetrics {
    pub fn new(sink: Arc<dyn MetricsSink>, registry: &BatcherRegistry, interval: Duration) -> Self {
        Self {
            batcher: MetricBatcher::new("login", interval, LoginReducer, sink.clone(), registry),
            sink,
        }
    }

    pub fn record(&self, status: LoginStatus) {
        self.batcher.push(LoginAttempt { status, value: 1.0 });
    }

    pub fn record_success(&self) {
        self.record(LoginStatus::Success);
    }

    pub fn record_failure(&self) {
        self.record(LoginStatus::Failed);
    }

    pub async fn flush(&self) -> Result<usize, SinkError> {
        self.batcher.flush().await
    }

    pub fn batcher(&self) -> &MetricBatcher<LoginAttempt> {
        &self.batcher
    }

    /// Read the number of users with an active session and send it as an
    /// `active_users` sum right away.
    pub async fn report_active_users(&self, db: &Database) -> Result<i64, ReportError> {
        let count = db.get_active_users_count().await?;
        send_sum(self.sink.as_ref(), "active_users", "count", count as f64, &[]).await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MockSink;

    fn logins(sink: &Arc<MockSink>, registry: &BatcherRegistry) -> LoginMetrics {
        LoginMetrics::new(sink.clone(), registry, Duration::from_secs(3600))
    }

    fn attempts(metrics: &[Metric], status: &str) -> Option<f64> {
        metrics
            .iter()
            .find(|m| m.name == "login_attempts" && m.tag("status") == Some(status))
            .map(|m| m.value.as_f64())
    }

    #[tokio::test(start_paused = true)]
    async fn one_success_two_failures() {
        let sink = Arc::new(MockSink::new());
        let registry = BatcherRegistry::new();
        let login = logins(&sink, &registry);

        login.record_success();
        login.record_failure();
        login.record_failure();
        assert_eq!(login.flush().await.unwrap(), 2);

        let sent = sink.metrics();
        assert_eq!(sent.len(), 2);
        assert_eq!(attempts(&sent, "success"), Some(1.0));
        assert_eq!(attempts(&sent, "failed"), Some(2.0));
        assert!(sent.iter().all(|m| m.unit == "count"));
    }

    #[tokio::test(start_paused = true)]
    async fn both_statuses_reported_even_if_one_is_absent() {
        let sink = Arc::new(MockSink::new());
        let registry = BatcherRegistry::new();
        let login = logins(&sink, &registry);

        login.record_failure();
        login.flush().await.unwrap();

        let sent = sink.metrics();
        assert_eq!(attempts(&sent, "success"), Some(0.0));
        assert_eq!(attempts(&sent, "failed"), Some(1.0));
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_window_after_activity_reports_zeros() {
        let sink = Arc::new(MockSink::new());
        let registry = BatcherRegistry::new();
        let login = logins(&sink, &registry);

        login.record_success();
        login.flush().await.unwrap();
        login.flush().await.unwrap();

        let second = sink.batches()[1].clone();
        assert_eq!(attempts(&second, "success"), Some(0.0));
        assert_eq!(attempts(&second, "failed"), Some(0.0));
    }
}
