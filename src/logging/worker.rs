use crate::logging::{LogEvent, LogStream};
use crate::metrics::SinkError;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use tokio::sync::mpsc;
use tracing::warn;

/// Upper bound on streams merged into one push request.
const MAX_STREAMS_PER_PUSH: usize = 100;

/// Background worker that drains the log channel and pushes to Loki.
///
/// Whatever is already queued when a record arrives is merged into the same
/// request. Delivery failures are logged and the records dropped.
pub struct LogWorker {
    receiver: mpsc::Receiver<LogEvent>,
    client: reqwest::Client,
    url: String,
    authorization: String,
}

impl LogWorker {
    pub fn new(
        receiver: mpsc::Receiver<LogEvent>,
        url: impl Into<String>,
        user_id: &str,
        api_key: &str,
    ) -> Self {
        Self {
            receiver,
            client: reqwest::Client::new(),
            url: url.into(),
            authorization: format!("Bearer {}:{}", user_id, api_key),
        }
    }

    /// Run until every sender is dropped.
    pub async fn run(mut self) {
        while let Some(first) = self.receiver.recv().await {
            let mut streams: Vec<LogStream> = first.streams;
            while streams.len() < MAX_STREAMS_PER_PUSH {
                match self.receiver.try_recv() {
                    Ok(event) => streams.extend(event.streams),
                    Err(_) => break,
                }
            }

            let count = streams.len();
            if let Err(e) = self.push(&LogEvent { streams }).await {
                warn!(error = %e, streams = count, "Failed to ship logs");
            }
        }
    }

    async fn push(&self, event: &LogEvent) -> Result<(), SinkError> {
        let body = serde_json::to_vec(event)?;
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, &self.authorization)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{ErrorLogData, LogShipper};

    #[tokio::test]
    async fn worker_exits_cleanly_when_channel_closes() {
        let (shipper, rx) = LogShipper::channel("test");
        // Unroutable endpoint: delivery fails and is only logged.
        let worker = LogWorker::new(rx, "http://127.0.0.1:1/loki/api/v1/push", "u", "k");

        let handle = tokio::spawn(worker.run());

        shipper.unhandled_error(ErrorLogData {
            message: "boom".into(),
            status: 500,
        });
        drop(shipper);

        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("worker should exit within 5 seconds")
            .expect("worker task should not panic");
    }
}
