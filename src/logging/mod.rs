//! Structured log shipping to a Loki-compatible push endpoint.
//!
//! Producers call the typed methods on [`LogShipper`], which never block: each
//! record is rendered into a push stream and handed to the [`LogWorker`]
//! through a bounded channel. Records are silently dropped when the channel
//! is full, the same trade-off the request metrics make.

pub mod worker;

pub use worker::LogWorker;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tokio::sync::mpsc;

/// Channel capacity for the log event channel.
pub const LOG_CHANNEL_CAPACITY: usize = 1_000;

/// Loki push payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    pub streams: Vec<LogStream>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogStream {
    pub stream: StreamLabels,
    /// `[timestamp_ns, json_line]` pairs.
    pub values: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamLabels {
    pub component: String,
    pub level: String,
    #[serde(rename = "type")]
    pub log_type: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpLogData {
    pub authorized: bool,
    pub path: String,
    pub method: String,
    pub status_code: u16,
    pub req_body: serde_json::Value,
    pub res_body: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbLogData {
    pub query: String,
    pub param_count: usize,
    pub duration_ms: u64,
    pub row_count: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FactoryLogData {
    pub method: String,
    pub path: String,
    pub status_code: u16,
    pub req_body: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorLogData {
    pub message: String,
    pub status: u16,
}

/// Cheap-to-clone handle for emitting log records.
#[derive(Debug, Clone)]
pub struct LogShipper {
    component: String,
    sender: mpsc::Sender<LogEvent>,
}

impl LogShipper {
    pub fn new(component: impl Into<String>, sender: mpsc::Sender<LogEvent>) -> Self {
        Self {
            component: component.into(),
            sender,
        }
    }

    /// Create a shipper and the receiving end for a [`LogWorker`].
    pub fn channel(component: impl Into<String>) -> (Self, mpsc::Receiver<LogEvent>) {
        let (sender, receiver) = mpsc::channel(LOG_CHANNEL_CAPACITY);
        (Self::new(component, sender), receiver)
    }

    pub fn http(&self, data: HttpLogData) {
        let level = status_to_level(data.status_code);
        self.log(level, "http", &data);
    }

    pub fn db(&self, data: DbLogData) {
        self.log("info", "db", &data);
    }

    pub fn factory(&self, data: FactoryLogData) {
        self.log("info", "factory", &data);
    }

    pub fn unhandled_error(&self, data: ErrorLogData) {
        self.log("error", "unhandledError", &data);
    }

    fn log<T: Serialize>(&self, level: &str, log_type: &str, data: &T) {
        let line = match serde_json::to_string(data) {
            Ok(line) => sanitize(&line),
            Err(e) => {
                tracing::warn!(error = %e, log_type, "Failed to serialize log record");
                return;
            }
        };

        let event = build_event(&self.component, level, log_type, now_nanos(), line);
        let _ = self.sender.try_send(event);
    }
}

pub fn build_event(
    component: &str,
    level: &str,
    log_type: &str,
    timestamp_ns: String,
    line: String,
) -> LogEvent {
    LogEvent {
        streams: vec![LogStream {
            stream: StreamLabels {
                component: component.to_string(),
                level: level.to_string(),
                log_type: log_type.to_string(),
            },
            values: vec![(timestamp_ns, line)],
        }],
    }
}

pub fn status_to_level(status_code: u16) -> &'static str {
    if status_code >= 500 {
        "error"
    } else if status_code >= 400 {
        "warn"
    } else {
        "info"
    }
}

static PASSWORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""password":"(?:[^"\\]|\\.)*""#).expect("valid password regex")
});

/// Mask every `"password":"..."` value in a rendered JSON line.
pub fn sanitize(line: &str) -> String {
    PASSWORD_RE
        .replace_all(line, r#""password":"*****""#)
        .into_owned()
}

pub(crate) fn now_nanos() -> String {
    chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sanitize_masks_passwords() {
        let line = r#"{"email":"a@jwt.com","password":"admin","nested":{"password":"x\"y"}}"#;
        assert_eq!(
            sanitize(line),
            r#"{"email":"a@jwt.com","password":"*****","nested":{"password":"*****"}}"#
        );
    }

    #[test]
    fn sanitize_leaves_other_lines_alone() {
        let line = r#"{"query":"SELECT * FROM menu"}"#;
        assert_eq!(sanitize(line), line);
    }

    #[test]
    fn sanitize_handles_escapes_and_repeats() {
        let line = r#"[{"password":"ends\\"},{"password":""},{"passwords":"kept"}]"#;
        assert_eq!(
            sanitize(line),
            r#"[{"password":"*****"},{"password":"*****"},{"passwords":"kept"}]"#
        );
    }

    #[test]
    fn status_levels() {
        assert_eq!(status_to_level(200), "info");
        assert_eq!(status_to_level(404), "warn");
        assert_eq!(status_to_level(500), "error");
    }

    #[tokio::test]
    async fn http_record_is_sanitized_and_labelled() {
        let (shipper, mut rx) = LogShipper::channel("pizza-service-test");

        shipper.http(HttpLogData {
            authorized: false,
            path: "/api/auth".into(),
            method: "PUT".into(),
            status_code: 404,
            req_body: json!({"email": "a@jwt.com", "password": "wrong"}),
            res_body: json!({"message": "unknown user"}),
        });

        let event = rx.recv().await.unwrap();
        let stream = &event.streams[0];
        assert_eq!(stream.stream.component, "pizza-service-test");
        assert_eq!(stream.stream.level, "warn");
        assert_eq!(stream.stream.log_type, "http");
        assert!(stream.values[0].1.contains(r#""password":"*****""#));
        assert!(!stream.values[0].1.contains("wrong"));
    }

    #[test]
    fn push_payload_shape() {
        let event = build_event("c", "info", "db", "1".into(), "{}".into());
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({"streams": [{"stream": {"component": "c", "level": "info", "type": "db"}, "values": [["1", "{}"]]}]})
        );
    }

    #[test]
    fn full_channel_drops_records() {
        let (sender, _rx) = mpsc::channel(1);
        let shipper = LogShipper::new("c", sender);
        shipper.db(DbLogData {
            query: "SELECT 1".into(),
            param_count: 0,
            duration_ms: 0,
            row_count: Some(1),
        });
        // Second record does not block or panic.
        shipper.unhandled_error(ErrorLogData {
            message: "boom".into(),
            status: 500,
        });
    }
}
