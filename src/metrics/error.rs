use thiserror::Error;

/// Failure to deliver telemetry to a remote collector.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Request never completed (DNS, connect, TLS, timeout)
    #[error("transport error: {0}")]
    Transport(String),

    /// Collector answered with a non-success status
    #[error("collector rejected payload ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// Payload could not be serialized
    #[error("failed to encode payload: {0}")]
    Encode(String),
}

impl From<reqwest::Error> for SinkError {
    fn from(e: reqwest::Error) -> Self {
        SinkError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for SinkError {
    fn from(e: serde_json::Error) -> Self {
        SinkError::Encode(e.to_string())
    }
}

/// Failure of a one-shot report that reads the database before sending.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error(transparent)]
    Database(#[from] crate::database::DbError),

    #[error(transparent)]
    Sink(#[from] SinkError),
}
