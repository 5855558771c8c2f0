//! Platform client error types.

use thiserror::Error;

pub type PlatformResult<T> = Result<T, PlatformError>;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("SSE framing error: {0}")]
    SseFraming(String),

    #[error("Event decode error: {0}")]
    EventDecode(String),

    /// The SSE connection dropped before a terminal event arrived.
    ///
    /// Carries the last execution id observed on the stream, if any, so
    /// workflow executions can request continuation.
    #[error("Stream interrupted{}", .execution_id.as_deref().map(|id| format!(" (execution {id})")).unwrap_or_default())]
    StreamInterrupted { execution_id: Option<String> },

    #[error("Invalid base URL: {0}")]
    BaseUrl(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl PlatformError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// True when the failure is a dropped connection that a workflow
    /// execution may recover from by resuming.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::StreamInterrupted { .. } | Self::Http(_))
    }
}
