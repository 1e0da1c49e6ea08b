use reqwest::StatusCode;
use shared::error::ApiError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{}", .0.message)]
    Invalid(ApiError),
    #[error("server_url must start with http:// or https://")]
    InvalidServerUrl,
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server rejected request ({status}): {}", .error.message)]
    Rejected { status: StatusCode, error: ApiError },
    #[error("server returned {0} without an error body")]
    Status(StatusCode),
    #[error("live channel is not connected")]
    Disconnected,
    #[error("timed out waiting for live ack")]
    AckTimeout,
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("invalid payload: {0}")]
    Decode(#[from] serde_json::Error),
}

impl SyncError {
    /// Whether retrying the same request later could succeed. Client errors
    /// from the server are final.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Http(_)
            | SyncError::Disconnected
            | SyncError::AckTimeout
            | SyncError::WebSocket(_) => true,
            SyncError::Rejected { status, .. } | SyncError::Status(status) => {
                status.is_server_error()
            }
            SyncError::Invalid(_) | SyncError::InvalidServerUrl | SyncError::Decode(_) => false,
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
