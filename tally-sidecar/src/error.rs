use reqwest::StatusCode;
use thiserror::Error;

/// Result alias for sidecar requests.
pub type SidecarResult<T> = Result<T, SidecarError>;

/// Failure surfaced by the sidecar client once its retry budget is spent.
#[derive(Debug, Error)]
pub enum SidecarError {
    #[error("request to {uri} failed: {source}")]
    Transport {
        uri: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{uri} responded with status {status}: {body}")]
    Status {
        uri: String,
        status: StatusCode,
        body: String,
    },
    #[error("failed to decode response from {uri}: {source}")]
    Decode {
        uri: String,
        #[source]
        source: serde_json::Error,
    },
}

impl SidecarError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            SidecarError::Status { status, .. } => Some(*status),
            SidecarError::Transport { source, .. } => source.status(),
            SidecarError::Decode { .. } => None,
        }
    }

    /// The service answered that the resource does not exist.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
    }

    /// Whether another attempt could plausibly succeed.
    ///
    /// A 404 is an answer, not an outage, and a body that fails to decode will
    /// decode the same way next time.
    pub fn is_retryable(&self) -> bool {
        match self {
            SidecarError::Decode { .. } => false,
            _ => !self.is_not_found(),
        }
    }
}
