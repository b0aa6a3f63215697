//! Client error types

use thiserror::Error;

/// Errors from store requests and the realtime channel
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("No data on realtime stream for {0:?}")]
    Idle(std::time::Duration),

    #[error("{0}")]
    Fatal(String),
}

impl ClientError {
    /// Whether retrying the same request may succeed
    ///
    /// Network failures and 5xx / 408 / 429 responses are transient; other
    /// statuses and local validation failures are not.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Http(e) => !e.is_decode() && !e.is_builder(),
            ClientError::Status { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            ClientError::Idle(_) => true,
            ClientError::Decode(_)
            | ClientError::NotFound(_)
            | ClientError::InvalidInput(_)
            | ClientError::Fatal(_) => false,
        }
    }
}

impl From<wpq_common::Error> for ClientError {
    fn from(err: wpq_common::Error) -> Self {
        use wpq_common::Error;
        match err {
            Error::NotFound(what) => ClientError::NotFound(what),
            Error::InvalidInput(msg) => ClientError::InvalidInput(msg),
            Error::Json(e) => ClientError::Decode(e),
            other => ClientError::Fatal(other.to_string()),
        }
    }
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;
