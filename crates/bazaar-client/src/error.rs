use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server rejected the token. The stored token has been cleared.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("request failed ({status}): {message}")]
    Api { status: StatusCode, message: String },
}

impl ClientError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Http(e) => e.status(),
            Self::Unauthorized(_) => Some(StatusCode::UNAUTHORIZED),
            Self::Api { status, .. } => Some(*status),
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
