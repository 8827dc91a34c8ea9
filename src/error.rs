use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StreamError>;

/// Failures seen while streaming or pulling flag data.
///
/// None of these ever escape the stream worker; they only decide whether
/// the worker reconnects or stops for good.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("server responded with HTTP {status}")]
    Http { status: u16 },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("connection not established within {0:?}")]
    ConnectTimeout(Duration),

    #[error("event stream ended")]
    StreamEnded,

    #[error("malformed payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("unrecognized data path '{0}'")]
    InvalidPath(String),

    #[error("invalid URL '{0}'")]
    InvalidUrl(String),

    /// A follow-up pull for an indirect event failed. Only the stream
    /// endpoint decides whether to give up; the next `put` repairs the gap.
    #[error("indirect pull failed: {0}")]
    Pull(#[source] Box<StreamError>),

    #[error("stream processor closed")]
    Closed,
}

impl StreamError {
    /// Whether retrying with backoff can ever succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            StreamError::Http { status } => is_http_error_recoverable(*status),
            StreamError::Network(e) => match e.status() {
                Some(status) => is_http_error_recoverable(status.as_u16()),
                None => true,
            },
            StreamError::ConnectTimeout(_) | StreamError::StreamEnded => true,
            StreamError::Decode(_) | StreamError::InvalidPath(_) => true,
            StreamError::Pull(_) => true,
            StreamError::InvalidUrl(_) => false,
            StreamError::Closed => false,
        }
    }
}

/// 400, 408 and 429 are worth retrying; any other 4xx means the key or the
/// endpoint is wrong and will stay wrong.
pub fn is_http_error_recoverable(status: u16) -> bool {
    if (400..500).contains(&status) {
        matches!(status, 400 | 408 | 429)
    } else {
        true
    }
}
