use thiserror::Error;

/// Failures below the frame layer: the request itself or the response body.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("server responded with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("connection lost while streaming: {0}")]
    Interrupted(String),
    #[error("stream ended before completion")]
    Truncated,
    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid endpoint url: {0}")]
    Url(#[from] url::ParseError),
}

impl TransportError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Status { status: 401, .. })
    }
}

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Error frame sent by the backend; the text is the backend's message.
    #[error("{0}")]
    Backend(String),
    #[error("an exchange is already in flight")]
    Busy,
    #[error("query is empty")]
    EmptyQuery,
}

impl ExchangeError {
    /// Whether the failure came from the network layer rather than the service.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
