//! Tool-server client errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("initialization failed: {0}")]
    Handshake(String),

    #[error("request failed: {0}")]
    Service(#[from] rmcp::service::ServiceError),

    #[error("server connection closed")]
    Closed,

    #[error("timeout waiting for {method} response")]
    Timeout { method: String },

    #[error("tool arguments must be a JSON object, got {0}")]
    InvalidArguments(String),

    #[error("failed to convert message: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;
