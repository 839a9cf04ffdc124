//! Worker error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to connect to '{service}': {source}")]
    Connect {
        service: String,
        #[source]
        source: mcp::Error,
    },

    #[error("failed to list tools for '{service}': {source}")]
    ListTools {
        service: String,
        #[source]
        source: mcp::Error,
    },

    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
