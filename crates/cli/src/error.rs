//! CLI error types.

use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;
use crate::telemetry::TelemetryError;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The worker executable could not be found.
    #[error("worker executable not found at {path}; pass --worker or set worker_command")]
    WorkerNotFound { path: PathBuf },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    /// An error occurred in the relay.
    #[error(transparent)]
    Relay(#[from] relay::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
