//! Relay error types.

use protocol::{CommandError, DefinitionError, ErrorBody, ErrorCode};
use thiserror::Error;

/// Relay errors.
///
/// Every variant maps to a wire [`ErrorCode`], so any failure inside command
/// handling can be answered on the originating connection.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// The named service is not in the registry.
    #[error("service '{0}' is not registered")]
    NotRegistered(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error(transparent)]
    Definition(#[from] DefinitionError),

    /// A tool call named no service and none is active.
    #[error("no active service to route the request to")]
    NoActiveService,

    #[error("service '{0}' is not active")]
    NotActive(String),

    #[error("service '{0}' is starting and not ready yet")]
    NotReady(String),

    #[error("request timed out after {0} ms")]
    RequestTimeout(u128),

    #[error("spawn of service '{service}' timed out after {timeout_ms} ms")]
    SpawnTimeout { service: String, timeout_ms: u128 },

    /// The service exceeded its restart attempts.
    #[error("service '{service}' failed to start: {message}")]
    SpawnFailed { service: String, message: String },

    /// The request was abandoned because its target went away.
    #[error("request cancelled: {0}")]
    Cancelled(String),

    #[error("failed to launch worker for '{service}': {source}")]
    Launch {
        service: String,
        #[source]
        source: std::io::Error,
    },

    #[error("worker for service '{0}' is gone")]
    WorkerGone(String),

    /// A tool-level failure reported by a worker.
    #[error("{0}")]
    Tool(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The wire code this error is reported with.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownCommand(_) | Self::NotRegistered(_) => ErrorCode::MethodNotFound,
            Self::InvalidParams(_) | Self::Definition(_) => ErrorCode::InvalidParams,
            Self::NoActiveService => ErrorCode::InvalidRequest,
            Self::Tool(_) => ErrorCode::ToolError,
            Self::NotActive(_)
            | Self::NotReady(_)
            | Self::RequestTimeout(_)
            | Self::SpawnTimeout { .. }
            | Self::SpawnFailed { .. }
            | Self::Cancelled(_)
            | Self::Launch { .. }
            | Self::WorkerGone(_)
            | Self::Internal(_)
            | Self::Bind { .. }
            | Self::Io(_) => ErrorCode::InternalError,
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody::new(self.code(), self.to_string())
    }
}

impl From<CommandError> for Error {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::Unknown(command) => Self::UnknownCommand(command),
            CommandError::InvalidParams(message) => Self::InvalidParams(message),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
