//! Wire error codes (JSON-RPC style).

use serde::{Deserialize, Serialize};

/// Error codes carried in [`ErrorBody::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The frame was not valid JSON.
    ParseError,
    /// The frame was JSON but not a request, or no target could be resolved.
    InvalidRequest,
    /// Unknown command or unregistered service.
    MethodNotFound,
    /// Missing or invalid parameters.
    InvalidParams,
    /// Timeouts, inactive services and anything unexpected.
    InternalError,
    /// A tool-level failure reported by a worker.
    ToolError,
}

impl ErrorCode {
    pub const fn code(self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::ToolError => -32000,
        }
    }
}

/// The `error` member of a failed [`Response`](crate::Response).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: i32,
    pub message: String,
}

impl ErrorBody {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code = self.code;
        let message = &self.message;
        write!(f, "[{code}] {message}")
    }
}
