//! Client-facing frames.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::error::{ErrorBody, ErrorCode};

/// Largest frame accepted before a newline must appear (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Request ID (can be string or number).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Number(i64),
}

impl RequestId {
    /// A fresh identifier for requests that arrived without one.
    pub fn generate() -> Self {
        Self::String(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

/// One request frame: `{id?, command, params?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl ClientRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            id: None,
            command: command.into(),
            params: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<RequestId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    /// Decode one frame.
    ///
    /// Invalid JSON is a parse error. Valid JSON that is not an object with a
    /// string `command` is an invalid request, and keeps whatever `id` could
    /// be recovered so the client can correlate the failure.
    pub fn parse(line: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(line).map_err(|e| {
            FrameError::new(None, ErrorCode::ParseError, format!("parse error: {e}"))
        })?;

        let Value::Object(mut object) = value else {
            return Err(FrameError::new(
                None,
                ErrorCode::InvalidRequest,
                "request must be a JSON object",
            ));
        };

        let id = take_id(&mut object)?;

        let command = match object.remove("command") {
            Some(Value::String(command)) if !command.trim().is_empty() => command,
            _ => {
                return Err(FrameError::new(
                    id,
                    ErrorCode::InvalidRequest,
                    "missing command",
                ));
            }
        };

        let params = match object.remove("params") {
            None | Some(Value::Null) => None,
            Some(params) => Some(params),
        };

        Ok(Self {
            id,
            command,
            params,
        })
    }

    /// Returns the request id, generating and storing one if absent.
    pub fn ensure_id(&mut self) -> RequestId {
        self.id.get_or_insert_with(RequestId::generate).clone()
    }
}

fn take_id(object: &mut Map<String, Value>) -> Result<Option<RequestId>, FrameError> {
    match object.remove("id") {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value).map(Some).map_err(|_| {
            FrameError::new(
                None,
                ErrorCode::InvalidRequest,
                "id must be a string or an integer",
            )
        }),
    }
}

/// A frame that could not be turned into a [`ClientRequest`].
#[derive(Debug, Clone, Error)]
#[error("{error}")]
pub struct FrameError {
    pub id: Option<RequestId>,
    pub error: ErrorBody,
}

impl FrameError {
    pub fn new(id: Option<RequestId>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            id,
            error: ErrorBody::new(code, message),
        }
    }

    pub fn into_response(self) -> Response {
        Response::failure(self.id, self.error)
    }
}

/// One response frame: `{id, success, result?, error?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: Option<RequestId>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            id: Some(id),
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<RequestId>, error: ErrorBody) -> Self {
        Self {
            id,
            success: false,
            result: None,
            error: Some(error),
        }
    }

    /// The error code, if this is a failure.
    pub fn error_code(&self) -> Option<i32> {
        self.error.as_ref().map(|e| e.code)
    }
}

/// A tool a service exposes, as reported by its worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "empty_schema")]
    pub input_schema: Value,
}

fn empty_schema() -> Value {
    Value::Object(Map::new())
}

/// Serialize a message as one newline-terminated frame.
pub fn encode_line<T: Serialize>(message: &T) -> serde_json::Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec(message)?;
    bytes.push(b'\n');
    Ok(bytes)
}
