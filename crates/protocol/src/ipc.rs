//! Messages exchanged between the relay and a worker process.
//!
//! Both directions are newline-delimited JSON on the worker's stdio. Anything
//! the worker writes to stderr is diagnostic text, not part of this contract.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::definition::ServiceDefinition;
use crate::wire::ToolDescriptor;

/// Relay → worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum WorkerCommand {
    /// Bind the worker to a service and connect to it.
    Init { params: InitParams },
    /// Invoke one tool. `id` is echoed back in the matching `tool_result`.
    #[serde(rename = "toolcall")]
    ToolCall { id: String, params: ToolInvocation },
    /// Close the connection and exit.
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitParams {
    pub service_name: String,
    pub service_definition: ServiceDefinition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

/// Worker → relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkerEvent {
    /// Connected and tools discovered.
    Ready { params: ReadyParams },
    /// Outcome of a `toolcall`.
    ToolResult { id: String, result: ToolOutcome },
    /// The underlying tool service went away.
    Closed { params: ClosedParams },
    /// A failure the worker could not recover from.
    Error { params: ErrorParams },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyParams {
    pub service_name: String,
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// A string, or an object with a `message`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl ToolOutcome {
    pub fn ok(result: Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(Value::String(message.into())),
        }
    }

    /// Human-readable error text for a failed outcome.
    pub fn error_message(&self) -> String {
        match &self.error {
            Some(Value::String(message)) => message.clone(),
            Some(Value::Object(object)) => object
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| Value::Object(object.clone()).to_string()),
            Some(other) => other.to_string(),
            None => "tool call failed".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosedParams {
    pub service_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorParams {
    pub service_name: String,
    pub error: String,
}
