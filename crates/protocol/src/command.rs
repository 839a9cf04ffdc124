//! Typed client commands.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::definition::{DefinitionError, ServiceDefinition, ServiceTarget, validate_name};
use crate::wire::ToolDescriptor;

/// A decoded client command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// All services, or one by name.
    List { name: Option<String> },
    /// Cached tool descriptors for one or all services.
    ListTools { name: Option<String> },
    /// Start a worker and wait until it is ready.
    Spawn(SpawnParams),
    /// Stop the worker and unregister the service.
    Shutdown { name: String },
    /// Stop the worker, keep the registration.
    Unspawn { name: String },
    Register(ServiceDefinition),
    Unregister { name: String },
    ToolCall(ToolCallRequest),
    /// Seed the tool cache without starting a worker.
    CacheTools {
        name: String,
        tools: Vec<ToolDescriptor>,
    },
    /// Stop every worker and clear every table.
    Reset,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unknown command: {0}")]
    Unknown(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),
}

impl From<DefinitionError> for CommandError {
    fn from(err: DefinitionError) -> Self {
        Self::InvalidParams(err.to_string())
    }
}

/// Params of `spawn`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SpawnParams {
    pub name: String,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub cwd: Option<String>,
}

impl SpawnParams {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: None,
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
        }
    }

    /// The ad-hoc local definition carried by this request, if it names a command.
    pub fn override_definition(&self) -> Option<ServiceDefinition> {
        let command = self.command.as_ref().filter(|c| !c.trim().is_empty())?;
        Some(ServiceDefinition {
            name: self.name.clone(),
            target: ServiceTarget::Local {
                command: command.clone(),
                args: self.args.clone(),
                cwd: self.cwd.clone(),
                env: self.env.clone(),
            },
            description: None,
        })
    }
}

/// Params of `toolcall`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolCallRequest {
    /// Target service; when absent an arbitrary active service is used.
    #[serde(default)]
    pub name: Option<String>,
    /// Tool name on the target service.
    pub method: String,
    /// Tool arguments.
    #[serde(default = "empty_object")]
    pub params: Value,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

#[derive(Deserialize)]
struct NameParam {
    name: String,
}

#[derive(Deserialize)]
struct OptionalNameParam {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Deserialize)]
struct CacheToolsParams {
    name: String,
    tools: Vec<ToolDescriptor>,
}

impl Command {
    /// Decode a command name and its params. Names are case-insensitive.
    pub fn parse(command: &str, params: Option<Value>) -> Result<Self, CommandError> {
        let params = params.unwrap_or_else(empty_object);
        let parsed = match command.trim().to_ascii_lowercase().as_str() {
            "list" => Self::List {
                name: optional_name(params)?,
            },
            "listtools" => Self::ListTools {
                name: optional_name(params)?,
            },
            "spawn" => {
                let spawn: SpawnParams = decode(params)?;
                validate_name(&spawn.name)?;
                Self::Spawn(spawn)
            }
            "shutdown" => Self::Shutdown {
                name: required_name(params)?,
            },
            "unspawn" => Self::Unspawn {
                name: required_name(params)?,
            },
            "register" => Self::Register(ServiceDefinition::from_params(params)?),
            "unregister" => Self::Unregister {
                name: required_name(params)?,
            },
            "toolcall" => {
                let call: ToolCallRequest = decode(params)?;
                if call.method.trim().is_empty() {
                    return Err(CommandError::InvalidParams(
                        "method must not be empty".to_string(),
                    ));
                }
                Self::ToolCall(call)
            }
            "cachetools" => {
                let CacheToolsParams { name, tools } = decode(params)?;
                validate_name(&name)?;
                Self::CacheTools { name, tools }
            }
            "reset" => Self::Reset,
            _ => return Err(CommandError::Unknown(command.to_string())),
        };
        Ok(parsed)
    }

    /// The wire name of this command.
    pub fn name(&self) -> &'static str {
        match self {
            Self::List { .. } => "list",
            Self::ListTools { .. } => "listtools",
            Self::Spawn(_) => "spawn",
            Self::Shutdown { .. } => "shutdown",
            Self::Unspawn { .. } => "unspawn",
            Self::Register(_) => "register",
            Self::Unregister { .. } => "unregister",
            Self::ToolCall(_) => "toolcall",
            Self::CacheTools { .. } => "cachetools",
            Self::Reset => "reset",
        }
    }
}

fn decode<T: DeserializeOwned>(params: Value) -> Result<T, CommandError> {
    serde_json::from_value(params).map_err(|e| CommandError::InvalidParams(e.to_string()))
}

fn required_name(params: Value) -> Result<String, CommandError> {
    let NameParam { name } = decode(params)?;
    validate_name(&name)?;
    Ok(name)
}

fn optional_name(params: Value) -> Result<Option<String>, CommandError> {
    let OptionalNameParam { name } = decode(params)?;
    Ok(name.filter(|n| !n.is_empty()))
}
