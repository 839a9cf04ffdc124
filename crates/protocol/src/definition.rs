//! Service definitions: how to reach a tool service.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

const MAX_NAME_LEN: usize = 64;

/// A registered tool service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub name: String,
    #[serde(flatten)]
    pub target: ServiceTarget,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Where the service lives, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServiceTarget {
    /// A subprocess speaking the tool protocol over stdio.
    Local {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
    /// A tool server reachable over HTTP.
    Remote {
        endpoint: String,
        #[serde(default, rename = "connectionType")]
        connection_type: ConnectionType,
    },
}

/// HTTP flavour of a remote service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionType {
    /// POST per request; replies as JSON or an SSE body.
    #[default]
    #[serde(alias = "http")]
    StreamableHttp,
    /// Long-lived event stream plus a POST endpoint announced on it.
    Sse,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("service name must not be empty")]
    EmptyName,

    #[error("invalid service name '{0}': use letters, digits, '-', '_' or '.' (max 64)")]
    InvalidName(String),

    #[error("local service '{0}' requires a command")]
    MissingCommand(String),

    #[error("remote service '{0}' requires an endpoint")]
    MissingEndpoint(String),

    #[error("invalid service definition: {0}")]
    Malformed(String),
}

impl ServiceDefinition {
    /// A local service definition.
    pub fn local(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: ServiceTarget::Local {
                command: command.into(),
                args: Vec::new(),
                cwd: None,
                env: BTreeMap::new(),
            },
            description: None,
        }
    }

    /// A remote service definition.
    pub fn remote(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: ServiceTarget::Remote {
                endpoint: endpoint.into(),
                connection_type: ConnectionType::default(),
            },
            description: None,
        }
    }

    pub fn with_args(mut self, new_args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        if let ServiceTarget::Local { args, .. } = &mut self.target {
            *args = new_args.into_iter().map(Into::into).collect();
        }
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Decode `register` params and validate the result.
    ///
    /// When `type` is omitted it is inferred: an `endpoint` means remote,
    /// anything else local.
    pub fn from_params(params: Value) -> Result<Self, DefinitionError> {
        let mut params = params;
        let Some(object) = params.as_object_mut() else {
            return Err(DefinitionError::Malformed(
                "params must be an object".to_string(),
            ));
        };
        if !object.contains_key("type") {
            let kind = if object.contains_key("endpoint") {
                "remote"
            } else {
                "local"
            };
            object.insert("type".to_string(), Value::String(kind.to_string()));
        }

        let definition: Self = serde_json::from_value(params)
            .map_err(|e| DefinitionError::Malformed(e.to_string()))?;
        definition.validate()?;
        Ok(definition)
    }

    /// Check the name and the fields the kind requires.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        validate_name(&self.name)?;
        match &self.target {
            ServiceTarget::Local { command, .. } if command.trim().is_empty() => {
                Err(DefinitionError::MissingCommand(self.name.clone()))
            }
            ServiceTarget::Remote { endpoint, .. } if endpoint.trim().is_empty() => {
                Err(DefinitionError::MissingEndpoint(self.name.clone()))
            }
            _ => Ok(()),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self.target, ServiceTarget::Local { .. })
    }
}

/// Check that a service name is usable as a registry key.
pub fn validate_name(name: &str) -> Result<(), DefinitionError> {
    if name.is_empty() {
        return Err(DefinitionError::EmptyName);
    }
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !valid_chars || name.len() > MAX_NAME_LEN {
        return Err(DefinitionError::InvalidName(name.to_string()));
    }
    Ok(())
}
