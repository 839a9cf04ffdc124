//! Translating between relay IPC types and tool-server client types.

use std::path::PathBuf;

use mcp::{CallToolResult, ServerTarget, StdioConfig, Tool};
use protocol::{ConnectionType, ServiceDefinition, ServiceTarget, ToolDescriptor, ToolOutcome};

/// How to reach the server a definition describes.
pub fn server_target(definition: &ServiceDefinition) -> ServerTarget {
    match &definition.target {
        ServiceTarget::Local {
            command,
            args,
            cwd,
            env,
        } => ServerTarget::Stdio(StdioConfig {
            command: command.clone(),
            args: args.clone(),
            env: env.clone(),
            cwd: cwd.as_ref().map(PathBuf::from),
        }),
        ServiceTarget::Remote {
            endpoint,
            connection_type: ConnectionType::StreamableHttp,
        } => ServerTarget::StreamableHttp {
            endpoint: endpoint.clone(),
        },
        ServiceTarget::Remote {
            endpoint,
            connection_type: ConnectionType::Sse,
        } => ServerTarget::Sse {
            endpoint: endpoint.clone(),
        },
    }
}

pub fn descriptor(tool: Tool) -> ToolDescriptor {
    ToolDescriptor {
        name: tool.name,
        description: tool.description,
        input_schema: tool.input_schema,
    }
}

/// A result flagged `isError` becomes a failed outcome carrying its text.
pub fn outcome(result: mcp::Result<CallToolResult>) -> ToolOutcome {
    match result {
        Ok(result) if result.is_error => {
            let text = result.text();
            if text.is_empty() {
                ToolOutcome::failed("tool reported an error")
            } else {
                ToolOutcome::failed(text)
            }
        }
        Ok(result) => match serde_json::to_value(&result) {
            Ok(value) => ToolOutcome::ok(value),
            Err(err) => ToolOutcome::failed(format!("failed to encode tool result: {err}")),
        },
        Err(err) => ToolOutcome::failed(err.to_string()),
    }
}
