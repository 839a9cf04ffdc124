//! A tool-server client over any of the supported transports.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use rmcp::ServiceExt;
use rmcp::model::CallToolRequestParams;
use rmcp::service::{Peer, QuitReason, RoleClient, RunningService, ServiceError};
use rmcp::transport::{ConfigureCommandExt, StreamableHttpClientTransport, TokioChildProcess};
use serde_json::Value;
use tokio::process::Command;
use tokio::sync::{oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::protocol::{CallToolResult, InitializeResult, Tool, convert};
use crate::sse;

/// Default timeout for a single request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// How to start a local server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StdioConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
}

/// Where a server lives and how to talk to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerTarget {
    Stdio(StdioConfig),
    StreamableHttp { endpoint: String },
    Sse { endpoint: String },
}

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disconnect {
    /// The server exited or closed its end of the transport.
    Closed,
    /// The connection was shut down from this side.
    Cancelled,
    /// The connection task itself failed.
    Failed(String),
}

impl fmt::Display for Disconnect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "server connection closed"),
            Self::Cancelled => write!(f, "connection cancelled"),
            Self::Failed(reason) => write!(f, "connection task failed: {reason}"),
        }
    }
}

type Service = RunningService<RoleClient, ()>;

/// An initialized connection to one server.
///
/// Requests may be issued concurrently from shared references.
pub struct Client {
    peer: Peer<RoleClient>,
    server_info: InitializeResult,
    timeout: Duration,
    closed: watch::Receiver<Option<Disconnect>>,
    stop: Option<oneshot::Sender<()>>,
    service: JoinHandle<()>,
}

impl Client {
    /// Open the transport and perform the handshake, both within `timeout`.
    ///
    /// `timeout` also bounds every later request.
    pub async fn connect(target: &ServerTarget, timeout: Duration) -> Result<Self> {
        let service = tokio::time::timeout(timeout, open(target, timeout))
            .await
            .map_err(|_| Error::Timeout {
                method: "initialize".to_string(),
            })??;

        let server_info: InitializeResult = match service.peer_info() {
            Some(info) => convert(info)?,
            None => InitializeResult::default(),
        };
        let server = server_info
            .server_info
            .as_ref()
            .map(|info| format!("{} {}", info.name, info.version))
            .unwrap_or_default();
        info!(server = %server, protocol = %server_info.protocol_version, "server initialized");

        let peer = service.peer().clone();
        let (closed_tx, closed) = watch::channel(None);
        let (stop, stopped) = oneshot::channel();
        let service = tokio::spawn(supervise(service, stopped, closed_tx));
        Ok(Self {
            peer,
            server_info,
            timeout,
            closed,
            stop: Some(stop),
            service,
        })
    }

    pub fn server_info(&self) -> &InitializeResult {
        &self.server_info
    }

    /// Every tool the server offers, following pagination cursors.
    pub async fn list_tools(&self) -> Result<Vec<Tool>> {
        let tools = self.within("tools/list", self.peer.list_all_tools()).await?;
        debug!(count = tools.len(), "listed tools");
        tools.iter().map(|tool| convert(tool)).collect()
    }

    /// Call a tool. A result with `is_error` set is returned, not raised.
    pub async fn call_tool(&self, name: &str, arguments: Option<Value>) -> Result<CallToolResult> {
        let arguments = match arguments {
            None | Some(Value::Null) => None,
            Some(Value::Object(map)) => Some(map),
            Some(other) => return Err(Error::InvalidArguments(other.to_string())),
        };
        let params = CallToolRequestParams {
            name: name.to_string().into(),
            arguments,
            meta: None,
            task: None,
        };
        let result = self.within("tools/call", self.peer.call_tool(params)).await?;
        convert(&result)
    }

    /// Resolves when the connection ends.
    pub async fn closed(&self) -> Disconnect {
        let mut closed = self.closed.clone();
        match closed.wait_for(Option::is_some).await {
            Ok(reason) => {
                let reason: Option<Disconnect> = (*reason).clone();
                reason.unwrap_or(Disconnect::Closed)
            }
            Err(_) => Disconnect::Closed,
        }
    }

    /// Close the connection. A local server gets `grace` before it is abandoned.
    pub async fn shutdown(mut self, grace: Duration) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if tokio::time::timeout(grace, &mut self.service).await.is_err() {
            warn!(grace_ms = grace.as_millis() as u64, "server did not stop in time");
            self.service.abort();
        }
    }

    async fn within<T>(
        &self,
        method: &str,
        request: impl Future<Output = std::result::Result<T, ServiceError>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.timeout, request).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(Error::Timeout {
                method: method.to_string(),
            }),
        }
    }
}

async fn open(target: &ServerTarget, timeout: Duration) -> Result<Service> {
    match target {
        ServerTarget::Stdio(config) => {
            let command = Command::new(&config.command).configure(|cmd| {
                cmd.args(&config.args).envs(&config.env);
                if let Some(cwd) = &config.cwd {
                    cmd.current_dir(cwd);
                }
            });
            let transport = TokioChildProcess::new(command).map_err(|source| Error::Spawn {
                command: config.command.clone(),
                source,
            })?;
            ().serve(transport).await.map_err(handshake_error)
        }
        ServerTarget::StreamableHttp { endpoint } => {
            sse::parse_endpoint(endpoint)?;
            let transport = StreamableHttpClientTransport::from_uri(endpoint.as_str());
            ().serve(transport).await.map_err(handshake_error)
        }
        ServerTarget::Sse { endpoint } => {
            let transport = sse::connect(endpoint, timeout).await?;
            ().serve(transport).await.map_err(handshake_error)
        }
    }
}

fn handshake_error(err: impl fmt::Display) -> Error {
    Error::Handshake(err.to_string())
}

/// Own the running service until it quits or `stopped` fires, then publish why.
async fn supervise(
    service: Service,
    stopped: oneshot::Receiver<()>,
    closed: watch::Sender<Option<Disconnect>>,
) {
    let token = service.cancellation_token();
    let waiting = service.waiting();
    tokio::pin!(waiting);
    let reason = tokio::select! {
        reason = &mut waiting => reason,
        _ = stopped => {
            token.cancel();
            waiting.await
        }
    };
    let disconnect = disconnect(reason);
    debug!(%disconnect, "connection ended");
    closed.send_replace(Some(disconnect));
}

fn disconnect(reason: std::result::Result<QuitReason, JoinError>) -> Disconnect {
    match reason {
        Ok(QuitReason::Cancelled) => Disconnect::Cancelled,
        Ok(_) => Disconnect::Closed,
        Err(err) => Disconnect::Failed(err.to_string()),
    }
}
