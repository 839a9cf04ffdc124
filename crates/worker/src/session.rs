//! The worker's command loop.
//!
//! Commands arrive as JSON lines on the input, events leave as JSON lines on
//! the output. Tool calls run concurrently; everything else is handled in
//! order.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use mcp::Client;
use protocol::{
    ClosedParams, ErrorParams, InitParams, ReadyParams, ToolDescriptor, ToolInvocation,
    ToolOutcome, WorkerCommand, WorkerEvent, encode_line,
};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::target::{descriptor, outcome, server_target};

#[derive(Debug, Clone, Copy)]
pub struct Settings {
    /// Per-request timeout towards the tool server.
    pub request_timeout: Duration,
    /// How long a local server gets to exit before it is killed.
    pub shutdown_grace: Duration,
}

/// How the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// Asked to stop, or input closed.
    Clean,
    /// The tool server could not be reached or went away.
    Failed,
}

struct Connected {
    service: String,
    client: Arc<Client>,
}

/// Connection plus tool listing for one `init`, polled alongside input.
struct Connecting {
    service: String,
    future: Pin<Box<dyn Future<Output = Result<(Connected, Vec<ToolDescriptor>)>> + Send>>,
}

/// Run until `shutdown`, end of input, or loss of the tool server.
pub async fn run<R, W>(input: R, output: W, settings: Settings) -> Exit
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (events, queue) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_events(output, queue));

    let mut lines = BufReader::new(input).lines();
    let mut connecting: Option<Connecting> = None;
    let mut connected: Option<Connected> = None;
    let mut calls = JoinSet::new();

    let exit = loop {
        tokio::select! {
            line = lines.next_line() => {
                let command = match line {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        debug!("input closed");
                        break Exit::Clean;
                    }
                    Err(err) => {
                        warn!(error = %err, "failed to read input");
                        break Exit::Clean;
                    }
                };
                let command = match serde_json::from_str::<WorkerCommand>(&command) {
                    Ok(command) => command,
                    Err(err) => {
                        warn!(error = %err, "ignoring malformed command");
                        continue;
                    }
                };
                match command {
                    WorkerCommand::Init { params } => {
                        if let Some(current) = &connected {
                            warn!(service = %current.service, "already initialized, ignoring init");
                            continue;
                        }
                        if let Some(pending) = &connecting {
                            warn!(service = %pending.service, "already initializing, ignoring init");
                            continue;
                        }
                        connecting = Some(Connecting {
                            service: params.service_name.clone(),
                            future: Box::pin(connect(params, settings)),
                        });
                    }
                    WorkerCommand::ToolCall { id, params } => match &connected {
                        Some(current) => {
                            let client = current.client.clone();
                            let events = events.clone();
                            calls.spawn(call_tool(client, id, params, events));
                        }
                        None => {
                            let _ = events.send(WorkerEvent::ToolResult {
                                id,
                                result: ToolOutcome::failed("worker not initialized"),
                            });
                        }
                    },
                    WorkerCommand::Shutdown => {
                        debug!("shutdown requested");
                        break Exit::Clean;
                    }
                }
            }
            result = until_connected(&mut connecting) => {
                let service = connecting
                    .take()
                    .map(|pending| pending.service)
                    .unwrap_or_default();
                match result {
                    Ok((current, tools)) => {
                        info!(service = %service, tools = tools.len(), "ready");
                        let _ = events.send(WorkerEvent::Ready {
                            params: ReadyParams {
                                service_name: service,
                                tools,
                            },
                        });
                        connected = Some(current);
                    }
                    Err(err) => {
                        error!(service = %service, error = %err, "initialization failed");
                        let _ = events.send(WorkerEvent::Error {
                            params: ErrorParams {
                                service_name: service,
                                error: err.to_string(),
                            },
                        });
                        break Exit::Failed;
                    }
                }
            }
            disconnect = server_closed(connected.as_ref()) => {
                let service = connected
                    .as_ref()
                    .map(|current| current.service.clone())
                    .unwrap_or_default();
                warn!(service = %service, reason = %disconnect, "tool server went away");
                let _ = events.send(WorkerEvent::Closed {
                    params: ClosedParams {
                        service_name: service,
                        error: Some(disconnect.to_string()),
                        signal: None,
                    },
                });
                break Exit::Failed;
            }
            Some(joined) = calls.join_next(), if !calls.is_empty() => {
                if let Err(err) = joined {
                    warn!(error = %err, "tool call task failed");
                }
            }
        }
    };

    if let Some(pending) = connecting.take() {
        debug!(service = %pending.service, "abandoning connection attempt");
    }
    calls.abort_all();
    while calls.join_next().await.is_some() {}
    if let Some(current) = connected {
        match Arc::try_unwrap(current.client) {
            Ok(client) => client.shutdown(settings.shutdown_grace).await,
            Err(_) => warn!(service = %current.service, "client still shared at shutdown"),
        }
    }

    drop(events);
    match writer.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(error = %err, "failed to write events"),
        Err(err) => warn!(error = %err, "event writer failed"),
    }
    exit
}

/// Connect, then list tools. A connection that cannot list its tools is shut down.
async fn connect(params: InitParams, settings: Settings) -> Result<(Connected, Vec<ToolDescriptor>)> {
    let service = params.service_name;
    let target = server_target(&params.service_definition);
    info!(service = %service, "connecting to tool server");

    let client = Client::connect(&target, settings.request_timeout)
        .await
        .map_err(|source| Error::Connect {
            service: service.clone(),
            source,
        })?;
    let tools = match client.list_tools().await {
        Ok(tools) => tools,
        Err(source) => {
            client.shutdown(settings.shutdown_grace).await;
            return Err(Error::ListTools { service, source });
        }
    };
    let connected = Connected {
        service,
        client: Arc::new(client),
    };
    Ok((connected, tools.into_iter().map(descriptor).collect()))
}

async fn until_connected(
    connecting: &mut Option<Connecting>,
) -> Result<(Connected, Vec<ToolDescriptor>)> {
    match connecting {
        Some(pending) => pending.future.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn server_closed(connected: Option<&Connected>) -> mcp::Disconnect {
    match connected {
        Some(current) => current.client.closed().await,
        None => std::future::pending().await,
    }
}

async fn call_tool(
    client: Arc<Client>,
    id: String,
    invocation: ToolInvocation,
    events: mpsc::UnboundedSender<WorkerEvent>,
) {
    let arguments = match invocation.args {
        Value::Null => None,
        args => Some(args),
    };
    debug!(id = %id, tool = %invocation.name, "calling tool");
    let result = outcome(client.call_tool(&invocation.name, arguments).await);
    let _ = events.send(WorkerEvent::ToolResult { id, result });
}

async fn write_events<W>(mut output: W, mut queue: mpsc::UnboundedReceiver<WorkerEvent>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(event) = queue.recv().await {
        output.write_all(&encode_line(&event)?).await?;
        output.flush().await?;
    }
    Ok(())
}
