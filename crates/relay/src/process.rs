//! Workers as child processes.
//!
//! Each worker is the worker executable with piped stdio. Commands are
//! written to its stdin as JSON lines. Its stdout is decoded into
//! [`WorkerEvent`]s and its stderr is forwarded line by line as diagnostics.
//! When the process ends, an `Exited` notice follows the last of its output.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use protocol::{ServiceDefinition, WorkerCommand, WorkerEvent, encode_line};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::actor::{RelayHandle, RelayMessage};
use crate::error::{Error, Result};
use crate::supervisor::{ExitInfo, Generation, Launcher, WorkerLink, WorkerNotice, WorkerSignal};

/// How long to wait for output readers to drain after the process exits.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Launches the worker executable once per service.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    handle: RelayHandle,
    shutdown_grace: Duration,
    exit_guard: Option<mpsc::Sender<()>>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>, handle: RelayHandle, shutdown_grace: Duration) -> Self {
        Self {
            program: program.into(),
            handle,
            shutdown_grace,
            exit_guard: None,
        }
    }

    /// Every worker's exit task holds a clone of `guard` until the process
    /// is reaped, so the receiver closes once all workers are gone.
    pub fn with_exit_guard(mut self, guard: mpsc::Sender<()>) -> Self {
        self.exit_guard = Some(guard);
        self
    }
}

impl Launcher for ProcessLauncher {
    fn launch(
        &mut self,
        definition: &ServiceDefinition,
        generation: Generation,
    ) -> Result<Box<dyn WorkerLink>> {
        let service = definition.name.clone();
        let mut child = Command::new(&self.program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| Error::Launch {
                service: service.clone(),
                source,
            })?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(Error::Internal(format!(
                "worker for '{service}' started without piped stdio"
            )));
        };

        let pid = child.id();
        let notifier = Notifier {
            service: service.clone(),
            generation,
            handle: self.handle.clone(),
        };
        let (commands, queue) = mpsc::unbounded_channel();
        let (kill, killed) = oneshot::channel();
        let alive = Arc::new(AtomicBool::new(true));
        let alive_flag = alive.clone();
        let grace = self.shutdown_grace;

        tokio::spawn(write_commands(stdin, queue, notifier.clone()));
        let readers = vec![
            tokio::spawn(read_events(stdout, notifier.clone())),
            tokio::spawn(read_diagnostics(stderr, notifier.clone())),
        ];
        let guard = self.exit_guard.clone();
        tokio::spawn(async move {
            wait_for_exit(child, killed, grace, readers, notifier, alive_flag).await;
            drop(guard);
        });

        debug!(service = %service, generation, ?pid, "spawned worker process");
        Ok(Box::new(ProcessLink {
            service,
            commands: Some(commands),
            kill: Some(kill),
            alive,
        }))
    }
}

#[derive(Debug, Clone)]
struct Notifier {
    service: String,
    generation: Generation,
    handle: RelayHandle,
}

impl Notifier {
    fn notify(&self, signal: WorkerSignal) {
        self.handle.send(RelayMessage::Worker(WorkerNotice {
            service: self.service.clone(),
            generation: self.generation,
            signal,
        }));
    }
}

struct ProcessLink {
    service: String,
    commands: Option<mpsc::UnboundedSender<WorkerCommand>>,
    kill: Option<oneshot::Sender<()>>,
    alive: Arc<AtomicBool>,
}

impl WorkerLink for ProcessLink {
    fn send(&mut self, command: WorkerCommand) -> Result<()> {
        let commands = self
            .commands
            .as_ref()
            .ok_or_else(|| Error::WorkerGone(self.service.clone()))?;
        commands
            .send(command)
            .map_err(|_| Error::WorkerGone(self.service.clone()))
    }

    fn terminate(&mut self) {
        // Closing the queue ends stdin once queued commands are written.
        self.commands.take();
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
}

async fn write_commands(
    mut stdin: ChildStdin,
    mut queue: mpsc::UnboundedReceiver<WorkerCommand>,
    notifier: Notifier,
) {
    while let Some(command) = queue.recv().await {
        let bytes = match encode_line(&command) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(service = %notifier.service, error = %err, "failed to encode worker command");
                continue;
            }
        };
        if let Err(err) = stdin.write_all(&bytes).await {
            debug!(service = %notifier.service, error = %err, "worker stdin closed");
            return;
        }
        if let Err(err) = stdin.flush().await {
            debug!(service = %notifier.service, error = %err, "worker stdin closed");
            return;
        }
    }
}

async fn read_events(stdout: impl AsyncRead + Unpin, notifier: Notifier) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<WorkerEvent>(line) {
                    Ok(event) => notifier.notify(WorkerSignal::Event(event)),
                    Err(err) => {
                        debug!(service = %notifier.service, error = %err, "non-protocol worker output");
                        notifier.notify(WorkerSignal::Diagnostic(line.to_string()));
                    }
                }
            }
            Ok(None) => return,
            Err(err) => {
                debug!(service = %notifier.service, error = %err, "worker stdout failed");
                return;
            }
        }
    }
}

async fn read_diagnostics(stderr: impl AsyncRead + Unpin, notifier: Notifier) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if !line.trim().is_empty() {
            notifier.notify(WorkerSignal::Diagnostic(line));
        }
    }
}

async fn wait_for_exit(
    mut child: Child,
    killed: oneshot::Receiver<()>,
    grace: Duration,
    readers: Vec<tokio::task::JoinHandle<()>>,
    notifier: Notifier,
    alive: Arc<AtomicBool>,
) {
    let exited = tokio::select! {
        status = child.wait() => Some(status),
        _ = killed => None,
    };
    let status = match exited {
        Some(status) => status,
        None => stop_child(&mut child, grace, &notifier.service).await,
    };

    let _ = tokio::time::timeout(DRAIN_TIMEOUT, async {
        for reader in readers {
            let _ = reader.await;
        }
    })
    .await;

    alive.store(false, Ordering::Release);
    let exit = match status {
        Ok(status) => exit_info(status),
        Err(err) => {
            warn!(service = %notifier.service, error = %err, "failed to reap worker");
            ExitInfo::default()
        }
    };
    notifier.notify(WorkerSignal::Exited(exit));
}

/// Give the worker `grace` to exit on its own, then kill it.
async fn stop_child(
    child: &mut Child,
    grace: Duration,
    service: &str,
) -> std::io::Result<std::process::ExitStatus> {
    if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
        return status;
    }
    warn!(service, grace_ms = grace.as_millis() as u64, "worker ignored shutdown, killing");
    child.kill().await?;
    child.wait().await
}

fn exit_info(status: std::process::ExitStatus) -> ExitInfo {
    #[cfg(unix)]
    let signal = std::os::unix::process::ExitStatusExt::signal(&status);
    #[cfg(not(unix))]
    let signal = None;
    ExitInfo {
        code: status.code(),
        signal,
    }
}
