//! Wiring a relay into running tasks.

use std::net::SocketAddr;
use std::path::PathBuf;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::info;

use crate::actor::{RelayHandle, TokioScheduler, channel, spawn_sweepers};
use crate::config::RelayConfig;
use crate::coordinator::Relay;
use crate::error::{Error, Result};
use crate::process::ProcessLauncher;
use crate::server::Server;
use crate::supervisor::Launcher;

/// A relay task, its listener and its sweepers.
pub struct RelayRuntime {
    handle: RelayHandle,
    local_addr: SocketAddr,
    stop_listener: Option<oneshot::Sender<()>>,
    relay_task: JoinHandle<()>,
    server_task: JoinHandle<Result<()>>,
    sweepers: Vec<JoinHandle<()>>,
    worker_exits: Option<mpsc::Receiver<()>>,
}

impl RelayRuntime {
    /// Start a relay whose launcher is built by `make_launcher`.
    ///
    /// The launcher gets a handle so it can report worker activity back.
    pub async fn start<F>(config: &RelayConfig, make_launcher: F) -> Result<Self>
    where
        F: FnOnce(RelayHandle) -> Box<dyn Launcher>,
    {
        let (handle, inbox) = channel();
        let launcher = make_launcher(handle.clone());
        let scheduler = Box::new(TokioScheduler::new(handle.clone()));
        let relay = Relay::new(config, launcher, scheduler)?;

        let server = Server::bind(&config.host, config.port, config.connection_timeout()).await?;
        let local_addr = server.local_addr()?;

        let relay_task = tokio::spawn(relay.run(inbox));
        let sweepers = spawn_sweepers(&handle, config);
        let (stop_listener, stopped) = oneshot::channel::<()>();
        let server_task = tokio::spawn(server.serve(handle.clone(), async move {
            let _ = stopped.await;
        }));

        Ok(Self {
            handle,
            local_addr,
            stop_listener: Some(stop_listener),
            relay_task,
            server_task,
            sweepers,
            worker_exits: None,
        })
    }

    /// Start a relay that runs `program` as the worker for every service.
    pub async fn with_worker_program(config: &RelayConfig, program: PathBuf) -> Result<Self> {
        let grace = config.shutdown_grace();
        let (guard, exits) = mpsc::channel(1);
        let mut runtime = Self::start(config, move |handle| {
            Box::new(ProcessLauncher::new(program, handle, grace).with_exit_guard(guard))
        })
        .await?;
        runtime.worker_exits = Some(exits);
        Ok(runtime)
    }

    pub fn handle(&self) -> &RelayHandle {
        &self.handle
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, stop every worker, and wait for worker processes to be reaped.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(stop) = self.stop_listener.take() {
            let _ = stop.send(());
        }
        let served = self
            .server_task
            .await
            .map_err(|err| Error::Internal(format!("listener task failed: {err}")))?;

        self.handle.shutdown().await;
        for sweeper in &self.sweepers {
            sweeper.abort();
        }
        let _ = self.relay_task.await;

        if let Some(mut exits) = self.worker_exits.take() {
            // Closes when the last worker has been reaped.
            while exits.recv().await.is_some() {}
        }
        info!("relay stopped");
        served
    }
}
