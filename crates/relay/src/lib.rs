//! Toolrelay core: a TCP relay that supervises one worker per tool service.
//!
//! Clients send newline-delimited JSON commands over TCP. The relay keeps an
//! in-memory registry of service definitions, starts a worker process per
//! service on demand, forwards tool calls to it and routes the replies back
//! to the socket that asked.
//!
//! # Overview
//!
//! - [`Relay`] owns every table: the [`Registry`], the [`Supervisor`] and
//!   the pending request and spawn tables. It runs as a single task fed by
//!   [`RelayMessage`]s, so state is never shared between tasks.
//! - [`Server`] accepts sockets and frames input into requests.
//! - [`ProcessLauncher`] runs workers as child processes and reports what they
//!   do back to the relay.
//! - Restarts after unplanned exits follow a [`RestartPolicy`] with
//!   exponential backoff and an attempt cap.
//!
//! # Example
//!
//! ```no_run
//! use relay::{RelayConfig, RelayRuntime};
//!
//! # async fn example() -> relay::Result<()> {
//! let config = RelayConfig::default();
//! let runtime = RelayRuntime::with_worker_program(&config, "toolrelay-worker".into()).await?;
//! println!("listening on {}", runtime.local_addr());
//! runtime.shutdown().await?;
//! # Ok(())
//! # }
//! ```

mod actor;
mod config;
mod coordinator;
mod error;
mod framing;
mod pending;
mod process;
mod registry;
mod restart;
mod runtime;
mod server;
mod supervisor;

#[cfg(test)]
mod testing;

pub use actor::{
    RelayHandle, RelayInbox, RelayMessage, Scheduler, Sweep, Timer, TokioScheduler, channel,
    spawn_sweepers,
};
pub use config::{DEFAULT_SERVICE_NAME, RelayConfig};
pub use coordinator::{Relay, ServiceInfo};
pub use error::{Error, Result};
pub use framing::{Frame, FrameBuffer};
pub use pending::{ConnectionId, PendingRequest, PendingRequests, PendingSpawn, PendingSpawns};
pub use process::ProcessLauncher;
pub use registry::{Registry, ServiceRecord};
pub use restart::{RestartDecision, RestartPolicy, RestartState, ServicePhase};
pub use runtime::RelayRuntime;
pub use server::Server;
pub use supervisor::{
    ExitInfo, Generation, Launcher, Supervisor, WorkerLink, WorkerNotice, WorkerSignal,
    is_crash_marker,
};
