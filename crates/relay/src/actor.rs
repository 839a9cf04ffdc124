//! Message plumbing around the coordinator.
//!
//! Every socket, worker and timer talks to the [`Relay`] by sending a
//! [`RelayMessage`] through a [`RelayHandle`]. The relay task processes them
//! one at a time, so no table is ever touched concurrently.

use std::time::Duration;

use protocol::{ClientRequest, Response};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::config::RelayConfig;
use crate::coordinator::Relay;
use crate::pending::ConnectionId;
use crate::supervisor::WorkerNotice;

/// Everything the relay task reacts to.
#[derive(Debug)]
pub enum RelayMessage {
    Connected {
        connection: ConnectionId,
        outbox: mpsc::UnboundedSender<Response>,
    },
    Request {
        connection: ConnectionId,
        request: ClientRequest,
    },
    Disconnected {
        connection: ConnectionId,
    },
    Worker(WorkerNotice),
    Timer(Timer),
    Sweep(Sweep),
    /// Stop every worker, then acknowledge.
    Shutdown { done: oneshot::Sender<()> },
}

/// A one-shot delayed action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Timer {
    /// Restart a service after backoff. Ignored if `epoch` is no longer current.
    Restart { service: String, epoch: u64 },
    /// Put a transiently stopped service back in the registry.
    RestoreRegistration { service: String },
}

/// A periodic sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sweep {
    Requests,
    Spawns,
    Idle,
}

/// Cloneable sender side of the relay task.
#[derive(Debug, Clone)]
pub struct RelayHandle {
    tx: mpsc::UnboundedSender<RelayMessage>,
}

impl RelayHandle {
    /// Returns `false` once the relay task has stopped.
    pub fn send(&self, message: RelayMessage) -> bool {
        self.tx.send(message).is_ok()
    }

    /// Stop every worker and wait for the relay to acknowledge.
    pub async fn shutdown(&self) {
        let (done, rx) = oneshot::channel();
        if self.send(RelayMessage::Shutdown { done }) {
            let _ = rx.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiver side, consumed by [`Relay::run`].
#[derive(Debug)]
pub struct RelayInbox {
    rx: mpsc::UnboundedReceiver<RelayMessage>,
}

impl RelayInbox {
    pub(crate) async fn recv(&mut self) -> Option<RelayMessage> {
        self.rx.recv().await
    }
}

pub fn channel() -> (RelayHandle, RelayInbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    (RelayHandle { tx }, RelayInbox { rx })
}

/// Delivers [`Timer`]s back to the relay after a delay.
pub trait Scheduler: Send {
    fn schedule(&self, delay: Duration, timer: Timer);
}

/// Schedules timers as sleeping tokio tasks.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: RelayHandle,
}

impl TokioScheduler {
    pub fn new(handle: RelayHandle) -> Self {
        Self { handle }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, timer: Timer) {
        let handle = self.handle.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            handle.send(RelayMessage::Timer(timer));
        });
    }
}

impl Relay {
    /// Process messages until shutdown or until every handle is dropped.
    pub async fn run(mut self, mut inbox: RelayInbox) {
        while let Some(message) = inbox.recv().await {
            let stop = matches!(message, RelayMessage::Shutdown { .. });
            self.handle(message);
            if stop {
                return;
            }
        }
        info!("relay handles dropped, stopping workers");
        self.shutdown();
    }
}

/// One interval task per sweep, each on its own timer.
pub fn spawn_sweepers(handle: &RelayHandle, config: &RelayConfig) -> Vec<JoinHandle<()>> {
    [
        (Sweep::Requests, config.request_sweep()),
        (Sweep::Spawns, config.spawn_sweep()),
        (Sweep::Idle, config.idle_sweep()),
    ]
    .into_iter()
    .map(|(sweep, period)| {
        let handle = handle.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                interval.tick().await;
                if !handle.send(RelayMessage::Sweep(sweep)) {
                    debug!(?sweep, "relay gone, sweeper exiting");
                    return;
                }
            }
        })
    })
    .collect()
}
