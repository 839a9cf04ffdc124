//! Worker supervision.
//!
//! The [`Supervisor`] owns every live worker and each service's restart
//! state. It never blocks: launching a worker returns a [`WorkerLink`]
//! immediately, and everything the worker does afterwards arrives later as a
//! [`WorkerNotice`].

use std::collections::HashMap;

use protocol::{
    ClosedParams, InitParams, ServiceDefinition, ToolDescriptor, WorkerCommand, WorkerEvent,
};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::restart::{RestartDecision, RestartPolicy, RestartState, ServicePhase};

/// Sequence number of one spawned worker.
pub type Generation = u64;

/// Something a worker did, tagged with the worker that did it.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerNotice {
    pub service: String,
    pub generation: Generation,
    pub signal: WorkerSignal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerSignal {
    /// A decoded IPC event from stdout.
    Event(WorkerEvent),
    /// One line of stderr.
    Diagnostic(String),
    /// The process is gone.
    Exited(ExitInfo),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl std::fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "worker exited with code {code}"),
            (None, Some(signal)) => write!(f, "worker killed by signal {signal}"),
            (None, None) => f.write_str("worker exited"),
        }
    }
}

/// The relay's end of one running worker.
pub trait WorkerLink: Send {
    /// Queue a command for the worker.
    fn send(&mut self, command: WorkerCommand) -> Result<()>;

    /// Ask the worker to stop, killing it if it does not.
    fn terminate(&mut self);

    fn is_alive(&self) -> bool;
}

/// Starts workers.
pub trait Launcher: Send {
    fn launch(
        &mut self,
        definition: &ServiceDefinition,
        generation: Generation,
    ) -> Result<Box<dyn WorkerLink>>;
}

/// Text in a worker's stderr that marks an abnormal termination.
const CRASH_MARKERS: &[&str] = &[
    "panicked at",
    "fatal runtime error",
    "Segmentation fault",
    "SIGSEGV",
    "SIGABRT",
    "FATAL ERROR",
    "out of memory",
    "core dumped",
];

/// Whether a diagnostic line announces a crash.
pub fn is_crash_marker(line: &str) -> bool {
    CRASH_MARKERS.iter().any(|marker| line.contains(marker))
}

struct WorkerHandle {
    generation: Generation,
    link: Box<dyn WorkerLink>,
    ready: bool,
    /// Set when stderr or a `closed` event suggests the coming exit is a crash.
    crash_hint: bool,
}

/// Owns worker handles, tool caches and restart state.
pub struct Supervisor {
    launcher: Box<dyn Launcher>,
    policy: RestartPolicy,
    workers: HashMap<String, WorkerHandle>,
    restarts: HashMap<String, RestartState>,
    tools: HashMap<String, Vec<ToolDescriptor>>,
    next_generation: Generation,
}

impl Supervisor {
    pub fn new(launcher: Box<dyn Launcher>, policy: RestartPolicy) -> Self {
        Self {
            launcher,
            policy,
            workers: HashMap::new(),
            restarts: HashMap::new(),
            tools: HashMap::new(),
            next_generation: 1,
        }
    }

    pub fn policy(&self) -> &RestartPolicy {
        &self.policy
    }

    /// Start a worker for `definition` unless a live one exists.
    ///
    /// Returns `Ok(true)` if a worker was launched. A handle whose process is
    /// no longer alive is killed and replaced.
    pub fn ensure_worker(&mut self, definition: &ServiceDefinition) -> Result<bool> {
        let name = definition.name.as_str();
        if let Some(handle) = self.workers.get(name) {
            if handle.link.is_alive() {
                return Ok(false);
            }
            debug!(service = %name, generation = handle.generation, "replacing stale worker");
            if let Some(mut stale) = self.workers.remove(name) {
                stale.link.terminate();
            }
        }

        let generation = self.next_generation;
        self.next_generation += 1;

        let mut link = self.launcher.launch(definition, generation)?;
        let init = WorkerCommand::Init {
            params: InitParams {
                service_name: name.to_string(),
                service_definition: definition.clone(),
            },
        };
        if let Err(err) = link.send(init) {
            link.terminate();
            return Err(err);
        }

        info!(service = %name, generation, "worker launched");
        self.workers.insert(
            name.to_string(),
            WorkerHandle {
                generation,
                link,
                ready: false,
                crash_hint: false,
            },
        );
        self.restarts.entry(name.to_string()).or_default().on_starting();
        Ok(true)
    }

    /// Stop the worker for `name`, if any. Returns whether one was running.
    ///
    /// The handle is dropped at once, so the exit that follows is stale and
    /// does not trigger a restart. With no worker, a restart still waiting
    /// out its backoff is cancelled instead.
    pub fn stop_worker(&mut self, name: &str) -> bool {
        let Some(mut handle) = self.workers.remove(name) else {
            self.cancel_restart(name);
            return false;
        };
        info!(service = %name, generation = handle.generation, "stopping worker");
        if let Err(err) = handle.link.send(WorkerCommand::Shutdown) {
            debug!(service = %name, error = %err, "shutdown not delivered");
        }
        handle.link.terminate();
        self.restarts.entry(name.to_string()).or_default().on_stopped();
        true
    }

    /// Supersede a scheduled restart. Returns whether one was pending.
    pub fn cancel_restart(&mut self, name: &str) -> bool {
        match self.restarts.get_mut(name) {
            Some(state) if state.phase == ServicePhase::Backoff => {
                info!(service = %name, "cancelling scheduled restart");
                state.on_stopped();
                true
            }
            _ => false,
        }
    }

    /// Stop every worker.
    pub fn stop_all(&mut self) {
        let names: Vec<String> = self.workers.keys().cloned().collect();
        for name in names {
            self.stop_worker(&name);
        }
    }

    /// Stop the worker and drop everything known about `name`.
    pub fn forget(&mut self, name: &str) {
        self.stop_worker(name);
        self.restarts.remove(name);
        self.tools.remove(name);
    }

    pub fn clear(&mut self) {
        self.stop_all();
        self.restarts.clear();
        self.tools.clear();
    }

    /// Forward a command to the live worker for `name`.
    pub fn send(&mut self, name: &str, command: WorkerCommand) -> Result<()> {
        let handle = self
            .workers
            .get_mut(name)
            .ok_or_else(|| Error::NotActive(name.to_string()))?;
        handle.link.send(command)
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.workers.contains_key(name)
    }

    pub fn is_ready(&self, name: &str) -> bool {
        self.workers.get(name).is_some_and(|h| h.ready)
    }

    /// Names of services with a ready worker, sorted.
    pub fn ready_services(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .workers
            .iter()
            .filter(|(_, h)| h.ready)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn active_count(&self) -> usize {
        self.workers.len()
    }

    pub fn generation(&self, name: &str) -> Option<Generation> {
        self.workers.get(name).map(|h| h.generation)
    }

    pub fn phase(&self, name: &str) -> ServicePhase {
        self.restarts.get(name).map(|r| r.phase).unwrap_or_default()
    }

    pub fn attempts(&self, name: &str) -> u32 {
        self.restarts.get(name).map_or(0, |r| r.attempts)
    }

    pub fn epoch(&self, name: &str) -> u64 {
        self.restarts.get(name).map_or(0, |r| r.epoch)
    }

    pub fn last_error(&self, name: &str) -> Option<&str> {
        self.restarts.get(name)?.last_error.as_deref()
    }

    /// Clear failure history ahead of an explicit spawn.
    pub fn reset_attempts(&mut self, name: &str) {
        if let Some(state) = self.restarts.get_mut(name) {
            state.reset();
        }
    }

    pub fn tools(&self, name: &str) -> Option<&[ToolDescriptor]> {
        self.tools.get(name).map(Vec::as_slice)
    }

    pub fn cached_tools(&self) -> impl Iterator<Item = (&String, &Vec<ToolDescriptor>)> {
        self.tools.iter()
    }

    pub fn tool_count(&self, name: &str) -> usize {
        self.tools.get(name).map_or(0, Vec::len)
    }

    pub fn cache_tools(&mut self, name: &str, tools: Vec<ToolDescriptor>) {
        self.tools.insert(name.to_string(), tools);
    }

    fn current(&mut self, name: &str, generation: Generation) -> Option<&mut WorkerHandle> {
        self.workers
            .get_mut(name)
            .filter(|h| h.generation == generation)
    }

    /// The worker connected and listed its tools. Returns `false` for a stale worker.
    pub fn on_ready(
        &mut self,
        name: &str,
        generation: Generation,
        tools: Vec<ToolDescriptor>,
    ) -> bool {
        let Some(handle) = self.current(name, generation) else {
            return false;
        };
        handle.ready = true;
        info!(service = %name, generation, tools = tools.len(), "worker ready");
        self.tools.insert(name.to_string(), tools);
        self.restarts.entry(name.to_string()).or_default().on_ready();
        true
    }

    /// Check a stderr line for crash markers. Returns whether the hint was set.
    pub fn on_diagnostic(&mut self, name: &str, generation: Generation, line: &str) -> bool {
        if !is_crash_marker(line) {
            return false;
        }
        let Some(handle) = self.current(name, generation) else {
            return false;
        };
        warn!(service = %name, generation, line, "crash marker in worker output");
        handle.crash_hint = true;
        true
    }

    /// The worker lost its tool service and will exit.
    pub fn on_closed(&mut self, name: &str, generation: Generation, params: &ClosedParams) {
        let Some(handle) = self.current(name, generation) else {
            return;
        };
        handle.ready = false;
        if params.signal.is_some() {
            handle.crash_hint = true;
        }
        let message = match (&params.error, &params.signal) {
            (Some(error), _) => error.clone(),
            (None, Some(signal)) => format!("tool service terminated by {signal}"),
            (None, None) => "tool service closed".to_string(),
        };
        warn!(service = %name, generation, reason = %message, "tool service closed");
        self.restarts.entry(name.to_string()).or_default().last_error = Some(message);
    }

    /// The worker reported a failure it could not recover from.
    pub fn on_worker_error(&mut self, name: &str, generation: Generation, error: &str) {
        if self.current(name, generation).is_none() {
            return;
        }
        warn!(service = %name, generation, error, "worker error");
        self.restarts.entry(name.to_string()).or_default().last_error = Some(error.to_string());
    }

    /// Drop the handle for an exited worker.
    ///
    /// Returns `None` for a stale generation, otherwise whether the exit
    /// should be treated as a crash.
    pub fn on_exit(&mut self, name: &str, generation: Generation, exit: ExitInfo) -> Option<bool> {
        self.current(name, generation)?;
        let handle = self.workers.remove(name)?;
        info!(service = %name, generation, %exit, "worker exited");
        let state = self.restarts.entry(name.to_string()).or_default();
        if state.last_error.is_none() {
            state.last_error = Some(exit.to_string());
        }
        state.phase = ServicePhase::Stopped;
        Some(handle.crash_hint)
    }

    /// A launch attempt failed before a worker existed.
    pub fn record_launch_failure(&mut self, name: &str, message: String) -> RestartDecision {
        self.restarts.entry(name.to_string()).or_default().last_error = Some(message);
        self.record_exit(name, false)
    }

    /// Apply the restart policy to an unplanned exit.
    pub fn record_exit(&mut self, name: &str, crashed: bool) -> RestartDecision {
        let policy = self.policy;
        self.restarts
            .entry(name.to_string())
            .or_default()
            .on_unplanned_exit(&policy, crashed)
    }
}
