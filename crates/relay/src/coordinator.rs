//! The relay coordinator.
//!
//! [`Relay`] owns the registry, the supervisor and both pending tables. It is
//! driven one [`RelayMessage`] at a time by the relay task, and answers
//! clients through each connection's outbox.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use protocol::{
    ClientRequest, Command, RequestId, Response, ServiceDefinition, SpawnParams, ToolCallRequest,
    ToolDescriptor, ToolInvocation, ToolOutcome, WorkerCommand, WorkerEvent,
};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::actor::{RelayMessage, Scheduler, Sweep, Timer};
use crate::config::RelayConfig;
use crate::error::{Error, Result};
use crate::pending::{ConnectionId, PendingRequest, PendingRequests, PendingSpawn, PendingSpawns};
use crate::registry::{Registry, ServiceRecord};
use crate::restart::{RestartDecision, RestartPolicy, ServicePhase};
use crate::supervisor::{ExitInfo, Generation, Launcher, Supervisor, WorkerNotice, WorkerSignal};

#[cfg(test)]
mod tests;

#[derive(Debug, Clone, Copy)]
struct Timeouts {
    request: Duration,
    spawn: Duration,
    idle: Duration,
    registration_grace: Duration,
}

/// A registered service as reported by `list`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo<'a> {
    #[serde(flatten)]
    pub record: &'a ServiceRecord,
    pub active: bool,
    pub ready: bool,
    pub tool_count: usize,
    pub status: ServicePhase,
    pub restart_attempts: u32,
}

/// Single owner of every relay table.
pub struct Relay {
    timeouts: Timeouts,
    registry: Registry,
    supervisor: Supervisor,
    requests: PendingRequests,
    spawns: PendingSpawns,
    connections: HashMap<ConnectionId, mpsc::UnboundedSender<Response>>,
    scheduler: Box<dyn Scheduler>,
}

impl Relay {
    /// Build a relay and register the configured services.
    pub fn new(
        config: &RelayConfig,
        launcher: Box<dyn Launcher>,
        scheduler: Box<dyn Scheduler>,
    ) -> Result<Self> {
        let policy = RestartPolicy::new(config.max_restart_attempts, config.restart_base_delay());
        let mut registry = Registry::new();
        let now = Utc::now();
        for definition in config.initial_services()? {
            info!(service = %definition.name, "registering configured service");
            registry.register(definition, now)?;
        }

        Ok(Self {
            timeouts: Timeouts {
                request: config.request_timeout(),
                spawn: config.spawn_timeout(),
                idle: config.idle_timeout(),
                registration_grace: config.registration_grace(),
            },
            registry,
            supervisor: Supervisor::new(launcher, policy),
            requests: PendingRequests::new(),
            spawns: PendingSpawns::new(),
            connections: HashMap::new(),
            scheduler,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn pending_requests(&self) -> &PendingRequests {
        &self.requests
    }

    pub fn pending_spawns(&self) -> &PendingSpawns {
        &self.spawns
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Apply one message.
    pub fn handle(&mut self, message: RelayMessage) {
        match message {
            RelayMessage::Connected { connection, outbox } => {
                debug!(connection, "client connected");
                self.connections.insert(connection, outbox);
            }
            RelayMessage::Request {
                connection,
                request,
            } => self.on_request(connection, request),
            RelayMessage::Disconnected { connection } => self.on_disconnect(connection),
            RelayMessage::Worker(notice) => self.on_worker(notice),
            RelayMessage::Timer(timer) => self.on_timer(timer),
            RelayMessage::Sweep(Sweep::Requests) => self.sweep_requests(Instant::now()),
            RelayMessage::Sweep(Sweep::Spawns) => self.sweep_spawns(Instant::now()),
            RelayMessage::Sweep(Sweep::Idle) => self.sweep_idle(Utc::now()),
            RelayMessage::Shutdown { done } => {
                self.shutdown();
                let _ = done.send(());
            }
        }
    }

    /// Stop every worker and cancel everything in flight.
    pub fn shutdown(&mut self) {
        info!(
            workers = self.supervisor.active_count(),
            "shutting down relay"
        );
        self.cancel_all("relay shutting down");
        self.supervisor.stop_all();
    }

    fn reply(&self, connection: ConnectionId, response: Response) {
        match self.connections.get(&connection) {
            Some(outbox) => {
                if outbox.send(response).is_err() {
                    debug!(connection, "connection writer gone, response dropped");
                }
            }
            None => debug!(connection, "connection closed, response dropped"),
        }
    }

    fn reply_error(&self, connection: ConnectionId, id: RequestId, error: &Error) {
        self.reply(connection, Response::failure(Some(id), error.to_body()));
    }

    fn on_request(&mut self, connection: ConnectionId, mut request: ClientRequest) {
        let id = request.ensure_id();
        let command = match Command::parse(&request.command, request.params.take()) {
            Ok(command) => command,
            Err(err) => {
                debug!(connection, %id, error = %err, "rejected request");
                self.reply_error(connection, id, &Error::from(err));
                return;
            }
        };

        debug!(connection, %id, command = command.name(), "request");
        match self.dispatch(connection, id.clone(), command) {
            Ok(Some(result)) => self.reply(connection, Response::success(id, result)),
            Ok(None) => {}
            Err(err) => {
                debug!(connection, %id, error = %err, "request failed");
                self.reply_error(connection, id, &err);
            }
        }
    }

    /// Run a command. `Ok(None)` means the answer comes later.
    fn dispatch(
        &mut self,
        connection: ConnectionId,
        id: RequestId,
        command: Command,
    ) -> Result<Option<Value>> {
        match command {
            Command::List { name } => self.list(name.as_deref()).map(Some),
            Command::ListTools { name } => self.list_tools(name.as_deref()).map(Some),
            Command::Spawn(params) => self.spawn(connection, id, params).map(|()| None),
            Command::Shutdown { name } => self.shutdown_service(&name).map(Some),
            Command::Unspawn { name } => self.unspawn(&name).map(Some),
            Command::Register(definition) => self.register(definition).map(Some),
            Command::Unregister { name } => self.unregister(&name).map(Some),
            Command::ToolCall(call) => self.tool_call(connection, id, call).map(|()| None),
            Command::CacheTools { name, tools } => self.cache_tools(&name, tools).map(Some),
            Command::Reset => Ok(Some(self.reset())),
        }
    }

    fn service_info<'a>(&'a self, record: &'a ServiceRecord) -> ServiceInfo<'a> {
        let name = record.definition.name.as_str();
        ServiceInfo {
            record,
            active: self.supervisor.is_active(name),
            ready: self.supervisor.is_ready(name),
            tool_count: self.supervisor.tool_count(name),
            status: self.supervisor.phase(name),
            restart_attempts: self.supervisor.attempts(name),
        }
    }

    fn list(&mut self, name: Option<&str>) -> Result<Value> {
        match name {
            Some(name) => {
                if !self.registry.touch(name, Utc::now()) {
                    return Err(Error::NotRegistered(name.to_string()));
                }
                let record = self
                    .registry
                    .get(name)
                    .ok_or_else(|| Error::NotRegistered(name.to_string()))?;
                to_json(&self.service_info(record))
            }
            None => {
                let services: Vec<ServiceInfo<'_>> = self
                    .registry
                    .iter()
                    .map(|record| self.service_info(record))
                    .collect();
                Ok(json!({ "services": to_json(&services)? }))
            }
        }
    }

    fn list_tools(&self, name: Option<&str>) -> Result<Value> {
        match name {
            Some(name) => {
                let tools = self.supervisor.tools(name);
                if tools.is_none() && !self.registry.is_known(name) {
                    return Err(Error::NotRegistered(name.to_string()));
                }
                Ok(json!({ "name": name, "tools": to_json(&tools.unwrap_or_default())? }))
            }
            None => {
                let services: BTreeMap<&String, &Vec<ToolDescriptor>> =
                    self.supervisor.cached_tools().collect();
                Ok(json!({ "services": to_json(&services)? }))
            }
        }
    }

    fn spawn(&mut self, connection: ConnectionId, id: RequestId, params: SpawnParams) -> Result<()> {
        let name = params.name.clone();
        if self.registry.is_parked(&name) {
            self.registry.restore(&name);
        }
        if !self.registry.contains(&name) {
            let definition = params
                .override_definition()
                .ok_or_else(|| Error::NotRegistered(name.clone()))?;
            self.registry.register(definition, Utc::now())?;
            info!(service = %name, "registered service from spawn request");
        }

        if self.supervisor.phase(&name) == ServicePhase::Failed {
            info!(service = %name, "explicit spawn clears failed state");
            self.supervisor.reset_attempts(&name);
        }

        let waiting = PendingSpawn {
            client_id: id,
            connection,
            submitted_at: Instant::now(),
        };
        if let Some(displaced) = self.spawns.insert(name.clone(), waiting) {
            let err = Error::Cancelled(format!("spawn of '{name}' superseded by a newer request"));
            self.reply_error(displaced.connection, displaced.client_id, &err);
        }

        self.registry.touch(&name, Utc::now());
        self.start_worker(&name);
        if self.supervisor.is_ready(&name) {
            self.resolve_spawn(&name);
        }
        Ok(())
    }

    /// Launch a worker for a registered service, feeding launch failures to the restart policy.
    fn start_worker(&mut self, name: &str) {
        let Some(definition) = self.registry.get(name).map(|r| r.definition.clone()) else {
            return;
        };
        if let Err(err) = self.supervisor.ensure_worker(&definition) {
            warn!(service = %name, error = %err, "worker launch failed");
            let decision = self.supervisor.record_launch_failure(name, err.to_string());
            self.apply_restart(name, decision);
        }
    }

    fn resolve_spawn(&mut self, name: &str) {
        let Some(spawn) = self.spawns.take(name) else {
            return;
        };
        let result = json!({
            "status": "started",
            "ready": true,
            "toolCount": self.supervisor.tool_count(name),
        });
        self.reply(spawn.connection, Response::success(spawn.client_id, result));
    }

    fn fail_spawn(&mut self, name: &str, error: &Error) {
        if let Some(spawn) = self.spawns.take(name) {
            self.reply_error(spawn.connection, spawn.client_id, error);
        }
    }

    /// Answer every request waiting on `name` with a cancellation.
    fn cancel_service(&mut self, name: &str, reason: &str) {
        let error = Error::Cancelled(format!("{reason}: {name}"));
        for pending in self.requests.drain_service(name) {
            self.reply_error(pending.connection, pending.client_id, &error);
        }
        self.fail_spawn(name, &error);
    }

    fn cancel_all(&mut self, reason: &str) {
        let error = Error::Cancelled(reason.to_string());
        for pending in self.requests.drain() {
            self.reply_error(pending.connection, pending.client_id, &error);
        }
        for (_, spawn) in self.spawns.drain() {
            self.reply_error(spawn.connection, spawn.client_id, &error);
        }
    }

    /// Stop a worker but keep its registration, which is parked and restored
    /// after the grace delay.
    fn transient_stop(&mut self, name: &str) -> bool {
        let restart_pending = self.supervisor.phase(name) == ServicePhase::Backoff;
        let was_running = self.supervisor.stop_worker(name);
        if (was_running || restart_pending) && self.registry.park(name) {
            self.scheduler.schedule(
                self.timeouts.registration_grace,
                Timer::RestoreRegistration {
                    service: name.to_string(),
                },
            );
        }
        was_running
    }

    fn shutdown_service(&mut self, name: &str) -> Result<Value> {
        if !self.registry.is_known(name) {
            return Err(Error::NotRegistered(name.to_string()));
        }
        self.supervisor.forget(name);
        self.cancel_service(name, "service shut down");
        self.registry.unregister(name);
        Ok(json!({ "status": "shutdown", "name": name }))
    }

    fn unspawn(&mut self, name: &str) -> Result<Value> {
        if !self.registry.is_known(name) {
            return Err(Error::NotRegistered(name.to_string()));
        }
        let was_running = self.transient_stop(name);
        self.cancel_service(name, "service stopped");
        Ok(json!({ "status": "stopped", "name": name, "wasRunning": was_running }))
    }

    fn register(&mut self, definition: ServiceDefinition) -> Result<Value> {
        let name = definition.name.clone();
        let replaced = self.registry.register(definition, Utc::now())?;
        info!(service = %name, replaced, "service registered");
        Ok(json!({ "status": "registered", "name": name, "replaced": replaced }))
    }

    fn unregister(&mut self, name: &str) -> Result<Value> {
        if !self.registry.is_known(name) {
            return Err(Error::NotRegistered(name.to_string()));
        }
        self.supervisor.forget(name);
        self.cancel_service(name, "service unregistered");
        self.registry.unregister(name);
        info!(service = %name, "service unregistered");
        Ok(json!({ "status": "unregistered", "name": name }))
    }

    fn tool_call(
        &mut self,
        connection: ConnectionId,
        id: RequestId,
        call: ToolCallRequest,
    ) -> Result<()> {
        // Unnamed calls go to the first ready service by name.
        let name = match call.name {
            Some(name) => name,
            None => self
                .supervisor
                .ready_services()
                .into_iter()
                .next()
                .ok_or(Error::NoActiveService)?,
        };
        if !self.registry.is_known(&name) {
            return Err(Error::NotRegistered(name));
        }
        if !self.supervisor.is_active(&name) {
            return Err(Error::NotActive(name));
        }
        if !self.supervisor.is_ready(&name) {
            return Err(Error::NotReady(name));
        }

        self.registry.touch(&name, Utc::now());
        let relay_id = Uuid::new_v4().to_string();
        self.requests.insert(
            relay_id.clone(),
            PendingRequest {
                client_id: id,
                connection,
                service: name.clone(),
                submitted_at: Instant::now(),
            },
        );

        let command = WorkerCommand::ToolCall {
            id: relay_id.clone(),
            params: ToolInvocation {
                name: call.method,
                args: call.params,
            },
        };
        if let Err(err) = self.supervisor.send(&name, command) {
            self.requests.take(&relay_id);
            return Err(err);
        }
        debug!(service = %name, request = %relay_id, "tool call forwarded");
        Ok(())
    }

    fn cache_tools(&mut self, name: &str, tools: Vec<ToolDescriptor>) -> Result<Value> {
        if !self.registry.is_known(name) {
            return Err(Error::NotRegistered(name.to_string()));
        }
        let count = tools.len();
        self.supervisor.cache_tools(name, tools);
        Ok(json!({ "status": "cached", "name": name, "toolCount": count }))
    }

    fn reset(&mut self) -> Value {
        info!("resetting relay");
        self.cancel_all("relay reset");
        self.supervisor.clear();
        self.registry.clear();
        json!({ "status": "reset" })
    }

    fn on_disconnect(&mut self, connection: ConnectionId) {
        self.connections.remove(&connection);
        let requests = self.requests.drop_connection(connection);
        let spawns = self.spawns.drop_connection(connection);
        debug!(connection, requests, spawns, "client disconnected");
    }

    fn on_worker(&mut self, notice: WorkerNotice) {
        let WorkerNotice {
            service,
            generation,
            signal,
        } = notice;
        match signal {
            WorkerSignal::Event(event) => self.on_worker_event(&service, generation, event),
            WorkerSignal::Diagnostic(line) => {
                debug!(service = %service, generation, "worker: {line}");
                self.supervisor.on_diagnostic(&service, generation, &line);
            }
            WorkerSignal::Exited(exit) => self.on_worker_exit(&service, generation, exit),
        }
    }

    fn on_worker_event(&mut self, service: &str, generation: Generation, event: WorkerEvent) {
        match event {
            WorkerEvent::Ready { params } => {
                if self.supervisor.on_ready(service, generation, params.tools) {
                    self.resolve_spawn(service);
                }
            }
            WorkerEvent::ToolResult { id, result } => self.on_tool_result(&id, result),
            WorkerEvent::Closed { params } => {
                self.supervisor.on_closed(service, generation, &params);
            }
            WorkerEvent::Error { params } => {
                self.supervisor
                    .on_worker_error(service, generation, &params.error);
            }
        }
    }

    fn on_tool_result(&mut self, relay_id: &str, outcome: ToolOutcome) {
        let Some(pending) = self.requests.take(relay_id) else {
            debug!(request = %relay_id, "discarding reply for unknown request");
            return;
        };
        let response = if outcome.success {
            Response::success(pending.client_id, outcome.result.unwrap_or(Value::Null))
        } else {
            let error = Error::Tool(outcome.error_message());
            Response::failure(Some(pending.client_id), error.to_body())
        };
        self.reply(pending.connection, response);
    }

    fn on_worker_exit(&mut self, service: &str, generation: Generation, exit: ExitInfo) {
        let Some(crashed) = self.supervisor.on_exit(service, generation, exit) else {
            debug!(service = %service, generation, "ignoring exit of replaced worker");
            return;
        };

        let gone = Error::WorkerGone(service.to_string());
        for pending in self.requests.drain_service(service) {
            self.reply_error(pending.connection, pending.client_id, &gone);
        }

        if !self.registry.contains(service) {
            debug!(service = %service, "service no longer registered, not restarting");
            return;
        }
        let decision = self.supervisor.record_exit(service, crashed);
        self.apply_restart(service, decision);
    }

    fn apply_restart(&mut self, service: &str, decision: RestartDecision) {
        match decision {
            RestartDecision::Immediate { attempt, epoch } => {
                warn!(service = %service, attempt, "worker crashed, restarting immediately");
                self.scheduler.schedule(
                    Duration::ZERO,
                    Timer::Restart {
                        service: service.to_string(),
                        epoch,
                    },
                );
            }
            RestartDecision::Backoff {
                attempt,
                delay,
                epoch,
            } => {
                warn!(
                    service = %service,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "worker exited, restart scheduled"
                );
                self.scheduler.schedule(
                    delay,
                    Timer::Restart {
                        service: service.to_string(),
                        epoch,
                    },
                );
            }
            RestartDecision::Failed {
                attempts,
                last_error,
            } => {
                let message = last_error.unwrap_or_else(|| "worker exited".to_string());
                warn!(
                    service = %service,
                    attempts,
                    error = %message,
                    "restart attempts exhausted, service failed"
                );
                let error = Error::SpawnFailed {
                    service: service.to_string(),
                    message,
                };
                self.fail_spawn(service, &error);
            }
        }
    }

    fn on_timer(&mut self, timer: Timer) {
        match timer {
            Timer::Restart { service, epoch } => {
                if !self.registry.contains(&service) {
                    debug!(service = %service, "restart skipped, service gone");
                    return;
                }
                if self.supervisor.epoch(&service) != epoch || self.supervisor.is_active(&service)
                {
                    debug!(service = %service, epoch, "restart superseded");
                    return;
                }
                info!(service = %service, "restarting worker");
                self.start_worker(&service);
            }
            Timer::RestoreRegistration { service } => {
                if self.registry.restore(&service) {
                    debug!(service = %service, "registration restored");
                }
            }
        }
    }

    /// Time out tool calls older than the request timeout.
    pub fn sweep_requests(&mut self, now: Instant) {
        let timeout = self.timeouts.request;
        for pending in self.requests.expired(now, timeout) {
            warn!(
                service = %pending.service,
                request = %pending.client_id,
                "tool call timed out"
            );
            let error = Error::RequestTimeout(timeout.as_millis());
            self.reply_error(pending.connection, pending.client_id, &error);
        }
    }

    /// Time out spawn waits older than the spawn timeout.
    pub fn sweep_spawns(&mut self, now: Instant) {
        let timeout = self.timeouts.spawn;
        for (service, spawn) in self.spawns.expired(now, timeout) {
            warn!(service = %service, "spawn timed out");
            let error = Error::SpawnTimeout {
                service,
                timeout_ms: timeout.as_millis(),
            };
            self.reply_error(spawn.connection, spawn.client_id, &error);
        }
    }

    /// Transiently stop ready workers unused for longer than the idle timeout.
    ///
    /// Services with calls or a spawn in flight are left alone.
    pub fn sweep_idle(&mut self, now: DateTime<Utc>) {
        let idle = TimeDelta::from_std(self.timeouts.idle).unwrap_or(TimeDelta::MAX);
        let stale: Vec<String> = self
            .supervisor
            .ready_services()
            .into_iter()
            .filter(|name| {
                self.registry
                    .get(name)
                    .is_some_and(|record| now - record.last_used_at > idle)
                    && !self.requests.has_service(name)
                    && !self.spawns.contains(name)
            })
            .collect();

        for name in stale {
            info!(service = %name, "stopping idle worker");
            self.transient_stop(&name);
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|err| Error::Internal(err.to_string()))
}
