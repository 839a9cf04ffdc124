use super::*;
use crate::testing::{FakeLauncher, RecordingScheduler};
use protocol::{ClosedParams, ErrorParams, ReadyParams};

struct Harness {
    relay: Relay,
    launcher: FakeLauncher,
    scheduler: RecordingScheduler,
    outboxes: HashMap<ConnectionId, mpsc::UnboundedReceiver<Response>>,
}

fn config() -> RelayConfig {
    RelayConfig {
        request_timeout_ms: 1_000,
        spawn_timeout_ms: 500,
        idle_timeout_ms: 10_000,
        max_restart_attempts: 3,
        restart_base_delay_ms: 100,
        registration_grace_ms: 50,
        ..RelayConfig::default()
    }
}

impl Harness {
    fn new() -> Self {
        Self::with_config(config())
    }

    fn with_config(config: RelayConfig) -> Self {
        let launcher = FakeLauncher::default();
        let scheduler = RecordingScheduler::default();
        let relay = Relay::new(
            &config,
            Box::new(launcher.clone()),
            Box::new(scheduler.clone()),
        )
        .unwrap();
        let mut harness = Self {
            relay,
            launcher,
            scheduler,
            outboxes: HashMap::new(),
        };
        harness.connect(1);
        harness
    }

    fn connect(&mut self, connection: ConnectionId) {
        let (outbox, rx) = mpsc::unbounded_channel();
        self.relay
            .handle(RelayMessage::Connected { connection, outbox });
        self.outboxes.insert(connection, rx);
    }

    fn disconnect(&mut self, connection: ConnectionId) {
        self.relay.handle(RelayMessage::Disconnected { connection });
    }

    fn send(&mut self, connection: ConnectionId, id: i64, command: &str, params: Value) {
        let request = ClientRequest::new(command)
            .with_id(id)
            .with_params(params);
        self.relay.handle(RelayMessage::Request {
            connection,
            request,
        });
    }

    /// Send on connection 1 and return the immediate response.
    fn call(&mut self, command: &str, params: Value) -> Response {
        self.send(1, 1, command, params);
        self.next(1).expect("expected an immediate response")
    }

    fn next(&mut self, connection: ConnectionId) -> Option<Response> {
        self.outboxes.get_mut(&connection)?.try_recv().ok()
    }

    fn worker(&mut self, service: &str, generation: Generation, signal: WorkerSignal) {
        self.relay.handle(RelayMessage::Worker(WorkerNotice {
            service: service.to_string(),
            generation,
            signal,
        }));
    }

    fn ready(&mut self, service: &str, generation: Generation, tools: usize) {
        let tools = (0..tools)
            .map(|i| ToolDescriptor {
                name: format!("tool{i}"),
                description: None,
                input_schema: json!({}),
            })
            .collect();
        self.worker(
            service,
            generation,
            WorkerSignal::Event(WorkerEvent::Ready {
                params: ReadyParams {
                    service_name: service.to_string(),
                    tools,
                },
            }),
        );
    }

    fn exit(&mut self, service: &str, generation: Generation) {
        self.launcher.mark_dead(generation);
        self.worker(
            service,
            generation,
            WorkerSignal::Exited(ExitInfo {
                code: Some(1),
                signal: None,
            }),
        );
    }

    fn register(&mut self, name: &str) {
        let response = self.call("register", json!({"name": name, "type": "local", "command": "server"}));
        assert!(response.success, "{response:?}");
    }

    /// Register, spawn and mark ready. Returns the generation.
    fn running(&mut self, name: &str) -> Generation {
        self.register(name);
        self.send(1, 2, "spawn", json!({"name": name}));
        let generation = self.relay.supervisor().generation(name).unwrap();
        self.ready(name, generation, 1);
        let response = self.next(1).unwrap();
        assert!(response.success, "{response:?}");
        generation
    }

    /// The relay id of the last tool call sent to `generation`.
    fn last_tool_call_id(&self, generation: Generation) -> String {
        self.launcher
            .sent(generation)
            .into_iter()
            .rev()
            .find_map(|command| match command {
                WorkerCommand::ToolCall { id, .. } => Some(id),
                _ => None,
            })
            .unwrap()
    }
}

fn tool_result(id: &str, outcome: ToolOutcome) -> WorkerSignal {
    WorkerSignal::Event(WorkerEvent::ToolResult {
        id: id.to_string(),
        result: outcome,
    })
}

#[test]
fn unknown_command_is_method_not_found() {
    let mut h = Harness::new();
    let response = h.call("bogus", Value::Null);
    assert_eq!(response.error_code(), Some(-32601));
}

#[test]
fn register_then_list_round_trips() {
    let mut h = Harness::new();
    let response = h.call(
        "register",
        json!({
            "name": "fs",
            "type": "local",
            "command": "mcp-filesystem",
            "args": ["/tmp"],
            "description": "files"
        }),
    );
    assert_eq!(response.result.unwrap()["replaced"], false);

    let listed = h.call("list", json!({}));
    let services = listed.result.unwrap()["services"].clone();
    assert_eq!(services.as_array().unwrap().len(), 1);
    let entry = &services[0];
    assert_eq!(entry["name"], "fs");
    assert_eq!(entry["type"], "local");
    assert_eq!(entry["command"], "mcp-filesystem");
    assert_eq!(entry["args"], json!(["/tmp"]));
    assert_eq!(entry["description"], "files");
    assert_eq!(entry["active"], false);
    assert_eq!(entry["ready"], false);
    assert_eq!(entry["toolCount"], 0);
    assert_eq!(entry["status"], "stopped");
    assert!(entry["createdAt"].is_string());
    assert!(entry["lastUsedAt"].is_string());
}

#[test]
fn register_rejects_missing_endpoint() {
    let mut h = Harness::new();
    let response = h.call("register", json!({"name": "api", "type": "remote"}));
    assert_eq!(response.error_code(), Some(-32602));
    assert!(h.relay.registry().is_empty());
}

#[test]
fn list_single_updates_last_used() {
    let mut h = Harness::new();
    h.register("fs");
    let before = h.relay.registry().get("fs").unwrap().last_used_at;
    let response = h.call("list", json!({"name": "fs"}));
    assert_eq!(response.result.unwrap()["name"], "fs");
    assert!(h.relay.registry().get("fs").unwrap().last_used_at >= before);

    let missing = h.call("list", json!({"name": "nope"}));
    assert_eq!(missing.error_code(), Some(-32601));
}

#[test]
fn configured_services_are_registered() {
    let h = Harness::with_config(RelayConfig {
        default_command: Some("server".to_string()),
        ..config()
    });
    assert!(h.relay.registry().contains("default"));
}

#[test]
fn spawn_resolves_when_ready() {
    let mut h = Harness::new();
    h.register("fs");
    h.send(1, 7, "spawn", json!({"name": "fs"}));
    assert!(h.next(1).is_none());
    assert_eq!(h.relay.pending_spawns().len(), 1);

    let sent = h.launcher.sent(1);
    assert!(matches!(&sent[0], WorkerCommand::Init { params } if params.service_name == "fs"));

    h.ready("fs", 1, 3);
    let response = h.next(1).unwrap();
    assert_eq!(response.id, Some(RequestId::from(7)));
    assert!(response.success);
    assert_eq!(
        response.result.unwrap(),
        json!({"status": "started", "ready": true, "toolCount": 3})
    );
    assert!(h.relay.pending_spawns().is_empty());
}

#[test]
fn spawn_of_ready_service_resolves_through_same_path() {
    let mut h = Harness::new();
    h.running("fs");
    h.send(1, 9, "spawn", json!({"name": "fs"}));
    let response = h.next(1).unwrap();
    assert_eq!(response.id, Some(RequestId::from(9)));
    assert_eq!(response.result.unwrap()["toolCount"], 1);
    assert_eq!(h.launcher.launches().len(), 1);
    assert!(h.relay.pending_spawns().is_empty());
}

#[test]
fn spawn_unregistered_without_command_fails() {
    let mut h = Harness::new();
    let response = h.call("spawn", json!({"name": "fs"}));
    assert_eq!(response.error_code(), Some(-32601));
    assert!(h.relay.pending_spawns().is_empty());
}

#[test]
fn spawn_with_command_auto_registers() {
    let mut h = Harness::new();
    h.send(1, 1, "spawn", json!({"name": "adhoc", "command": "server", "args": ["-v"]}));
    assert!(h.relay.registry().contains("adhoc"));
    assert!(h.relay.supervisor().is_active("adhoc"));
    let record = h.relay.registry().get("adhoc").unwrap();
    assert!(record.definition.is_local());
}

#[test]
fn spawn_times_out_and_entry_is_removed() {
    let mut h = Harness::new();
    h.register("fs");
    h.send(1, 4, "spawn", json!({"name": "fs"}));

    h.relay.sweep_spawns(Instant::now());
    assert!(h.next(1).is_none());

    h.relay
        .sweep_spawns(Instant::now() + Duration::from_millis(600));
    let response = h.next(1).unwrap();
    assert_eq!(response.id, Some(RequestId::from(4)));
    assert_eq!(response.error_code(), Some(-32603));
    assert!(response.error.unwrap().message.contains("timed out"));
    assert!(h.relay.pending_spawns().is_empty());
}

#[test]
fn second_spawn_replaces_first_waiter() {
    let mut h = Harness::new();
    h.connect(2);
    h.register("fs");
    h.send(1, 1, "spawn", json!({"name": "fs"}));
    h.send(2, 2, "spawn", json!({"name": "fs"}));

    let displaced = h.next(1).unwrap();
    assert_eq!(displaced.error_code(), Some(-32603));
    assert_eq!(h.relay.pending_spawns().len(), 1);
    assert_eq!(h.launcher.launches().len(), 1);

    h.ready("fs", 1, 0);
    assert!(h.next(2).unwrap().success);
}

#[test]
fn toolcall_to_inactive_service_creates_no_pending() {
    let mut h = Harness::new();
    h.register("fs");
    let response = h.call("toolcall", json!({"name": "fs", "method": "ls"}));
    assert_eq!(response.error_code(), Some(-32603));
    assert!(response.error.unwrap().message.contains("not active"));
    assert!(h.relay.pending_requests().is_empty());
}

#[test]
fn toolcall_without_any_service_is_invalid_request() {
    let mut h = Harness::new();
    let response = h.call("toolcall", json!({"method": "ls"}));
    assert_eq!(response.error_code(), Some(-32600));
}

#[test]
fn toolcall_round_trip() {
    let mut h = Harness::new();
    let generation = h.running("fs");
    h.send(1, 42, "toolcall", json!({"name": "fs", "method": "ls", "params": {"path": "/"}}));
    assert_eq!(h.relay.pending_requests().len(), 1);

    let relay_id = h.last_tool_call_id(generation);
    let sent = h.launcher.sent(generation);
    assert!(matches!(
        sent.last(),
        Some(WorkerCommand::ToolCall { params, .. }) if params.name == "ls" && params.args == json!({"path": "/"})
    ));

    h.worker("fs", generation, tool_result(&relay_id, ToolOutcome::ok(json!({"files": []}))));
    let response = h.next(1).unwrap();
    assert_eq!(response.id, Some(RequestId::from(42)));
    assert_eq!(response.result, Some(json!({"files": []})));
    assert!(h.relay.pending_requests().is_empty());
}

#[test]
fn toolcall_without_name_uses_ready_service() {
    let mut h = Harness::new();
    let generation = h.running("fs");
    h.send(1, 5, "toolcall", json!({"method": "ls"}));
    assert_eq!(h.relay.pending_requests().len(), 1);
    assert!(!h.last_tool_call_id(generation).is_empty());
}

#[test]
fn tool_failure_maps_to_tool_error() {
    let mut h = Harness::new();
    let generation = h.running("fs");
    h.send(1, 3, "toolcall", json!({"name": "fs", "method": "rm"}));
    let relay_id = h.last_tool_call_id(generation);
    h.worker("fs", generation, tool_result(&relay_id, ToolOutcome::failed("denied")));
    let response = h.next(1).unwrap();
    assert_eq!(response.error_code(), Some(-32000));
    assert_eq!(response.error.unwrap().message, "denied");
}

#[test]
fn late_reply_is_discarded() {
    let mut h = Harness::new();
    let generation = h.running("fs");
    h.send(1, 3, "toolcall", json!({"name": "fs", "method": "slow"}));
    let relay_id = h.last_tool_call_id(generation);

    h.relay
        .sweep_requests(Instant::now() + Duration::from_secs(2));
    let timeout = h.next(1).unwrap();
    assert_eq!(timeout.error_code(), Some(-32603));
    assert!(h.relay.pending_requests().is_empty());

    h.worker("fs", generation, tool_result(&relay_id, ToolOutcome::ok(json!(1))));
    assert!(h.next(1).is_none());
}

#[test]
fn clients_reusing_ids_do_not_collide() {
    let mut h = Harness::new();
    h.connect(2);
    let generation = h.running("fs");
    h.send(1, 1, "toolcall", json!({"name": "fs", "method": "a"}));
    let first = h.last_tool_call_id(generation);
    h.send(2, 1, "toolcall", json!({"name": "fs", "method": "b"}));
    let second = h.last_tool_call_id(generation);
    assert_ne!(first, second);
    assert_eq!(h.relay.pending_requests().len(), 2);

    h.worker("fs", generation, tool_result(&second, ToolOutcome::ok(json!("b"))));
    assert_eq!(h.next(2).unwrap().result, Some(json!("b")));
    assert!(h.next(1).is_none());
}

#[test]
fn restart_delays_back_off_then_fail() {
    let mut h = Harness::new();
    h.register("fs");
    h.send(1, 1, "spawn", json!({"name": "fs"}));

    for k in 1..=3u32 {
        let generation = h.relay.supervisor().generation("fs").unwrap();
        h.exit("fs", generation);
        let scheduled = h.scheduler.take();
        assert_eq!(scheduled.len(), 1);
        let (delay, timer) = scheduled[0].clone();
        assert_eq!(delay, Duration::from_millis(100) * 2u32.pow(k - 1));
        h.relay.handle(RelayMessage::Timer(timer));
        assert!(h.relay.supervisor().is_active("fs"));
    }

    let generation = h.relay.supervisor().generation("fs").unwrap();
    h.worker(
        "fs",
        generation,
        WorkerSignal::Event(WorkerEvent::Error {
            params: ErrorParams {
                service_name: "fs".to_string(),
                error: "connection refused".to_string(),
            },
        }),
    );
    h.exit("fs", generation);

    assert!(h.scheduler.take().is_empty());
    assert_eq!(h.relay.supervisor().phase("fs"), ServicePhase::Failed);
    assert!(h.relay.registry().contains("fs"));
    let response = h.next(1).unwrap();
    assert_eq!(response.error_code(), Some(-32603));
    assert!(response.error.unwrap().message.contains("connection refused"));
    assert!(h.relay.pending_spawns().is_empty());
}

#[test]
fn crash_marker_restarts_immediately() {
    let mut h = Harness::new();
    let generation = h.running("fs");
    h.worker(
        "fs",
        generation,
        WorkerSignal::Diagnostic("thread 'main' panicked at src/lib.rs:1".to_string()),
    );
    h.exit("fs", generation);
    let scheduled = h.scheduler.take();
    assert_eq!(scheduled.len(), 1);
    assert_eq!(scheduled[0].0, Duration::ZERO);
}

#[test]
fn closed_with_signal_restarts_immediately() {
    let mut h = Harness::new();
    let generation = h.running("fs");
    h.worker(
        "fs",
        generation,
        WorkerSignal::Event(WorkerEvent::Closed {
            params: ClosedParams {
                service_name: "fs".to_string(),
                error: None,
                signal: Some("SIGSEGV".to_string()),
            },
        }),
    );
    h.exit("fs", generation);
    assert_eq!(h.scheduler.take()[0].0, Duration::ZERO);
}

#[test]
fn stale_restart_timer_is_ignored() {
    let mut h = Harness::new();
    let generation = h.running("fs");
    h.exit("fs", generation);
    let (_, timer) = h.scheduler.take().remove(0);

    // An explicit spawn gets there first.
    h.send(1, 2, "spawn", json!({"name": "fs"}));
    assert_eq!(h.launcher.launches().len(), 2);

    h.relay.handle(RelayMessage::Timer(timer));
    assert_eq!(h.launcher.launches().len(), 2);
    assert_eq!(h.launcher.alive_for("fs"), 1);
}

#[test]
fn restart_skipped_after_unregister() {
    let mut h = Harness::new();
    let generation = h.running("fs");
    h.exit("fs", generation);
    let (_, timer) = h.scheduler.take().remove(0);
    assert!(h.call("unregister", json!({"name": "fs"})).success);
    h.relay.handle(RelayMessage::Timer(timer));
    assert_eq!(h.launcher.launches().len(), 1);
}

#[test]
fn unspawn_during_backoff_cancels_restart() {
    let mut h = Harness::new();
    let generation = h.running("fs");
    h.exit("fs", generation);
    let (_, restart) = h.scheduler.take().remove(0);

    let stopped = h.call("unspawn", json!({"name": "fs"}));
    let result = stopped.result.unwrap();
    assert_eq!(result["status"], "stopped");
    assert_eq!(result["wasRunning"], false);
    assert_eq!(h.relay.supervisor().phase("fs"), ServicePhase::Stopped);

    h.relay.handle(RelayMessage::Timer(restart));
    for (_, timer) in h.scheduler.take() {
        h.relay.handle(RelayMessage::Timer(timer));
    }
    assert_eq!(h.launcher.launches(), vec![("fs".to_string(), generation)]);
    assert!(!h.relay.supervisor().is_active("fs"));
    assert!(h.relay.registry().contains("fs"));
}

#[test]
fn exit_fails_in_flight_calls() {
    let mut h = Harness::new();
    let generation = h.running("fs");
    h.send(1, 8, "toolcall", json!({"name": "fs", "method": "ls"}));
    h.exit("fs", generation);
    let response = h.next(1).unwrap();
    assert_eq!(response.id, Some(RequestId::from(8)));
    assert_eq!(response.error_code(), Some(-32603));
    assert!(h.relay.pending_requests().is_empty());
}

#[test]
fn explicit_spawn_clears_failed_state() {
    let mut h = Harness::new();
    h.launcher.fail_launches(true);
    h.register("fs");
    h.send(1, 1, "spawn", json!({"name": "fs"}));
    for _ in 0..3 {
        let (_, timer) = h.scheduler.take().remove(0);
        h.relay.handle(RelayMessage::Timer(timer));
    }
    assert_eq!(h.relay.supervisor().phase("fs"), ServicePhase::Failed);
    assert!(!h.next(1).unwrap().success);

    h.launcher.fail_launches(false);
    h.send(1, 2, "spawn", json!({"name": "fs"}));
    assert!(h.relay.supervisor().is_active("fs"));
    assert_eq!(h.relay.supervisor().attempts("fs"), 0);
}

#[test]
fn idle_reap_keeps_registration_and_attempts() {
    let mut h = Harness::new();
    let generation = h.running("fs");
    let attempts = h.relay.supervisor().attempts("fs");

    h.relay.sweep_idle(Utc::now() + TimeDelta::seconds(60));
    assert!(!h.relay.supervisor().is_active("fs"));
    assert!(h.launcher.terminated(generation));
    assert!(!h.relay.registry().contains("fs"));
    assert_eq!(h.relay.supervisor().attempts("fs"), attempts);

    let scheduled = h.scheduler.take();
    assert_eq!(scheduled.len(), 1);
    assert_eq!(scheduled[0].0, Duration::from_millis(50));
    h.relay.handle(RelayMessage::Timer(scheduled[0].1.clone()));
    assert!(h.relay.registry().contains("fs"));

    // The reaped worker's exit is not a failure.
    h.exit("fs", generation);
    assert!(h.scheduler.take().is_empty());
    assert_eq!(h.relay.supervisor().attempts("fs"), attempts);
    assert_eq!(h.relay.supervisor().phase("fs"), ServicePhase::Stopped);
}

#[test]
fn idle_reap_skips_busy_and_starting_workers() {
    let mut h = Harness::new();
    h.running("fs");
    h.register("git");
    h.send(1, 1, "spawn", json!({"name": "git"}));
    h.send(1, 2, "toolcall", json!({"name": "fs", "method": "slow"}));

    h.relay.sweep_idle(Utc::now() + TimeDelta::seconds(60));
    assert!(h.relay.supervisor().is_active("fs"));
    assert!(h.relay.supervisor().is_active("git"));
}

#[test]
fn idle_reap_skips_recently_used() {
    let mut h = Harness::new();
    h.running("fs");
    h.relay.sweep_idle(Utc::now() + TimeDelta::seconds(1));
    assert!(h.relay.supervisor().is_active("fs"));
}

#[test]
fn unspawn_stops_and_restores() {
    let mut h = Harness::new();
    let generation = h.running("fs");
    h.send(1, 9, "toolcall", json!({"name": "fs", "method": "ls"}));
    let response = h.call("unspawn", json!({"name": "fs"}));
    // The cancelled tool call is answered first.
    assert_eq!(response.id, Some(RequestId::from(9)));
    assert_eq!(response.error_code(), Some(-32603));
    let stopped = h.next(1).unwrap();
    assert_eq!(stopped.result.unwrap()["wasRunning"], true);
    assert!(h.launcher.terminated(generation));
    assert!(h.relay.pending_requests().is_empty());

    let call = h.call("toolcall", json!({"name": "fs", "method": "ls"}));
    assert!(call.error.unwrap().message.contains("not active"));

    let (_, timer) = h.scheduler.take().remove(0);
    h.relay.handle(RelayMessage::Timer(timer));
    assert!(h.relay.registry().contains("fs"));
}

#[test]
fn shutdown_stops_and_unregisters() {
    let mut h = Harness::new();
    let generation = h.running("fs");
    let response = h.call("shutdown", json!({"name": "fs"}));
    assert_eq!(
        response.result.unwrap(),
        json!({"status": "shutdown", "name": "fs"})
    );
    assert!(h.launcher.terminated(generation));
    assert!(!h.relay.registry().is_known("fs"));

    h.exit("fs", generation);
    assert!(h.scheduler.take().is_empty());
}

#[test]
fn unregister_missing_is_not_found() {
    let mut h = Harness::new();
    assert_eq!(
        h.call("unregister", json!({"name": "fs"})).error_code(),
        Some(-32601)
    );
}

#[test]
fn cachetools_and_listtools() {
    let mut h = Harness::new();
    h.register("fs");
    let response = h.call(
        "cachetools",
        json!({"name": "fs", "tools": [{"name": "ls"}, {"name": "cat"}]}),
    );
    assert_eq!(response.result.unwrap()["toolCount"], 2);
    assert!(!h.relay.supervisor().is_active("fs"));

    let one = h.call("listtools", json!({"name": "fs"})).result.unwrap();
    assert_eq!(one["tools"].as_array().unwrap().len(), 2);

    let all = h.call("listtools", json!({})).result.unwrap();
    assert_eq!(all["services"]["fs"][1]["name"], "cat");

    let listed = h.call("list", json!({"name": "fs"})).result.unwrap();
    assert_eq!(listed["toolCount"], 2);
}

#[test]
fn disconnect_drops_only_its_entries() {
    let mut h = Harness::new();
    h.connect(2);
    h.running("fs");
    h.register("git");

    h.send(1, 10, "toolcall", json!({"name": "fs", "method": "a"}));
    h.send(1, 11, "toolcall", json!({"name": "fs", "method": "b"}));
    h.send(1, 12, "spawn", json!({"name": "git"}));
    h.send(2, 20, "toolcall", json!({"name": "fs", "method": "c"}));
    assert_eq!(h.relay.pending_requests().len(), 3);
    assert_eq!(h.relay.pending_spawns().len(), 1);

    h.disconnect(1);
    assert_eq!(h.relay.pending_requests().len(), 1);
    assert!(h.relay.pending_spawns().is_empty());
    assert_eq!(h.relay.connection_count(), 1);
}

#[test]
fn reset_clears_everything() {
    let mut h = Harness::new();
    h.running("fs");
    h.register("git");
    h.send(1, 3, "spawn", json!({"name": "git"}));
    h.send(1, 4, "toolcall", json!({"name": "fs", "method": "a"}));

    h.send(1, 5, "reset", Value::Null);
    let mut responses = Vec::new();
    while let Some(response) = h.next(1) {
        responses.push(response);
    }
    let reset = responses.last().unwrap();
    assert_eq!(reset.result, Some(json!({"status": "reset"})));
    assert_eq!(responses.len(), 3);

    assert!(h.relay.registry().is_empty());
    assert!(h.relay.pending_requests().is_empty());
    assert!(h.relay.pending_spawns().is_empty());
    assert_eq!(h.relay.supervisor().active_count(), 0);
    assert_eq!(h.launcher.alive_count(), 0);

    let listed = h.call("list", json!({}));
    assert_eq!(listed.result.unwrap(), json!({"services": []}));
}

#[test]
fn at_most_one_worker_per_service() {
    let mut h = Harness::new();
    h.register("fs");
    for id in 0..5 {
        h.send(1, id, "spawn", json!({"name": "fs"}));
    }
    assert_eq!(h.launcher.alive_for("fs"), 1);

    let generation = h.relay.supervisor().generation("fs").unwrap();
    h.launcher.mark_dead(generation);
    h.send(1, 9, "spawn", json!({"name": "fs"}));
    assert_eq!(h.launcher.alive_for("fs"), 1);
    assert_eq!(h.launcher.launches().len(), 2);
}

#[test]
fn shutdown_cancels_and_stops() {
    let mut h = Harness::new();
    let generation = h.running("fs");
    h.send(1, 6, "toolcall", json!({"name": "fs", "method": "a"}));
    let (done, _rx) = tokio::sync::oneshot::channel();
    h.relay.handle(RelayMessage::Shutdown { done });
    assert_eq!(h.next(1).unwrap().error_code(), Some(-32603));
    assert!(h.launcher.terminated(generation));
}
