//! Tables of client requests waiting on a worker.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use protocol::RequestId;

/// Identifies one client socket.
pub type ConnectionId = u64;

/// A forwarded tool call awaiting its `tool_result`.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRequest {
    /// The id the client used, echoed in the response.
    pub client_id: RequestId,
    pub connection: ConnectionId,
    pub service: String,
    pub submitted_at: Instant,
}

/// In-flight tool calls keyed by the id sent to the worker.
///
/// Relay ids are generated per call, so two clients reusing the same request
/// id never collide.
#[derive(Debug, Default)]
pub struct PendingRequests {
    entries: HashMap<String, PendingRequest>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, relay_id: String, request: PendingRequest) {
        self.entries.insert(relay_id, request);
    }

    pub fn take(&mut self, relay_id: &str) -> Option<PendingRequest> {
        self.entries.remove(relay_id)
    }

    /// Remove and return entries older than `timeout`.
    pub fn expired(&mut self, now: Instant, timeout: Duration) -> Vec<PendingRequest> {
        self.drain_where(|r| now.saturating_duration_since(r.submitted_at) > timeout)
    }

    /// Remove entries owned by a closed connection. Returns how many.
    pub fn drop_connection(&mut self, connection: ConnectionId) -> usize {
        self.drain_where(|r| r.connection == connection).len()
    }

    /// Remove and return every entry targeting `service`.
    pub fn drain_service(&mut self, service: &str) -> Vec<PendingRequest> {
        self.drain_where(|r| r.service == service)
    }

    pub fn has_service(&self, service: &str) -> bool {
        self.entries.values().any(|r| r.service == service)
    }

    pub fn drain(&mut self) -> Vec<PendingRequest> {
        self.entries.drain().map(|(_, r)| r).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn drain_where(&mut self, pred: impl Fn(&PendingRequest) -> bool) -> Vec<PendingRequest> {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, r)| pred(r))
            .map(|(k, _)| k.clone())
            .collect();
        keys.iter()
            .filter_map(|k| self.entries.remove(k))
            .collect()
    }
}

/// A `spawn` held open until its service is ready.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSpawn {
    pub client_id: RequestId,
    pub connection: ConnectionId,
    pub submitted_at: Instant,
}

/// At most one outstanding spawn per service.
#[derive(Debug, Default)]
pub struct PendingSpawns {
    entries: HashMap<String, PendingSpawn>,
}

impl PendingSpawns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a spawn wait, returning the one it displaced.
    pub fn insert(&mut self, service: String, spawn: PendingSpawn) -> Option<PendingSpawn> {
        self.entries.insert(service, spawn)
    }

    pub fn take(&mut self, service: &str) -> Option<PendingSpawn> {
        self.entries.remove(service)
    }

    pub fn contains(&self, service: &str) -> bool {
        self.entries.contains_key(service)
    }

    /// Remove and return `(service, spawn)` pairs older than `timeout`.
    pub fn expired(&mut self, now: Instant, timeout: Duration) -> Vec<(String, PendingSpawn)> {
        self.drain_where(|s| now.saturating_duration_since(s.submitted_at) > timeout)
    }

    pub fn drop_connection(&mut self, connection: ConnectionId) -> usize {
        self.drain_where(|s| s.connection == connection).len()
    }

    pub fn drain(&mut self) -> Vec<(String, PendingSpawn)> {
        self.entries.drain().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn drain_where(&mut self, pred: impl Fn(&PendingSpawn) -> bool) -> Vec<(String, PendingSpawn)> {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, s)| pred(s))
            .map(|(k, _)| k.clone())
            .collect();
        keys.into_iter()
            .filter_map(|k| self.entries.remove(&k).map(|s| (k, s)))
            .collect()
    }
}
