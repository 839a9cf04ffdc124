//! In-memory service registry.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use protocol::{DefinitionError, ServiceDefinition};
use serde::Serialize;

/// A definition plus its bookkeeping timestamps.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRecord {
    #[serde(flatten)]
    pub definition: ServiceDefinition,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
}

impl ServiceRecord {
    fn new(definition: ServiceDefinition, now: DateTime<Utc>) -> Self {
        Self {
            definition,
            created_at: now,
            last_used_at: now,
        }
    }
}

/// Service name → definition. Holds no process state.
///
/// A service can be *parked*: temporarily out of the registry while its
/// worker is being stopped, then restored. Parked services are not visible
/// to lookups.
#[derive(Debug, Default)]
pub struct Registry {
    services: BTreeMap<String, ServiceRecord>,
    parked: HashMap<String, ServiceRecord>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and insert, replacing any prior definition of the same name.
    ///
    /// Returns `true` if a definition was replaced.
    pub fn register(
        &mut self,
        definition: ServiceDefinition,
        now: DateTime<Utc>,
    ) -> Result<bool, DefinitionError> {
        definition.validate()?;
        let name = definition.name.clone();
        let parked = self.parked.remove(&name).is_some();
        let replaced = self
            .services
            .insert(name, ServiceRecord::new(definition, now))
            .is_some();
        Ok(replaced || parked)
    }

    /// Remove a service, including a parked one.
    pub fn unregister(&mut self, name: &str) -> Option<ServiceRecord> {
        let parked = self.parked.remove(name);
        self.services.remove(name).or(parked)
    }

    pub fn get(&self, name: &str) -> Option<&ServiceRecord> {
        self.services.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    /// Registered or parked.
    pub fn is_known(&self, name: &str) -> bool {
        self.services.contains_key(name) || self.parked.contains_key(name)
    }

    pub fn is_parked(&self, name: &str) -> bool {
        self.parked.contains_key(name)
    }

    /// Update `lastUsedAt`. Returns `false` if the service is not registered.
    pub fn touch(&mut self, name: &str, now: DateTime<Utc>) -> bool {
        match self.services.get_mut(name) {
            Some(record) => {
                record.last_used_at = now;
                true
            }
            None => false,
        }
    }

    /// Move a service out of view until [`restore`](Self::restore).
    pub fn park(&mut self, name: &str) -> bool {
        match self.services.remove(name) {
            Some(record) => {
                self.parked.insert(name.to_string(), record);
                true
            }
            None => false,
        }
    }

    /// Bring a parked service back. A definition registered in the meantime wins.
    pub fn restore(&mut self, name: &str) -> bool {
        let Some(record) = self.parked.remove(name) else {
            return false;
        };
        if self.services.contains_key(name) {
            return false;
        }
        self.services.insert(name.to_string(), record);
        true
    }

    /// Registered services in name order.
    pub fn iter(&self) -> impl Iterator<Item = &ServiceRecord> {
        self.services.values()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn clear(&mut self) {
        self.services.clear();
        self.parked.clear();
    }
}
