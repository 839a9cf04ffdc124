//! Relay tuning parameters.

use std::path::PathBuf;
use std::time::Duration;

use protocol::{DefinitionError, ServiceDefinition};
use serde::Deserialize;

/// Name given to the service built from `default_command`.
pub const DEFAULT_SERVICE_NAME: &str = "default";

/// Startup parameters for the relay.
///
/// Every field has a default, so an empty TOML table is a valid config.
/// Durations are in milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Listen host.
    pub host: String,

    /// Listen port.
    pub port: u16,

    /// Worker executable. Resolved by the binary when unset.
    pub worker_command: Option<PathBuf>,

    pub request_timeout_ms: u64,
    pub request_sweep_ms: u64,
    pub spawn_timeout_ms: u64,
    pub spawn_sweep_ms: u64,
    pub idle_timeout_ms: u64,
    pub idle_sweep_ms: u64,

    /// Closes a client socket after this long without input.
    pub connection_timeout_ms: u64,

    pub max_restart_attempts: u32,
    pub restart_base_delay_ms: u64,

    /// How long a transiently stopped service stays out of the registry.
    pub registration_grace_ms: u64,

    /// How long a worker gets to exit after `shutdown` before it is killed.
    pub shutdown_grace_ms: u64,

    /// Registered as service `default` when `services` is empty.
    pub default_command: Option<String>,
    pub default_args: Vec<String>,

    /// Services registered at startup.
    pub services: Vec<ServiceDefinition>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7411,
            worker_command: None,
            request_timeout_ms: 60_000,
            request_sweep_ms: 1_000,
            spawn_timeout_ms: 30_000,
            spawn_sweep_ms: 1_000,
            idle_timeout_ms: 600_000,
            idle_sweep_ms: 60_000,
            connection_timeout_ms: 300_000,
            max_restart_attempts: 5,
            restart_base_delay_ms: 1_000,
            registration_grace_ms: 1_000,
            shutdown_grace_ms: 2_000,
            default_command: None,
            default_args: Vec::new(),
            services: Vec::new(),
        }
    }
}

impl RelayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn request_sweep(&self) -> Duration {
        Duration::from_millis(self.request_sweep_ms)
    }

    pub fn spawn_timeout(&self) -> Duration {
        Duration::from_millis(self.spawn_timeout_ms)
    }

    pub fn spawn_sweep(&self) -> Duration {
        Duration::from_millis(self.spawn_sweep_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn idle_sweep(&self) -> Duration {
        Duration::from_millis(self.idle_sweep_ms)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn restart_base_delay(&self) -> Duration {
        Duration::from_millis(self.restart_base_delay_ms)
    }

    pub fn registration_grace(&self) -> Duration {
        Duration::from_millis(self.registration_grace_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// The services to register at startup, validated.
    ///
    /// `default_command` only applies when no services are listed.
    pub fn initial_services(&self) -> Result<Vec<ServiceDefinition>, DefinitionError> {
        if self.services.is_empty() {
            if let Some(command) = self.default_command.as_deref() {
                let default = ServiceDefinition::local(DEFAULT_SERVICE_NAME, command)
                    .with_args(self.default_args.iter().cloned());
                default.validate()?;
                return Ok(vec![default]);
            }
        }

        for service in &self.services {
            service.validate()?;
        }
        Ok(self.services.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = RelayConfig::default();
        assert_eq!(config.port, 7411);
        assert!(config.spawn_timeout() < config.request_timeout());
        assert!(config.initial_services().unwrap().is_empty());
    }

    #[test]
    fn default_command_used_without_services() {
        let config = RelayConfig {
            default_command: Some("mcp-filesystem".to_string()),
            default_args: vec!["/tmp".to_string()],
            ..RelayConfig::default()
        };
        let services = config.initial_services().unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(
            services[0],
            ServiceDefinition::local(DEFAULT_SERVICE_NAME, "mcp-filesystem").with_args(["/tmp"])
        );
    }

    #[test]
    fn default_command_ignored_with_services() {
        let config = RelayConfig {
            default_command: Some("mcp-filesystem".to_string()),
            services: vec![ServiceDefinition::local("git", "mcp-git")],
            ..RelayConfig::default()
        };
        let services = config.initial_services().unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].name, "git");
    }

    #[test]
    fn invalid_service_rejected() {
        let config = RelayConfig {
            services: vec![ServiceDefinition::local("bad name", "x")],
            ..RelayConfig::default()
        };
        assert!(config.initial_services().is_err());
    }
}
