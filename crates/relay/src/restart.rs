//! Restart policy for workers that exit without being asked to.

use std::time::Duration;

use serde::Serialize;

/// Caps and delays applied to unplanned worker exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Attempts allowed before the service is marked failed.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RestartPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// `base × 2^(attempt-1)` for the 1-based `attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

/// Where a service sits in its worker lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServicePhase {
    #[default]
    Stopped,
    Starting,
    Ready,
    /// Waiting for a scheduled restart.
    Backoff,
    /// Exceeded the restart cap. Stays here until an explicit spawn.
    Failed,
}

/// What to do after an unplanned exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartDecision {
    /// The exit looked like a crash: restart without delay.
    Immediate { attempt: u32, epoch: u64 },
    Backoff {
        attempt: u32,
        delay: Duration,
        epoch: u64,
    },
    Failed {
        attempts: u32,
        last_error: Option<String>,
    },
}

/// Per-service restart bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct RestartState {
    pub attempts: u32,
    pub phase: ServicePhase,
    pub last_error: Option<String>,
    /// Bumped on every schedule or launch, so older timers can be recognised.
    pub epoch: u64,
}

impl RestartState {
    /// Count the exit and decide the next step.
    pub fn on_unplanned_exit(&mut self, policy: &RestartPolicy, crashed: bool) -> RestartDecision {
        self.attempts = self.attempts.saturating_add(1);
        self.epoch += 1;

        if self.attempts > policy.max_attempts {
            self.phase = ServicePhase::Failed;
            return RestartDecision::Failed {
                attempts: self.attempts,
                last_error: self.last_error.clone(),
            };
        }

        self.phase = ServicePhase::Backoff;
        if crashed {
            RestartDecision::Immediate {
                attempt: self.attempts,
                epoch: self.epoch,
            }
        } else {
            RestartDecision::Backoff {
                attempt: self.attempts,
                delay: policy.backoff(self.attempts),
                epoch: self.epoch,
            }
        }
    }

    pub fn on_starting(&mut self) {
        self.phase = ServicePhase::Starting;
        self.epoch += 1;
    }

    pub fn on_ready(&mut self) {
        self.attempts = 0;
        self.last_error = None;
        self.phase = ServicePhase::Ready;
    }

    /// A deliberate stop. Attempts are left as they are.
    pub fn on_stopped(&mut self) {
        self.phase = ServicePhase::Stopped;
        self.epoch += 1;
    }

    /// Forget past failures before an explicit spawn.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.last_error = None;
        self.phase = ServicePhase::Stopped;
    }
}
