//! In-memory doubles for the launcher and scheduler seams.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use protocol::{ServiceDefinition, WorkerCommand};

use crate::actor::{Scheduler, Timer};
use crate::error::{Error, Result};
use crate::supervisor::{Generation, Launcher, WorkerLink};

#[derive(Debug, Default)]
struct FakeWorker {
    service: String,
    sent: Vec<WorkerCommand>,
    alive: bool,
    terminated: bool,
}

#[derive(Debug, Default)]
struct FakeState {
    workers: BTreeMap<Generation, FakeWorker>,
    fail_launches: bool,
}

/// Records launches and the commands each fake worker received.
#[derive(Debug, Clone, Default)]
pub struct FakeLauncher {
    state: Arc<Mutex<FakeState>>,
}

impl FakeLauncher {
    pub fn fail_launches(&self, fail: bool) {
        self.state.lock().unwrap().fail_launches = fail;
    }

    /// `(service, generation)` for every launch, oldest first.
    pub fn launches(&self) -> Vec<(String, Generation)> {
        self.state
            .lock()
            .unwrap()
            .workers
            .iter()
            .map(|(generation, w)| (w.service.clone(), *generation))
            .collect()
    }

    pub fn sent(&self, generation: Generation) -> Vec<WorkerCommand> {
        self.state.lock().unwrap().workers[&generation].sent.clone()
    }

    pub fn terminated(&self, generation: Generation) -> bool {
        self.state.lock().unwrap().workers[&generation].terminated
    }

    pub fn mark_dead(&self, generation: Generation) {
        if let Some(worker) = self.state.lock().unwrap().workers.get_mut(&generation) {
            worker.alive = false;
        }
    }

    pub fn alive_count(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .workers
            .values()
            .filter(|w| w.alive)
            .count()
    }

    /// Live workers for one service.
    pub fn alive_for(&self, service: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .workers
            .values()
            .filter(|w| w.alive && w.service == service)
            .count()
    }
}

impl Launcher for FakeLauncher {
    fn launch(
        &mut self,
        definition: &ServiceDefinition,
        generation: Generation,
    ) -> Result<Box<dyn WorkerLink>> {
        let mut state = self.state.lock().unwrap();
        if state.fail_launches {
            return Err(Error::Launch {
                service: definition.name.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            });
        }
        state.workers.insert(
            generation,
            FakeWorker {
                service: definition.name.clone(),
                alive: true,
                ..FakeWorker::default()
            },
        );
        Ok(Box::new(FakeLink {
            state: self.state.clone(),
            generation,
        }))
    }
}

struct FakeLink {
    state: Arc<Mutex<FakeState>>,
    generation: Generation,
}

impl WorkerLink for FakeLink {
    fn send(&mut self, command: WorkerCommand) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let worker = state
            .workers
            .get_mut(&self.generation)
            .ok_or_else(|| Error::Internal("unknown fake worker".to_string()))?;
        if !worker.alive {
            return Err(Error::WorkerGone(worker.service.clone()));
        }
        worker.sent.push(command);
        Ok(())
    }

    fn terminate(&mut self) {
        let mut state = self.state.lock().unwrap();
        if let Some(worker) = state.workers.get_mut(&self.generation) {
            worker.alive = false;
            worker.terminated = true;
        }
    }

    fn is_alive(&self) -> bool {
        let state = self.state.lock().unwrap();
        state
            .workers
            .get(&self.generation)
            .is_some_and(|w| w.alive)
    }
}

/// Keeps scheduled timers instead of running them.
#[derive(Debug, Clone, Default)]
pub struct RecordingScheduler {
    scheduled: Arc<Mutex<Vec<(Duration, Timer)>>>,
}

impl RecordingScheduler {
    pub fn scheduled(&self) -> Vec<(Duration, Timer)> {
        self.scheduled.lock().unwrap().clone()
    }

    /// Remove and return everything scheduled so far.
    pub fn take(&self) -> Vec<(Duration, Timer)> {
        std::mem::take(&mut *self.scheduled.lock().unwrap())
    }
}

impl Scheduler for RecordingScheduler {
    fn schedule(&self, delay: Duration, timer: Timer) {
        self.scheduled.lock().unwrap().push((delay, timer));
    }
}
