use super::runtime::{Worker, WorkerEvent, WorkerStatus};
use crate::queue::QueueName;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Capacity of the pool event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub auto_restart: bool,
    pub max_restart_attempts: u32,
    /// Fixed delay before an automatic restart
    pub restart_delay: Duration,
    /// Trouble arriving later than this after the last restart starts a
    /// fresh attempt budget
    pub restart_reset_window: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            auto_restart: true,
            max_restart_attempts: 3,
            restart_delay: Duration::from_secs(1),
            restart_reset_window: Duration::from_secs(60),
        }
    }
}

/// Supervision outcomes surfaced to the operator.
#[derive(Debug, Clone)]
pub enum PoolEvent {
    WorkerRestarted { worker: String, attempt: u32 },
    /// Terminal: the worker's restart budget is spent and it stays stopped
    WorkerMaxRestartAttemptsReached { worker: String },
}

/// Aggregated pool health for external health endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub total: usize,
    pub running: usize,
    pub healthy: usize,
    pub workers: Vec<WorkerStatus>,
}

#[derive(Default)]
struct RestartState {
    attempts: u32,
    last_restart: Option<Instant>,
    exceeded: bool,
}

/// Supervisor owning exactly one worker per queue type.
///
/// Applies bounded auto-restart on worker trouble and aggregates health for
/// the admin API.
pub struct WorkerPool {
    workers: HashMap<QueueName, Arc<Worker>>,
    config: PoolConfig,
    restarts: Mutex<HashMap<String, RestartState>>,
    events: mpsc::Sender<PoolEvent>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(
        workers: HashMap<QueueName, Arc<Worker>>,
        config: PoolConfig,
    ) -> (Arc<Self>, mpsc::Receiver<PoolEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let pool = Arc::new(Self {
            workers,
            config,
            restarts: Mutex::new(HashMap::new()),
            events: tx,
            supervisor: Mutex::new(None),
        });
        (pool, rx)
    }

    pub fn worker(&self, queue: QueueName) -> Option<Arc<Worker>> {
        self.workers.get(&queue).cloned()
    }

    pub async fn start_all(&self) {
        info!("Starting worker pool ({} workers)", self.workers.len());
        for name in QueueName::ALL {
            if let Some(worker) = self.workers.get(&name) {
                Arc::clone(worker).start().await;
            }
        }
    }

    pub async fn stop_all(&self) {
        info!("Stopping worker pool");
        for name in QueueName::ALL {
            if let Some(worker) = self.workers.get(&name) {
                worker.stop().await;
            }
        }
        if let Some(handle) = self.supervisor.lock().await.take() {
            handle.abort();
        }
    }

    /// Manual restart. Resets the worker's auto-restart budget.
    pub async fn restart_worker(&self, queue: QueueName) -> bool {
        let Some(worker) = self.workers.get(&queue) else {
            return false;
        };
        {
            let mut restarts = self.restarts.lock().await;
            restarts.remove(worker.name());
        }
        Arc::clone(worker).restart().await;
        true
    }

    /// React to worker trouble events with bounded auto-restart.
    pub fn spawn_supervisor(
        self: Arc<Self>,
        mut worker_events: mpsc::Receiver<WorkerEvent>,
    ) -> JoinHandle<()> {
        let pool = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            while let Some(event) = worker_events.recv().await {
                let (name, detail) = match event {
                    WorkerEvent::Error { worker, error } => (worker, error),
                    WorkerEvent::Unhealthy { worker, reason } => (worker, reason),
                };
                pool.handle_worker_trouble(&name, &detail).await;
            }
            debug!("Pool supervisor stopped");
        });
        handle
    }

    pub async fn store_supervisor(&self, handle: JoinHandle<()>) {
        *self.supervisor.lock().await = Some(handle);
    }

    pub async fn status(&self) -> PoolStatus {
        let mut workers = Vec::with_capacity(self.workers.len());
        for name in QueueName::ALL {
            if let Some(worker) = self.workers.get(&name) {
                workers.push(worker.status().await);
            }
        }
        PoolStatus {
            total: workers.len(),
            running: workers.iter().filter(|w| w.running).count(),
            healthy: workers.iter().filter(|w| w.healthy).count(),
            workers,
        }
    }

    async fn handle_worker_trouble(&self, name: &str, detail: &str) {
        if !self.config.auto_restart {
            debug!("Auto-restart disabled, ignoring trouble from {}", name);
            return;
        }
        let Some(worker) = self.workers.values().find(|w| w.name() == name).cloned() else {
            warn!("Trouble from unknown worker {} ignored", name);
            return;
        };

        let attempt = {
            let mut restarts = self.restarts.lock().await;
            let state = restarts.entry(name.to_string()).or_default();
            if state.exceeded {
                return;
            }
            if let Some(last) = state.last_restart {
                if last.elapsed() > self.config.restart_reset_window {
                    state.attempts = 0;
                }
            }
            if state.attempts >= self.config.max_restart_attempts {
                state.exceeded = true;
                None
            } else {
                state.attempts += 1;
                state.last_restart = Some(Instant::now());
                Some(state.attempts)
            }
        };

        match attempt {
            None => {
                warn!(
                    "Worker {} exceeded {} restart attempts, giving up: {}",
                    name, self.config.max_restart_attempts, detail
                );
                worker.stop().await;
                self.emit(PoolEvent::WorkerMaxRestartAttemptsReached {
                    worker: name.to_string(),
                })
                .await;
            }
            Some(attempt) => {
                warn!(
                    "Worker {} trouble ({}), restart attempt {}/{}",
                    name, detail, attempt, self.config.max_restart_attempts
                );
                tokio::time::sleep(self.config.restart_delay).await;
                worker.restart().await;
                self.emit(PoolEvent::WorkerRestarted {
                    worker: name.to_string(),
                    attempt,
                })
                .await;
            }
        }
    }

    async fn emit(&self, event: PoolEvent) {
        if self.events.send(event).await.is_err() {
            debug!("Pool event dropped, receiver gone");
        }
    }
}
