use crate::queue::{FailureOutcome, QueueName, Task, TaskQueue};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Pause between stop and start during a restart.
const RESTART_PAUSE: Duration = Duration::from_millis(500);

/// Stage logic plugged into the generic harness.
///
/// The concrete stages (audio, summary, document, notification) are
/// collaborators from the runtime's point of view: each supplies one
/// `execute` over its own payload shape.
#[async_trait]
pub trait TaskProcessor: Send + Sync {
    async fn execute(&self, task: &Task) -> anyhow::Result<serde_json::Value>;
}

/// Job-level events published for the pool manager and, indirectly, the
/// orchestrator.
#[derive(Debug, Clone)]
pub enum JobEvent {
    TaskActive { task: Task },
    TaskCompleted { task: Task, result: serde_json::Value },
    TaskFailed { task: Task, error: String, terminal: bool },
    TaskStalled { task: Task },
}

/// Worker-level trouble consumed by the pool manager's supervisor.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Error { worker: String, error: String },
    Unhealthy { worker: String, reason: String },
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub name: String,
    /// Bounded simultaneous in-flight tasks
    pub concurrency: usize,
    /// Exceeding this marks the attempt failed and follows normal retry
    pub task_timeout: Duration,
    pub poll_interval: Duration,
    pub health_check_interval: Duration,
    /// Active tasks unacknowledged past this are requeued
    pub stall_timeout: Duration,
    pub memory_threshold_mb: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "worker".to_string(),
            concurrency: 4,
            task_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(250),
            health_check_interval: Duration::from_secs(10),
            stall_timeout: Duration::from_secs(30),
            memory_threshold_mb: 512,
        }
    }
}

/// Point-in-time snapshot for the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub name: String,
    pub queue: QueueName,
    pub running: bool,
    pub healthy: bool,
    pub concurrency: usize,
    pub processed: u64,
    pub failed: u64,
    pub active: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub last_health_check: Option<DateTime<Utc>>,
}

/// Generic worker harness bound to one queue and one processor.
///
/// Enforces the concurrency ceiling and per-task timeout, samples health
/// periodically, and publishes job events outward.
pub struct Worker {
    config: WorkerConfig,
    queue: Arc<TaskQueue>,
    processor: Arc<dyn TaskProcessor>,
    job_events: mpsc::Sender<JobEvent>,
    worker_events: mpsc::Sender<WorkerEvent>,
    running: AtomicBool,
    healthy: AtomicBool,
    processed: AtomicU64,
    failed: AtomicU64,
    active: AtomicU64,
    started_at: Mutex<Option<DateTime<Utc>>>,
    last_health_check: Mutex<Option<DateTime<Utc>>>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
    health: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    pub fn new(
        config: WorkerConfig,
        queue: Arc<TaskQueue>,
        processor: Arc<dyn TaskProcessor>,
        job_events: mpsc::Sender<JobEvent>,
        worker_events: mpsc::Sender<WorkerEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            queue,
            processor,
            job_events,
            worker_events,
            running: AtomicBool::new(false),
            healthy: AtomicBool::new(true),
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            active: AtomicU64::new(0),
            started_at: Mutex::new(None),
            last_health_check: Mutex::new(None),
            dispatch: Mutex::new(None),
            health: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn queue_name(&self) -> QueueName {
        self.queue.name()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    /// Start the dispatch and health loops.
    pub async fn start(self: Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Worker {} already started", self.config.name);
            return;
        }

        info!(
            "Starting worker {} on queue {} (concurrency={})",
            self.config.name,
            self.queue.name(),
            self.config.concurrency
        );

        self.healthy.store(true, Ordering::SeqCst);
        *self.started_at.lock().await = Some(Utc::now());

        let worker = Arc::clone(&self);
        let dispatch = tokio::spawn(async move {
            worker.run_dispatch().await;
        });
        *self.dispatch.lock().await = Some(dispatch);

        let worker = Arc::clone(&self);
        let health = tokio::spawn(async move {
            worker.run_health().await;
        });
        *self.health.lock().await = Some(health);
    }

    /// Stop dispatching. In-flight tasks run to completion; their effects
    /// are idempotent if the stall reaper hands them out again.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Stopping worker {}", self.config.name);

        if let Some(handle) = self.dispatch.lock().await.take() {
            if let Err(e) = handle.await {
                warn!("Worker {} dispatch loop panicked: {}", self.config.name, e);
            }
        }
        if let Some(handle) = self.health.lock().await.take() {
            handle.abort();
        }
        *self.started_at.lock().await = None;
    }

    /// Stop, short fixed pause, start.
    pub async fn restart(self: Arc<Self>) {
        info!("Restarting worker {}", self.config.name);
        self.stop().await;
        tokio::time::sleep(RESTART_PAUSE).await;
        self.start().await;
    }

    pub async fn status(&self) -> WorkerStatus {
        WorkerStatus {
            name: self.config.name.clone(),
            queue: self.queue.name(),
            running: self.is_running(),
            healthy: self.is_healthy(),
            concurrency: self.config.concurrency,
            processed: self.processed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            active: self.active.load(Ordering::SeqCst),
            started_at: *self.started_at.lock().await,
            last_health_check: *self.last_health_check.lock().await,
        }
    }

    async fn run_dispatch(self: Arc<Self>) {
        debug!("Worker {} dispatch loop started", self.config.name);
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));

        while self.running.load(Ordering::SeqCst) {
            // Bounded wait on a permit so a stop is noticed promptly even
            // when every slot is busy.
            let permit = match tokio::time::timeout(
                self.config.poll_interval,
                Arc::clone(&semaphore).acquire_owned(),
            )
            .await
            {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => break,
                Err(_) => continue,
            };

            match self.queue.dequeue().await {
                Some(task) => {
                    let worker = Arc::clone(&self);
                    tokio::spawn(async move {
                        worker.run_task(task).await;
                        drop(permit);
                    });
                }
                None => {
                    drop(permit);
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }
        debug!("Worker {} dispatch loop stopped", self.config.name);
    }

    async fn run_task(&self, task: Task) {
        self.active.fetch_add(1, Ordering::SeqCst);
        self.publish_job(JobEvent::TaskActive { task: task.clone() })
            .await;

        let outcome =
            tokio::time::timeout(self.config.task_timeout, self.processor.execute(&task)).await;

        match outcome {
            Ok(Ok(result)) => {
                // A None here means the stall reaper already took the task
                // back; stage side effects are idempotent, so just move on.
                if let Some(completed) = self.queue.ack_success(&task.id).await {
                    self.processed.fetch_add(1, Ordering::SeqCst);
                    debug!(
                        "Worker {} completed task {} (attempt {})",
                        self.config.name, completed.id, completed.attempts
                    );
                    self.publish_job(JobEvent::TaskCompleted {
                        task: completed,
                        result,
                    })
                    .await;
                }
            }
            Ok(Err(e)) => {
                self.record_failure(&task, format!("{:#}", e)).await;
            }
            Err(_) => {
                self.record_failure(
                    &task,
                    format!("execution timed out after {:?}", self.config.task_timeout),
                )
                .await;
            }
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    async fn record_failure(&self, task: &Task, error: String) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        warn!(
            "Worker {} task {} attempt {} failed: {}",
            self.config.name, task.id, task.attempts, error
        );

        match self.queue.ack_failure(&task.id, &error).await {
            Some(FailureOutcome::Retried { task }) => {
                self.publish_job(JobEvent::TaskFailed {
                    task,
                    error,
                    terminal: false,
                })
                .await;
            }
            Some(FailureOutcome::Exhausted { task }) => {
                self.publish_job(JobEvent::TaskFailed {
                    task,
                    error,
                    terminal: true,
                })
                .await;
            }
            None => {}
        }
    }

    async fn run_health(self: Arc<Self>) {
        let mut system = sysinfo::System::new();

        loop {
            tokio::time::sleep(self.config.health_check_interval).await;
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            for task in self.queue.reap_stalled(self.config.stall_timeout).await {
                self.publish_job(JobEvent::TaskStalled { task }).await;
            }

            let mut trouble: Option<WorkerEvent> = None;

            if let Some(memory) = current_memory_bytes(&mut system) {
                let threshold = self.config.memory_threshold_mb.saturating_mul(1024 * 1024);
                if memory > threshold {
                    trouble = Some(WorkerEvent::Unhealthy {
                        worker: self.config.name.clone(),
                        reason: format!(
                            "memory {}MB above threshold {}MB",
                            memory / (1024 * 1024),
                            self.config.memory_threshold_mb
                        ),
                    });
                }
            }

            if trouble.is_none() {
                let dispatch_dead = self
                    .dispatch
                    .lock()
                    .await
                    .as_ref()
                    .map(|h| h.is_finished())
                    .unwrap_or(true);
                if dispatch_dead {
                    trouble = Some(WorkerEvent::Error {
                        worker: self.config.name.clone(),
                        error: "dispatch loop is not running".to_string(),
                    });
                }
            }

            *self.last_health_check.lock().await = Some(Utc::now());

            match trouble {
                None => self.healthy.store(true, Ordering::SeqCst),
                Some(event) => {
                    self.healthy.store(false, Ordering::SeqCst);
                    warn!("Worker {} unhealthy", self.config.name);
                    if self.worker_events.send(event).await.is_err() {
                        debug!("Worker event dropped, supervisor gone");
                    }
                }
            }
        }
    }

    async fn publish_job(&self, event: JobEvent) {
        if self.job_events.send(event).await.is_err() {
            debug!("Job event from {} dropped, receiver gone", self.config.name);
        }
    }
}

/// Resident memory of this process, if the platform reports it.
fn current_memory_bytes(system: &mut sysinfo::System) -> Option<u64> {
    let pid = sysinfo::get_current_pid().ok()?;
    system.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).map(|p| p.memory())
}
