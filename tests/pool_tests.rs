// Integration tests for the worker pool manager: bounded auto-restart,
// the terminal give-up event, manual restart and aggregated status.

use async_trait::async_trait;
use scribe_relay::queue::{QueueName, Task, TaskQueue};
use scribe_relay::worker::{
    JobEvent, PoolConfig, PoolEvent, TaskProcessor, Worker, WorkerConfig, WorkerEvent, WorkerPool,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

struct IdleProcessor;

#[async_trait]
impl TaskProcessor for IdleProcessor {
    async fn execute(&self, _task: &Task) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::Value::Null)
    }
}

fn quiet_config(name: &str) -> WorkerConfig {
    WorkerConfig {
        name: name.to_string(),
        poll_interval: Duration::from_millis(10),
        // Keep the sampler out of the way; trouble is injected by the tests.
        health_check_interval: Duration::from_secs(600),
        memory_threshold_mb: 64 * 1024,
        ..WorkerConfig::default()
    }
}

struct PoolSetup {
    pool: Arc<WorkerPool>,
    pool_events: mpsc::Receiver<PoolEvent>,
    worker_tx: mpsc::Sender<WorkerEvent>,
}

async fn build_pool(config: PoolConfig) -> PoolSetup {
    let (job_tx, _job_rx) = mpsc::channel::<JobEvent>(64);
    let (worker_tx, worker_rx) = mpsc::channel::<WorkerEvent>(64);

    let mut workers = HashMap::new();
    for queue in QueueName::ALL {
        let worker = Worker::new(
            quiet_config(&format!("{}-worker", queue)),
            Arc::new(TaskQueue::new(queue)),
            Arc::new(IdleProcessor),
            job_tx.clone(),
            worker_tx.clone(),
        );
        workers.insert(queue, worker);
    }

    let (pool, pool_events) = WorkerPool::new(workers, config);
    let supervisor = Arc::clone(&pool).spawn_supervisor(worker_rx);
    pool.store_supervisor(supervisor).await;

    PoolSetup {
        pool,
        pool_events,
        worker_tx,
    }
}

async fn next_pool_event(rx: &mut mpsc::Receiver<PoolEvent>) -> PoolEvent {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("timed out waiting for a pool event")
        .expect("pool event channel closed")
}

#[tokio::test]
async fn start_all_and_stop_all_cover_every_worker() {
    let setup = build_pool(PoolConfig::default()).await;

    setup.pool.start_all().await;
    let status = setup.pool.status().await;
    assert_eq!(status.total, 4);
    assert_eq!(status.running, 4);
    assert_eq!(status.healthy, 4);

    setup.pool.stop_all().await;
    let status = setup.pool.status().await;
    assert_eq!(status.running, 0);
}

#[tokio::test]
async fn restart_budget_is_bounded_and_terminal() {
    let mut setup = build_pool(PoolConfig {
        auto_restart: true,
        max_restart_attempts: 3,
        restart_delay: Duration::from_millis(10),
        restart_reset_window: Duration::from_secs(600),
    }).await;
    setup.pool.start_all().await;

    let trouble = || WorkerEvent::Error {
        worker: "audio-worker".to_string(),
        error: "induced".to_string(),
    };

    // Three errors inside the window consume the whole budget.
    for expected_attempt in 1..=3u32 {
        setup.worker_tx.send(trouble()).await.unwrap();
        match next_pool_event(&mut setup.pool_events).await {
            PoolEvent::WorkerRestarted { worker, attempt } => {
                assert_eq!(worker, "audio-worker");
                assert_eq!(attempt, expected_attempt);
            }
            other => panic!("expected a restart, got {:?}", other),
        }
    }

    // The fourth error is terminal: no further restart is attempted.
    setup.worker_tx.send(trouble()).await.unwrap();
    match next_pool_event(&mut setup.pool_events).await {
        PoolEvent::WorkerMaxRestartAttemptsReached { worker } => {
            assert_eq!(worker, "audio-worker");
        }
        other => panic!("expected the terminal event, got {:?}", other),
    }

    let audio = setup.pool.worker(QueueName::Audio).unwrap();
    assert!(!audio.is_running(), "the exhausted worker stays stopped");

    // Later trouble for the same worker is ignored.
    setup.worker_tx.send(trouble()).await.unwrap();
    let nothing =
        tokio::time::timeout(Duration::from_millis(300), setup.pool_events.recv()).await;
    assert!(nothing.is_err());

    setup.pool.stop_all().await;
}

#[tokio::test]
async fn auto_restart_can_be_disabled() {
    let mut setup = build_pool(PoolConfig {
        auto_restart: false,
        ..PoolConfig::default()
    }).await;
    setup.pool.start_all().await;

    setup
        .worker_tx
        .send(WorkerEvent::Unhealthy {
            worker: "summary-worker".to_string(),
            reason: "induced".to_string(),
        })
        .await
        .unwrap();

    let nothing =
        tokio::time::timeout(Duration::from_millis(300), setup.pool_events.recv()).await;
    assert!(nothing.is_err(), "no restart when auto-restart is off");

    setup.pool.stop_all().await;
}

#[tokio::test]
async fn manual_restart_resets_the_budget() {
    let mut setup = build_pool(PoolConfig {
        auto_restart: true,
        max_restart_attempts: 1,
        restart_delay: Duration::from_millis(10),
        restart_reset_window: Duration::from_secs(600),
    }).await;
    setup.pool.start_all().await;

    let trouble = || WorkerEvent::Error {
        worker: "document-worker".to_string(),
        error: "induced".to_string(),
    };

    setup.worker_tx.send(trouble()).await.unwrap();
    assert!(matches!(
        next_pool_event(&mut setup.pool_events).await,
        PoolEvent::WorkerRestarted { attempt: 1, .. }
    ));

    setup.worker_tx.send(trouble()).await.unwrap();
    assert!(matches!(
        next_pool_event(&mut setup.pool_events).await,
        PoolEvent::WorkerMaxRestartAttemptsReached { .. }
    ));

    // A manual restart clears the terminal state and restores the budget.
    assert!(setup.pool.restart_worker(QueueName::Document).await);
    let document = setup.pool.worker(QueueName::Document).unwrap();
    assert!(document.is_running());

    setup.worker_tx.send(trouble()).await.unwrap();
    assert!(matches!(
        next_pool_event(&mut setup.pool_events).await,
        PoolEvent::WorkerRestarted { attempt: 1, .. }
    ));

    setup.pool.stop_all().await;
}
