// Integration tests for the worker runtime: concurrency-bounded execution,
// retry on failure, timeout enforcement and lifecycle control.

use async_trait::async_trait;
use scribe_relay::queue::{
    AudioPayload, EnqueueOptions, QueueName, Task, TaskPayload, TaskQueue, TaskStatus,
};
use scribe_relay::worker::{JobEvent, TaskProcessor, Worker, WorkerConfig, WorkerEvent};
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn audio_payload(conversation: &str) -> TaskPayload {
    TaskPayload::Audio(AudioPayload {
        session_id: format!("session-{}", conversation),
        conversation_id: conversation.to_string(),
    })
}

fn fast_config(name: &str) -> WorkerConfig {
    WorkerConfig {
        name: name.to_string(),
        concurrency: 2,
        task_timeout: Duration::from_millis(200),
        poll_interval: Duration::from_millis(10),
        health_check_interval: Duration::from_secs(60),
        stall_timeout: Duration::from_secs(60),
        memory_threshold_mb: 64 * 1024,
    }
}

fn fast_opts() -> EnqueueOptions {
    EnqueueOptions {
        backoff_base_ms: 10,
        ..EnqueueOptions::default()
    }
}

/// Fails a fixed number of executions, then succeeds.
struct FlakyProcessor {
    failures: u32,
    calls: AtomicU32,
}

#[async_trait]
impl TaskProcessor for FlakyProcessor {
    async fn execute(&self, _task: &Task) -> anyhow::Result<serde_json::Value> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            anyhow::bail!("induced failure {}", call + 1);
        }
        Ok(json!({ "ok": true }))
    }
}

/// Sleeps past the worker's task timeout.
struct SlowProcessor;

#[async_trait]
impl TaskProcessor for SlowProcessor {
    async fn execute(&self, _task: &Task) -> anyhow::Result<serde_json::Value> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(serde_json::Value::Null)
    }
}

async fn next_event(rx: &mut mpsc::Receiver<JobEvent>) -> JobEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a job event")
        .expect("event channel closed")
}

#[tokio::test]
async fn task_succeeding_on_third_attempt_completes() {
    let queue = Arc::new(TaskQueue::new(QueueName::Audio));
    let (job_tx, mut job_rx) = mpsc::channel(64);
    let (worker_tx, _worker_rx) = mpsc::channel::<WorkerEvent>(8);

    let worker = Worker::new(
        fast_config("audio-worker"),
        Arc::clone(&queue),
        Arc::new(FlakyProcessor {
            failures: 2,
            calls: AtomicU32::new(0),
        }),
        job_tx,
        worker_tx,
    );

    queue.enqueue(audio_payload("c1"), fast_opts()).await;
    Arc::clone(&worker).start().await;

    let mut completed: Option<Task> = None;
    let mut failures = 0;
    for _ in 0..16 {
        match next_event(&mut job_rx).await {
            JobEvent::TaskCompleted { task, .. } => {
                completed = Some(task);
                break;
            }
            JobEvent::TaskFailed { terminal, .. } => {
                assert!(!terminal, "must not exhaust before the third attempt");
                failures += 1;
            }
            JobEvent::TaskActive { .. } | JobEvent::TaskStalled { .. } => {}
        }
    }
    worker.stop().await;

    let completed = completed.expect("task never completed");
    assert_eq!(completed.attempts, 3);
    assert_eq!(completed.status, TaskStatus::Completed);
    assert_eq!(failures, 2);

    let status = worker.status().await;
    assert_eq!(status.processed, 1);
    assert_eq!(status.failed, 2);
}

#[tokio::test]
async fn exhausted_task_is_terminal() {
    let queue = Arc::new(TaskQueue::new(QueueName::Audio));
    let (job_tx, mut job_rx) = mpsc::channel(64);
    let (worker_tx, _worker_rx) = mpsc::channel::<WorkerEvent>(8);

    let worker = Worker::new(
        fast_config("audio-worker"),
        Arc::clone(&queue),
        Arc::new(FlakyProcessor {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        }),
        job_tx,
        worker_tx,
    );

    let task = queue.enqueue(audio_payload("c1"), fast_opts()).await;
    Arc::clone(&worker).start().await;

    let mut terminal = false;
    for _ in 0..16 {
        if let JobEvent::TaskFailed {
            task: failed,
            terminal: t,
            ..
        } = next_event(&mut job_rx).await
        {
            if t {
                assert_eq!(failed.id, task.id);
                assert_eq!(failed.attempts, 3);
                terminal = true;
                break;
            }
        }
    }
    worker.stop().await;

    assert!(terminal, "task never failed terminally");
    let dead = queue.get(&task.id).await.unwrap();
    assert_eq!(dead.status, TaskStatus::Failed);
}

#[tokio::test]
async fn timeout_counts_as_a_failed_attempt() {
    let queue = Arc::new(TaskQueue::new(QueueName::Audio));
    let (job_tx, mut job_rx) = mpsc::channel(64);
    let (worker_tx, _worker_rx) = mpsc::channel::<WorkerEvent>(8);

    let worker = Worker::new(
        fast_config("audio-worker"),
        Arc::clone(&queue),
        Arc::new(SlowProcessor),
        job_tx,
        worker_tx,
    );

    queue
        .enqueue(
            audio_payload("c1"),
            EnqueueOptions {
                max_attempts: 1,
                ..fast_opts()
            },
        )
        .await;
    Arc::clone(&worker).start().await;

    let mut saw_timeout_failure = false;
    for _ in 0..8 {
        if let JobEvent::TaskFailed {
            error, terminal, ..
        } = next_event(&mut job_rx).await
        {
            assert!(error.contains("timed out"), "unexpected error: {}", error);
            assert!(terminal);
            saw_timeout_failure = true;
            break;
        }
    }
    worker.stop().await;
    assert!(saw_timeout_failure);
}

#[tokio::test]
async fn stopped_worker_dispatches_nothing() {
    let queue = Arc::new(TaskQueue::new(QueueName::Audio));
    let (job_tx, mut job_rx) = mpsc::channel(64);
    let (worker_tx, _worker_rx) = mpsc::channel::<WorkerEvent>(8);

    let worker = Worker::new(
        fast_config("audio-worker"),
        Arc::clone(&queue),
        Arc::new(FlakyProcessor {
            failures: 0,
            calls: AtomicU32::new(0),
        }),
        job_tx,
        worker_tx,
    );

    Arc::clone(&worker).start().await;
    assert!(worker.is_running());
    worker.stop().await;
    assert!(!worker.is_running());

    queue.enqueue(audio_payload("c1"), fast_opts()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(job_rx.try_recv().is_err(), "no events after stop");
    assert_eq!(queue.stats().await.waiting, 1);
}

#[tokio::test]
async fn status_reports_identity_and_counters() {
    let queue = Arc::new(TaskQueue::new(QueueName::Summary));
    let (job_tx, _job_rx) = mpsc::channel(64);
    let (worker_tx, _worker_rx) = mpsc::channel::<WorkerEvent>(8);

    let worker = Worker::new(
        fast_config("summary-worker"),
        queue,
        Arc::new(FlakyProcessor {
            failures: 0,
            calls: AtomicU32::new(0),
        }),
        job_tx,
        worker_tx,
    );

    let status = worker.status().await;
    assert_eq!(status.name, "summary-worker");
    assert_eq!(status.queue, QueueName::Summary);
    assert!(!status.running);
    assert_eq!(status.concurrency, 2);
    assert_eq!(status.processed, 0);
    assert!(status.started_at.is_none());

    Arc::clone(&worker).start().await;
    let status = worker.status().await;
    assert!(status.running);
    assert!(status.started_at.is_some());
    worker.stop().await;
}
