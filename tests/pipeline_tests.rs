// Integration tests for the orchestrator and the four stage processors:
// completion-triggered chaining, duplicate-enqueue guards, terminal failure
// handling and the full audio→summary→document→notification run.

use async_trait::async_trait;
use scribe_relay::pipeline::{
    AudioStage, ChangeNotification, ChangeOp, DocumentStage, NotificationStage, SummaryStage,
};
use scribe_relay::queue::QueueName;
use scribe_relay::worker::{JobEvent, Worker, WorkerConfig, WorkerEvent};
use scribe_relay::{
    Attachment, Conversation, ConversationStatus, FsStorage, MarkdownRenderer, NoopBroadcaster,
    Notifier, ObjectStorage, Orchestrator, OrchestratorConfig, QueueManager, SessionRegistry,
    Summarizer, TruncatingSummarizer,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// Captures deliveries instead of sending mail.
struct RecordingNotifier {
    deliveries: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    fn new() -> Self {
        Self {
            deliveries: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(
        &self,
        recipient: &str,
        subject: &str,
        _body: &str,
        _attachments: &[Attachment],
    ) -> anyhow::Result<String> {
        let mut deliveries = self.deliveries.lock().await;
        deliveries.push((recipient.to_string(), subject.to_string()));
        Ok(format!("delivery-{}", deliveries.len()))
    }
}

/// Summarizer that always fails, for terminal-failure tests.
struct BrokenSummarizer;

#[async_trait]
impl Summarizer for BrokenSummarizer {
    async fn summarize(
        &self,
        _transcript: &str,
        _language: &str,
        _hint: Option<&str>,
    ) -> anyhow::Result<scribe_relay::external::SummaryResult> {
        anyhow::bail!("model offline")
    }
}

struct Harness {
    registry: Arc<SessionRegistry>,
    queues: Arc<QueueManager>,
    orchestrator: Arc<Orchestrator>,
    notifier: Arc<RecordingNotifier>,
    workers: HashMap<QueueName, Arc<Worker>>,
    _artifacts: tempfile::TempDir,
}

fn orchestrator_config() -> OrchestratorConfig {
    OrchestratorConfig {
        summary_settle_delay: Duration::from_millis(50),
        max_attempts: 3,
        backoff_base_ms: 10,
    }
}

fn worker_config(name: &str) -> WorkerConfig {
    WorkerConfig {
        name: name.to_string(),
        concurrency: 2,
        task_timeout: Duration::from_secs(5),
        poll_interval: Duration::from_millis(10),
        health_check_interval: Duration::from_secs(60),
        stall_timeout: Duration::from_secs(60),
        memory_threshold_mb: 64 * 1024,
    }
}

/// Wire the whole pipeline against filesystem storage and local stage
/// collaborators, with the orchestrator consuming worker events.
fn build_harness(summarizer: Arc<dyn Summarizer>) -> Harness {
    let artifacts = tempfile::tempdir().unwrap();
    let broadcaster = Arc::new(NoopBroadcaster);

    let (registry, _session_events) = SessionRegistry::new(broadcaster.clone());
    let registry = Arc::new(registry);
    let queues = Arc::new(QueueManager::new(broadcaster.clone()));
    let storage: Arc<dyn ObjectStorage> = Arc::new(FsStorage::new(artifacts.path()));
    let notifier = Arc::new(RecordingNotifier::new());

    let (job_tx, job_rx) = mpsc::channel::<JobEvent>(256);
    let (worker_tx, _worker_rx) = mpsc::channel::<WorkerEvent>(8);

    let mut workers = HashMap::new();
    workers.insert(
        QueueName::Audio,
        Worker::new(
            worker_config("audio-worker"),
            queues.queue(QueueName::Audio),
            Arc::new(AudioStage::new(
                Arc::clone(&registry),
                Arc::clone(&storage),
                "audio",
                16000,
                1,
            )),
            job_tx.clone(),
            worker_tx.clone(),
        ),
    );
    workers.insert(
        QueueName::Summary,
        Worker::new(
            worker_config("summary-worker"),
            queues.queue(QueueName::Summary),
            Arc::new(SummaryStage::new(
                Arc::clone(&registry),
                summarizer,
                Arc::clone(&storage),
                "summaries",
            )),
            job_tx.clone(),
            worker_tx.clone(),
        ),
    );
    workers.insert(
        QueueName::Document,
        Worker::new(
            worker_config("document-worker"),
            queues.queue(QueueName::Document),
            Arc::new(DocumentStage::new(
                Arc::clone(&registry),
                Arc::new(MarkdownRenderer),
                Arc::clone(&storage),
                "documents",
            )),
            job_tx.clone(),
            worker_tx.clone(),
        ),
    );
    workers.insert(
        QueueName::Notification,
        Worker::new(
            worker_config("notification-worker"),
            queues.queue(QueueName::Notification),
            Arc::new(NotificationStage::new(
                Arc::clone(&registry),
                Arc::clone(&notifier) as Arc<dyn Notifier>,
            )),
            job_tx.clone(),
            worker_tx.clone(),
        ),
    );

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&queues),
        Arc::clone(&registry),
        broadcaster,
        orchestrator_config(),
    ));
    Arc::clone(&orchestrator).spawn(job_rx);

    Harness {
        registry,
        queues,
        orchestrator,
        notifier,
        workers,
        _artifacts: artifacts,
    }
}

impl Harness {
    async fn start_workers(&self) {
        for worker in self.workers.values() {
            Arc::clone(worker).start().await;
        }
    }

    async fn stop_workers(&self) {
        for worker in self.workers.values() {
            worker.stop().await;
        }
    }

    async fn ended_conversation(&self) -> Conversation {
        let session = self
            .registry
            .start_session("a@x.com", "Patrol", "en", "conn-1")
            .await;
        self.registry
            .append_audio(&session.id, &[0u8, 1, 2, 3, 4, 5, 6, 7])
            .await;
        self.registry
            .append_transcript(&session.id, "stop at the light")
            .await;
        self.registry.end_session(&session.id).await.unwrap()
    }

    async fn wait_for_status(&self, conversation_id: &str, status: ConversationStatus) -> bool {
        for _ in 0..200 {
            let current = self
                .registry
                .get_conversation(conversation_id)
                .await
                .unwrap();
            if current.status == status {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        false
    }
}

#[tokio::test]
async fn full_pipeline_runs_to_completion() {
    let harness = build_harness(Arc::new(TruncatingSummarizer::default()));
    let conversation = harness.ended_conversation().await;

    harness.start_workers().await;
    let first = harness.orchestrator.start_pipeline(&conversation).await;
    assert!(first.is_some(), "pipeline must enqueue the audio task");

    assert!(
        harness
            .wait_for_status(&conversation.id, ConversationStatus::Completed)
            .await,
        "conversation never completed"
    );
    harness.stop_workers().await;

    let done = harness
        .registry
        .get_conversation(&conversation.id)
        .await
        .unwrap();
    assert!(done.audio_url.is_some());
    assert!(done.summary_url.is_some());
    assert!(done.document_url.is_some());
    assert!(done.summary.is_some());
    assert!(done.error.is_none());

    // Every stage ran exactly once.
    let tasks = harness.queues.tasks_for_conversation(&conversation.id).await;
    assert_eq!(tasks.len(), 4);

    let deliveries = harness.notifier.deliveries.lock().await;
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].0, "a@x.com");

    // Artifacts are readable through the storage URL.
    let storage = FsStorage::new(harness._artifacts.path());
    let document = storage
        .download(done.document_url.as_ref().unwrap())
        .await
        .unwrap();
    let text = String::from_utf8(document).unwrap();
    assert!(text.contains("stop at the light"));
    assert!(text.contains("Patrol"));
}

#[tokio::test]
async fn duplicate_completion_enqueues_summary_once() {
    let harness = build_harness(Arc::new(TruncatingSummarizer::default()));
    let conversation = harness.ended_conversation().await;

    let change = ChangeNotification::Task {
        operation: ChangeOp::Update,
        id: "task-from-feed".to_string(),
        queue: "audio".to_string(),
        status: "completed".to_string(),
        conversation_id: conversation.id.clone(),
        error: None,
    };

    // The same completion observed twice, as the change feed may redeliver.
    harness
        .orchestrator
        .handle_change(change.clone())
        .await
        .unwrap();
    harness.orchestrator.handle_change(change).await.unwrap();

    let stats = harness.queues.stats().await;
    let summary = stats
        .iter()
        .find(|s| s.queue == QueueName::Summary)
        .unwrap();
    assert_eq!(summary.waiting + summary.delayed, 1);
}

#[tokio::test]
async fn unknown_queue_in_change_feed_is_rejected() {
    let harness = build_harness(Arc::new(TruncatingSummarizer::default()));

    let result = harness
        .orchestrator
        .handle_change(ChangeNotification::Task {
            operation: ChangeOp::Update,
            id: "t".to_string(),
            queue: "bogus".to_string(),
            status: "completed".to_string(),
            conversation_id: "c".to_string(),
            error: None,
        })
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn terminal_stage_failure_marks_conversation_failed() {
    let harness = build_harness(Arc::new(BrokenSummarizer));
    let conversation = harness.ended_conversation().await;

    harness.start_workers().await;
    harness.orchestrator.start_pipeline(&conversation).await;

    assert!(
        harness
            .wait_for_status(&conversation.id, ConversationStatus::Failed)
            .await,
        "conversation never failed"
    );
    harness.stop_workers().await;

    let failed = harness
        .registry
        .get_conversation(&conversation.id)
        .await
        .unwrap();
    let error = failed.error.expect("error text retained");
    assert!(error.contains("summary stage failed"), "got: {}", error);
    // The audio stage completed before the failure and its result is kept.
    assert!(failed.audio_url.is_some());

    // No further stages were chained.
    let stats = harness.queues.stats().await;
    let document = stats
        .iter()
        .find(|s| s.queue == QueueName::Document)
        .unwrap();
    assert_eq!(
        document.waiting + document.delayed + document.active + document.completed,
        0
    );

    let deliveries = harness.notifier.deliveries.lock().await;
    assert!(deliveries.is_empty());
}

/// Audio processor that fails twice before succeeding.
struct FlakyAudioProcessor {
    calls: std::sync::atomic::AtomicU32,
}

#[async_trait]
impl scribe_relay::worker::TaskProcessor for FlakyAudioProcessor {
    async fn execute(&self, _task: &scribe_relay::queue::Task) -> anyhow::Result<serde_json::Value> {
        let call = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if call < 2 {
            anyhow::bail!("induced failure {}", call + 1);
        }
        Ok(serde_json::Value::Null)
    }
}

#[tokio::test]
async fn flaky_audio_task_still_chains_exactly_one_summary() {
    let broadcaster = Arc::new(NoopBroadcaster);
    let (registry, _session_events) = SessionRegistry::new(broadcaster.clone());
    let registry = Arc::new(registry);
    let queues = Arc::new(QueueManager::new(broadcaster.clone()));

    let session = registry
        .start_session("a@x.com", "Patrol", "en", "conn-1")
        .await;
    registry
        .append_transcript(&session.id, "stop at the light")
        .await;
    let conversation = registry.end_session(&session.id).await.unwrap();

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&queues),
        Arc::clone(&registry),
        broadcaster,
        orchestrator_config(),
    ));

    let (job_tx, job_rx) = mpsc::channel::<JobEvent>(64);
    let (worker_tx, _worker_rx) = mpsc::channel::<WorkerEvent>(8);
    let worker = Worker::new(
        worker_config("audio-worker"),
        queues.queue(QueueName::Audio),
        Arc::new(FlakyAudioProcessor {
            calls: std::sync::atomic::AtomicU32::new(0),
        }),
        job_tx,
        worker_tx,
    );
    Arc::clone(&orchestrator).spawn(job_rx);

    orchestrator.start_pipeline(&conversation).await.unwrap();
    Arc::clone(&worker).start().await;

    // Wait for the audio task to complete on its third attempt.
    let mut completed = None;
    for _ in 0..200 {
        let tasks = queues.tasks_for_conversation(&conversation.id).await;
        if let Some(task) = tasks
            .iter()
            .find(|t| t.queue == QueueName::Audio && t.status == scribe_relay::TaskStatus::Completed)
        {
            completed = Some(task.clone());
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    let completed = completed.expect("audio task never completed");
    assert_eq!(completed.attempts, 3);

    // Give the orchestrator a moment to react, then check the chain.
    tokio::time::sleep(Duration::from_millis(100)).await;
    worker.stop().await;

    let summary_tasks: Vec<_> = queues
        .tasks_for_conversation(&conversation.id)
        .await
        .into_iter()
        .filter(|t| t.queue == QueueName::Summary)
        .collect();
    assert_eq!(summary_tasks.len(), 1, "exactly one summary task chained");
}

#[tokio::test]
async fn starting_the_pipeline_twice_is_guarded() {
    let harness = build_harness(Arc::new(TruncatingSummarizer::default()));
    let conversation = harness.ended_conversation().await;

    assert!(harness
        .orchestrator
        .start_pipeline(&conversation)
        .await
        .is_some());
    assert!(harness
        .orchestrator
        .start_pipeline(&conversation)
        .await
        .is_none());

    let stats = harness.queues.stats().await;
    let audio = stats.iter().find(|s| s.queue == QueueName::Audio).unwrap();
    assert_eq!(audio.waiting, 1);
}
