use anyhow::Result;
use clap::Parser;
use scribe_relay::pipeline::{AudioStage, DocumentStage, NotificationStage, SummaryStage};
use scribe_relay::worker::WorkerEvent;
use scribe_relay::{
    create_router, AppState, Broadcaster, Config, DocumentRenderer, FsStorage, JobEvent,
    LogNotifier, MarkdownRenderer, NatsBroadcaster, NoopBroadcaster, Notifier, ObjectStorage,
    Orchestrator, OrchestratorConfig, PoolConfig, PoolEvent, QueueManager, QueueName,
    SessionEvent, SessionRegistry, Summarizer, TruncatingSummarizer, Worker, WorkerConfig,
    WorkerPool,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "scribe-relay",
    about = "Realtime transcription relay and post-processing pipeline"
)]
struct Args {
    /// Path to the configuration file (without extension)
    #[arg(short, long, default_value = "config/scribe-relay")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let cfg = match Config::load(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(
                "Config {} not loaded ({}), falling back to defaults",
                args.config, e
            );
            Config::default()
        }
    };

    info!("{} starting", cfg.service.name);

    let broadcaster: Arc<dyn Broadcaster> = if cfg.nats.enabled {
        match NatsBroadcaster::connect(&cfg.nats.url).await {
            Ok(b) => Arc::new(b),
            Err(e) => {
                warn!("NATS unavailable ({}), change events disabled", e);
                Arc::new(NoopBroadcaster)
            }
        }
    } else {
        Arc::new(NoopBroadcaster)
    };

    // Session registry with its retention sweep and event logger.
    let (registry, mut session_events) = SessionRegistry::new(Arc::clone(&broadcaster));
    let registry = Arc::new(registry);
    let _sweeper = Arc::clone(&registry)
        .spawn_sweeper(Duration::from_secs(cfg.session.sweep_interval_secs));
    tokio::spawn(async move {
        while let Some(event) = session_events.recv().await {
            match event {
                SessionEvent::SessionEnded { session_id } => {
                    debug!("Session {} ended", session_id);
                }
                SessionEvent::ConversationCreated { conversation } => {
                    info!(
                        "Conversation {} created for {}",
                        conversation.id, conversation.identity
                    );
                }
            }
        }
    });

    // Queues and the terminal-task reaper.
    let queues = Arc::new(QueueManager::new(Arc::clone(&broadcaster)));
    let _reaper = Arc::clone(&queues).spawn_finished_reaper(
        Duration::from_secs(cfg.queue.reaper_interval_secs),
        Duration::from_secs(cfg.queue.finished_retention_secs),
    );

    // Stage collaborators. Storage is filesystem-backed; summarization and
    // notification run their local fallbacks until real endpoints are wired.
    let storage: Arc<dyn ObjectStorage> = Arc::new(FsStorage::new(&cfg.storage.artifacts_path));
    let summarizer: Arc<dyn Summarizer> = Arc::new(TruncatingSummarizer::default());
    let renderer: Arc<dyn DocumentRenderer> = Arc::new(MarkdownRenderer);
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);

    // One typed worker per queue, all publishing into the same channels.
    let (job_tx, job_rx) = mpsc::channel::<JobEvent>(256);
    let (worker_tx, worker_rx) = mpsc::channel::<WorkerEvent>(64);

    let worker_config = |name: &str| WorkerConfig {
        name: name.to_string(),
        concurrency: cfg.worker.concurrency,
        task_timeout: Duration::from_secs(cfg.worker.task_timeout_secs),
        poll_interval: Duration::from_millis(cfg.worker.poll_interval_ms),
        health_check_interval: Duration::from_secs(cfg.worker.health_check_interval_secs),
        stall_timeout: Duration::from_secs(cfg.queue.stall_timeout_secs),
        memory_threshold_mb: cfg.worker.memory_threshold_mb,
    };

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
                cfg.engine.sample_rate,
                cfg.engine.channels,
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
                Arc::clone(&summarizer),
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
                Arc::clone(&renderer),
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
                Arc::clone(&notifier),
            )),
            job_tx.clone(),
            worker_tx.clone(),
        ),
    );

    let (pool, mut pool_events) = WorkerPool::new(
        workers,
        PoolConfig {
            auto_restart: cfg.pool.auto_restart,
            max_restart_attempts: cfg.pool.max_restart_attempts,
            restart_delay: Duration::from_millis(cfg.pool.restart_delay_ms),
            restart_reset_window: Duration::from_secs(cfg.pool.restart_reset_window_secs),
        },
    );
    let supervisor = Arc::clone(&pool).spawn_supervisor(worker_rx);
    pool.store_supervisor(supervisor).await;
    pool.start_all().await;
    tokio::spawn(async move {
        while let Some(event) = pool_events.recv().await {
            match event {
                PoolEvent::WorkerRestarted { worker, attempt } => {
                    info!("Worker {} restarted (attempt {})", worker, attempt);
                }
                PoolEvent::WorkerMaxRestartAttemptsReached { worker } => {
                    error!("Worker {} gave up restarting and stays stopped", worker);
                }
            }
        }
    });

    // Orchestrator consuming worker job events.
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&queues),
        Arc::clone(&registry),
        Arc::clone(&broadcaster),
        OrchestratorConfig {
            summary_settle_delay: Duration::from_millis(cfg.queue.summary_settle_delay_ms),
            max_attempts: cfg.queue.max_attempts,
            backoff_base_ms: cfg.queue.backoff_base_ms,
        },
    ));
    let _orchestrator_loop = Arc::clone(&orchestrator).spawn(job_rx);

    // HTTP API.
    let state = AppState::new(registry, queues, Arc::clone(&pool), orchestrator);
    let router = create_router(state);
    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("HTTP API listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pool.stop_all().await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown requested");
}
