use crate::pipeline::Orchestrator;
use crate::queue::QueueManager;
use crate::session::SessionRegistry;
use crate::worker::WorkerPool;
use std::sync::Arc;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub queues: Arc<QueueManager>,
    pub pool: Arc<WorkerPool>,
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(
        registry: Arc<SessionRegistry>,
        queues: Arc<QueueManager>,
        pool: Arc<WorkerPool>,
        orchestrator: Arc<Orchestrator>,
    ) -> Self {
        Self {
            registry,
            queues,
            pool,
            orchestrator,
        }
    }
}
