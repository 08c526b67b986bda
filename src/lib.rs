pub mod config;
pub mod external;
pub mod http;
pub mod pipeline;
pub mod queue;
pub mod relay;
pub mod session;
pub mod signaling;
pub mod worker;

pub use config::Config;
pub use external::{
    Attachment, Broadcaster, ChangeEvent, DocumentRenderer, FsStorage, LogNotifier,
    MarkdownRenderer, NatsBroadcaster, NoopBroadcaster, Notifier, ObjectStorage, SummaryResult,
    SummaryUsage, Summarizer, TruncatingSummarizer,
};
pub use http::{create_router, AppState};
pub use pipeline::{ChangeNotification, Orchestrator, OrchestratorConfig};
pub use queue::{
    EnqueueOptions, QueueError, QueueManager, QueueName, Task, TaskPayload, TaskStatus,
};
pub use relay::{RelayClient, RelayConfig, RelayError, RelayState, TranscriptEvent, WsTransport};
pub use session::{
    Conversation, ConversationStatus, RegistryError, Session, SessionEvent, SessionRegistry,
    SessionStatus,
};
pub use signaling::{ConnectivityState, Signal, SignalingEvent, SignalingRelay};
pub use worker::{
    JobEvent, PoolConfig, PoolEvent, PoolStatus, TaskProcessor, Worker, WorkerConfig, WorkerPool,
};
