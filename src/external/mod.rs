//! Collaborator boundaries
//!
//! Traits for the external services the pipeline talks to, plus the local
//! implementations shipped with the binary. The real engines (object store,
//! LLM summarizer, mail transport, document engine) live outside this core;
//! only their interfaces matter here.

mod broadcast;
mod document;
mod notify;
mod storage;
mod summarize;

pub use broadcast::{Broadcaster, ChangeEvent, NatsBroadcaster, NoopBroadcaster};
pub use document::{DocumentRenderer, MarkdownRenderer};
pub use notify::{Attachment, LogNotifier, Notifier};
pub use storage::{FsStorage, ObjectStorage};
pub use summarize::{SummaryResult, SummaryUsage, Summarizer, TruncatingSummarizer};
