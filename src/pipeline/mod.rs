//! Post-processing pipeline
//!
//! The orchestrator's reaction rules over the fixed stage DAG, the four
//! stage processors plugged into the worker runtime, and the advisory
//! summary structure annotator.

mod annotate;
mod orchestrator;
mod stages;

pub use annotate::{annotate_summary, AnnotationKind, SummaryAnnotation};
pub use orchestrator::{
    ChangeNotification, ChangeOp, Orchestrator, OrchestratorConfig,
};
pub use stages::{encode_wav, AudioStage, DocumentStage, NotificationStage, SummaryStage};
