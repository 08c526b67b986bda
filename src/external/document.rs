use crate::pipeline::{AnnotationKind, SummaryAnnotation};
use crate::session::Conversation;
use anyhow::Result;

/// Document rendering boundary. The heavy engine (PDF, DOCX) is external;
/// this core only needs bytes it can upload.
pub trait DocumentRenderer: Send + Sync {
    fn render(
        &self,
        conversation: &Conversation,
        summary: &str,
        annotations: &[SummaryAnnotation],
    ) -> Result<Vec<u8>>;
}

/// Renders a markdown report: metadata header, summary body shaped by the
/// advisory annotations, transcript appendix.
pub struct MarkdownRenderer;

impl DocumentRenderer for MarkdownRenderer {
    fn render(
        &self,
        conversation: &Conversation,
        summary: &str,
        annotations: &[SummaryAnnotation],
    ) -> Result<Vec<u8>> {
        let mut doc = String::new();

        doc.push_str(&format!("# {} — conversation report\n\n", conversation.app_name));
        doc.push_str(&format!("- Submitted by: {}\n", conversation.identity));
        doc.push_str(&format!(
            "- Started: {}\n",
            conversation.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        doc.push_str(&format!("- Duration: {}s\n", conversation.duration_secs));
        doc.push_str(&format!("- Language: {}\n\n", conversation.language));

        doc.push_str("## Summary\n\n");
        if annotations.is_empty() {
            doc.push_str(summary);
            doc.push('\n');
        } else {
            for annotation in annotations {
                match annotation.kind {
                    AnnotationKind::Heading => {
                        doc.push_str(&format!("### {}\n", annotation.text));
                    }
                    AnnotationKind::ListItem => {
                        doc.push_str(&format!("- {}\n", annotation.text));
                    }
                    AnnotationKind::Paragraph => {
                        doc.push_str(&format!("{}\n\n", annotation.text));
                    }
                }
            }
        }

        doc.push_str("\n## Transcript\n\n");
        if conversation.transcript.is_empty() {
            doc.push_str("_No transcript captured._\n");
        } else {
            doc.push_str(&conversation.transcript);
            doc.push('\n');
        }

        Ok(doc.into_bytes())
    }
}
