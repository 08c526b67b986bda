use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

/// Token and cost metadata reported by the summarization call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SummaryUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

#[derive(Debug, Clone)]
pub struct SummaryResult {
    pub summary: String,
    pub usage: SummaryUsage,
}

/// The external large-language-model summarizer: text in, text out, cost
/// metadata out. One blocking call per summary task.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(
        &self,
        transcript: &str,
        language: &str,
        hint: Option<&str>,
    ) -> Result<SummaryResult>;
}

/// Extractive fallback used when no model endpoint is configured: keeps the
/// leading sentences of the transcript.
pub struct TruncatingSummarizer {
    max_sentences: usize,
}

impl TruncatingSummarizer {
    pub fn new(max_sentences: usize) -> Self {
        Self {
            max_sentences: max_sentences.max(1),
        }
    }
}

impl Default for TruncatingSummarizer {
    fn default() -> Self {
        Self::new(5)
    }
}

#[async_trait]
impl Summarizer for TruncatingSummarizer {
    async fn summarize(
        &self,
        transcript: &str,
        _language: &str,
        _hint: Option<&str>,
    ) -> Result<SummaryResult> {
        let mut summary = String::new();
        let mut sentences = 0;

        for chunk in transcript.split_inclusive(['.', '!', '?']) {
            summary.push_str(chunk);
            sentences += 1;
            if sentences >= self.max_sentences {
                break;
            }
        }
        if summary.is_empty() {
            summary = transcript.to_string();
        }
        let summary = summary.trim().to_string();

        Ok(SummaryResult {
            usage: SummaryUsage {
                input_tokens: transcript.split_whitespace().count() as u64,
                output_tokens: summary.split_whitespace().count() as u64,
                cost_usd: 0.0,
            },
            summary,
        })
    }
}
