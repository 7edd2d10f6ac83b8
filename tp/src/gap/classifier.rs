//! Topic classifiers

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::GapError;
use super::analyzer::normalize_topic;
use crate::llm::{CompletionRequest, LlmClient, complete_text, extract_json};

/// What a classifier found in a piece of text
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Classification {
    /// Plan topics the text covers
    #[serde(default)]
    pub covered: Vec<String>,
    /// Every topic the text discusses, planned or not
    #[serde(default)]
    pub content_topics: Vec<String>,
}

/// Judges which topics a text covers
#[async_trait]
pub trait TopicClassifier: Send + Sync {
    async fn classify(&self, plan_topics: &[String], content: &str) -> Result<Classification, GapError>;
}

/// Offline classifier: a plan topic is covered when its normalized name
/// appears in the normalized text
///
/// It cannot discover topics outside the plan, so `content_topics` is just
/// the covered set.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordClassifier;

#[async_trait]
impl TopicClassifier for KeywordClassifier {
    async fn classify(&self, plan_topics: &[String], content: &str) -> Result<Classification, GapError> {
        debug!(topics = plan_topics.len(), "KeywordClassifier::classify: called");
        let haystack = format!(" {} ", normalize_topic(content));
        let covered: Vec<String> = plan_topics
            .iter()
            .filter(|topic| {
                let needle = normalize_topic(topic);
                !needle.is_empty() && haystack.contains(&format!(" {} ", needle))
            })
            .cloned()
            .collect();
        Ok(Classification {
            content_topics: covered.clone(),
            covered,
        })
    }
}

const CLASSIFY_SYSTEM_PROMPT: &str = "You compare a chapter's planned topics with an author's spoken transcript. \
Reply with a single JSON object: {\"covered\": [planned topics the transcript discusses], \
\"content_topics\": [short names of every topic the transcript discusses]}. No prose.";

/// Classifier backed by the text-generation collaborator
pub struct LlmClassifier {
    llm: Arc<dyn LlmClient>,
    timeout: Duration,
    max_tokens: u32,
}

impl LlmClassifier {
    pub fn new(llm: Arc<dyn LlmClient>, timeout: Duration) -> Self {
        Self {
            llm,
            timeout,
            max_tokens: 1024,
        }
    }
}

#[async_trait]
impl TopicClassifier for LlmClassifier {
    async fn classify(&self, plan_topics: &[String], content: &str) -> Result<Classification, GapError> {
        debug!(topics = plan_topics.len(), content_len = content.len(), "LlmClassifier::classify: called");
        let user = format!(
            "Planned topics:\n{}\n\nTranscript:\n{}",
            plan_topics
                .iter()
                .map(|t| format!("- {}", t))
                .collect::<Vec<_>>()
                .join("\n"),
            content
        );
        let request = CompletionRequest::single(CLASSIFY_SYSTEM_PROMPT, user, self.max_tokens);

        let text = complete_text(self.llm.as_ref(), request, self.timeout)
            .await
            .map_err(|e| {
                warn!(error = %e, "LlmClassifier::classify: collaborator failed");
                GapError::AnalysisUnavailable(e.to_string())
            })?;
        let value = extract_json(&text).map_err(|e| GapError::AnalysisUnavailable(e.to_string()))?;
        serde_json::from_value(value).map_err(|e| GapError::AnalysisUnavailable(format!("unusable classification: {}", e)))
    }
}
