//! Clarification requests raised for uncovered plan topics

use serde::{Deserialize, Serialize};

use super::ChapterId;

/// Terminal (or pending) outcome of a clarification request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Disposition {
    #[default]
    Pending,
    Answered(String),
    Skipped,
    /// Resolved by an edit to the named artifact
    Edited(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClarificationRequest {
    pub id: String,
    pub topic: String,
    pub question: String,
    #[serde(default)]
    pub disposition: Disposition,
}

impl ClarificationRequest {
    /// Request for a plan topic the transcript does not cover
    pub fn for_topic(chapter: ChapterId, seq: usize, topic: &str) -> Self {
        Self {
            id: format!("ch{}-q{}", chapter, seq),
            topic: topic.to_string(),
            question: format!("The transcript doesn't cover \"{}\". What would you like to say about it?", topic),
            disposition: Disposition::Pending,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.disposition == Disposition::Pending
    }
}
