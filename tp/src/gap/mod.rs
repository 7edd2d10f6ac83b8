//! Gap analysis between a chapter plan and submitted content
//!
//! The engine is a set comparison over normalized topic names. Deciding which
//! topics a piece of text actually covers is delegated to a
//! [`TopicClassifier`].

mod analyzer;
mod classifier;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

pub use analyzer::{GapAnalyzer, normalize_topic};
pub use classifier::{Classification, KeywordClassifier, LlmClassifier, TopicClassifier};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GapError {
    /// The classifier could not be reached or gave an unusable answer
    #[error("analysis unavailable: {0}")]
    AnalysisUnavailable(String),

    #[error("invalid chapter plan: {0}")]
    InvalidPlan(String),
}

/// Outcome of comparing a plan against content
///
/// Both sets empty means the content covers the plan with nothing to ask.
/// Novel topics are advisory and never block progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapAnalysisResult {
    /// Plan topics the content does not cover, spelled as in the plan
    pub missing_topics: BTreeSet<String>,
    /// Content topics the plan does not mention
    pub novel_topics: BTreeSet<String>,
}

impl GapAnalysisResult {
    pub fn is_clear(&self) -> bool {
        self.missing_topics.is_empty() && self.novel_topics.is_empty()
    }
}
