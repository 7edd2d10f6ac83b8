//! Book plan produced by the planning delegate

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::ChapterId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterPlan {
    pub chapter_number: ChapterId,
    pub title: String,
    #[serde(default)]
    pub key_topics: Vec<String>,
    #[serde(default)]
    pub learning_outcomes: Vec<String>,
}

impl ChapterPlan {
    pub fn parse(text: &str) -> Result<Self, String> {
        serde_json::from_str(text).map_err(|e| format!("chapter plan is not valid JSON: {}", e))
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookPlan {
    pub chapters: Vec<ChapterPlan>,
}

impl BookPlan {
    /// Parse and validate a plan
    ///
    /// Chapter numbers must be positive and unique, and there must be at
    /// least one chapter.
    pub fn parse(text: &str) -> Result<Self, String> {
        let plan: Self = serde_json::from_str(text).map_err(|e| format!("book plan is not valid JSON: {}", e))?;
        if plan.chapters.is_empty() {
            return Err("book plan has no chapters".to_string());
        }
        let mut seen = BTreeSet::new();
        for chapter in &plan.chapters {
            if chapter.chapter_number == 0 {
                return Err("chapter numbers start at 1".to_string());
            }
            if !seen.insert(chapter.chapter_number) {
                return Err(format!("chapter {} appears twice", chapter.chapter_number));
            }
        }
        Ok(plan)
    }
}
