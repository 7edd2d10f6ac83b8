//! Planning delegate - agrees on a title and chapter outline

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::Interview;
use crate::artifacts::keys;
use crate::delegates::{DelegateError, TaskContext, TaskDelegate, TaskKind, TaskResult};
use crate::domain::BookPlan;
use crate::llm::LlmClient;

const SYSTEM_PROMPT: &str = "You are a book planner. Using the author profile and reader persona, \
agree on a working title and a chapter outline with the author. The finished artifact is a JSON \
object {\"chapters\": [{\"chapter_number\": 1, \"title\": \"...\", \"key_topics\": [\"...\"], \
\"learning_outcomes\": [\"...\"]}]} with chapters numbered from 1.";

pub struct PlanningDelegate {
    interview: Interview,
}

impl PlanningDelegate {
    pub fn new(llm: Arc<dyn LlmClient>, timeout: Duration) -> Self {
        Self {
            interview: Interview {
                kind: TaskKind::Planning,
                llm,
                timeout,
                system_prompt: SYSTEM_PROMPT,
                context_keys: &[keys::AUTHOR_PROFILE, keys::AUDIENCE_PERSONA],
                output_key: keys::BOOK_PLAN,
            },
        }
    }
}

#[async_trait]
impl TaskDelegate for PlanningDelegate {
    fn kind(&self) -> TaskKind {
        TaskKind::Planning
    }

    /// A completed plan must parse; otherwise the turn fails and is retried
    async fn run(&self, ctx: &TaskContext) -> Result<TaskResult, DelegateError> {
        let result = self.interview.run(ctx).await?;
        if let Some(plan) = result.writes.get(keys::BOOK_PLAN) {
            if let Err(reason) = BookPlan::parse(plan) {
                warn!(%reason, "PlanningDelegate::run: unusable plan");
                return Err(DelegateError::failed(self.kind(), reason, true));
            }
        }
        Ok(result)
    }
}
