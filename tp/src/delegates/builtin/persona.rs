//! Persona delegate - builds the target reader persona

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::Interview;
use crate::artifacts::keys;
use crate::delegates::{DelegateError, TaskContext, TaskDelegate, TaskKind, TaskResult};
use crate::llm::LlmClient;

const SYSTEM_PROMPT: &str = "You help an author picture their ideal reader. \
Ask one question at a time about who the reader is, their experience level, their pain points \
and what they want from the book. The finished artifact is a JSON object with keys \
name, demographics, experience_level, pain_points, goals, reading_preferences.";

pub struct PersonaDelegate {
    interview: Interview,
}

impl PersonaDelegate {
    pub fn new(llm: Arc<dyn LlmClient>, timeout: Duration) -> Self {
        Self {
            interview: Interview {
                kind: TaskKind::Persona,
                llm,
                timeout,
                system_prompt: SYSTEM_PROMPT,
                context_keys: &[keys::AUTHOR_PROFILE],
                output_key: keys::AUDIENCE_PERSONA,
            },
        }
    }
}

#[async_trait]
impl TaskDelegate for PersonaDelegate {
    fn kind(&self) -> TaskKind {
        TaskKind::Persona
    }

    async fn run(&self, ctx: &TaskContext) -> Result<TaskResult, DelegateError> {
        self.interview.run(ctx).await
    }
}
