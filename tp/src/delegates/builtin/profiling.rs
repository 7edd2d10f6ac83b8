//! Profiling delegate - interviews the author about expertise and voice

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::Interview;
use crate::artifacts::keys;
use crate::delegates::{DelegateError, TaskContext, TaskDelegate, TaskKind, TaskResult};
use crate::llm::LlmClient;

const SYSTEM_PROMPT: &str = "You are a biographer helping an author define their voice. \
Ask one question at a time about their expertise, professional background, preferred tone, \
writing style and books they admire. The finished artifact is a JSON object with keys \
expertise, professional_background, tone, style, examples, additional_notes.";

pub struct ProfilingDelegate {
    interview: Interview,
}

impl ProfilingDelegate {
    pub fn new(llm: Arc<dyn LlmClient>, timeout: Duration) -> Self {
        Self {
            interview: Interview {
                kind: TaskKind::Profiling,
                llm,
                timeout,
                system_prompt: SYSTEM_PROMPT,
                context_keys: &[],
                output_key: keys::AUTHOR_PROFILE,
            },
        }
    }
}

#[async_trait]
impl TaskDelegate for ProfilingDelegate {
    fn kind(&self) -> TaskKind {
        TaskKind::Profiling
    }

    async fn run(&self, ctx: &TaskContext) -> Result<TaskResult, DelegateError> {
        self.interview.run(ctx).await
    }
}
