//! Drafting delegate - writes a chapter from its plan, transcript and clarifications

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::artifacts::keys;
use crate::delegates::{DelegateError, TaskContext, TaskDelegate, TaskKind, TaskResult};
use crate::llm::{CompletionRequest, LlmClient, complete_text};

const SYSTEM_PROMPT: &str = "You are a ghostwriter. Turn the author's spoken transcript into a polished \
chapter in the author's voice, written for the described reader. Cover every planned topic and use \
the clarifications to fill gaps. Reply with the chapter in markdown only.";

const MAX_TOKENS: u32 = 8192;

pub struct DraftingDelegate {
    llm: Arc<dyn LlmClient>,
    timeout: Duration,
}

impl DraftingDelegate {
    pub fn new(llm: Arc<dyn LlmClient>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    fn build_request(&self, chapter: u32, ctx: &TaskContext) -> Result<CompletionRequest, DelegateError> {
        let transcript_key = keys::chapter_transcript(chapter);
        if !ctx.artifacts.contains(&transcript_key) {
            return Err(DelegateError::failed(
                self.kind(),
                format!("{} is not available", transcript_key),
                false,
            ));
        }

        let sections = [
            keys::AUTHOR_PROFILE.to_string(),
            keys::AUDIENCE_PERSONA.to_string(),
            keys::chapter_plan(chapter),
            transcript_key,
            keys::chapter_clarifications(chapter),
        ];
        let mut user = String::new();
        for key in &sections {
            if let Some(content) = ctx.artifacts.get(key) {
                user.push_str(&format!("## {}\n{}\n\n", key, content));
            }
        }
        if let Some(feedback) = &ctx.feedback {
            if let Some(previous) = ctx.artifacts.get(&keys::chapter_draft(chapter)) {
                user.push_str(&format!("## Previous draft\n{}\n\n", previous));
            }
            user.push_str(&format!("## Revise the draft using this feedback\n{}\n", feedback));
        }
        Ok(CompletionRequest::single(SYSTEM_PROMPT, user, MAX_TOKENS))
    }
}

#[async_trait]
impl TaskDelegate for DraftingDelegate {
    fn kind(&self) -> TaskKind {
        TaskKind::Drafting
    }

    async fn run(&self, ctx: &TaskContext) -> Result<TaskResult, DelegateError> {
        let chapter = ctx
            .chapter
            .ok_or_else(|| DelegateError::failed(self.kind(), "drafting needs a chapter", false))?;
        debug!(chapter, revision_feedback = ctx.feedback.is_some(), "DraftingDelegate::run: called");

        let request = self.build_request(chapter, ctx)?;
        let draft = complete_text(self.llm.as_ref(), request, self.timeout)
            .await
            .map_err(|e| DelegateError::from_llm(self.kind(), e))?;

        let mut writes = BTreeMap::new();
        writes.insert(keys::chapter_draft(chapter), draft.trim().to_string());
        Ok(TaskResult::complete(writes))
    }
}
