//! LLM-backed delegates
//!
//! Profiling, persona and planning are interviews: each turn the model either
//! asks more questions or returns the finished artifact as JSON. Drafting is
//! a single completion that returns markdown.

mod drafting;
mod persona;
mod planning;
mod profiling;

pub use drafting::DraftingDelegate;
pub use persona::PersonaDelegate;
pub use planning::PlanningDelegate;
pub use profiling::ProfilingDelegate;

use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{DelegateError, TaskContext, TaskKind, TaskResult};
use crate::llm::{CompletionRequest, LlmClient, complete_text, extract_json};

const DEFAULT_MAX_TOKENS: u32 = 4096;

const REPLY_PROTOCOL: &str = "Reply with a single JSON object and nothing else. \
To keep interviewing: {\"status\": \"needs_input\", \"questions\": [\"...\"]}. \
When you have enough: {\"status\": \"complete\", \"artifact\": <the finished result>}.";

const FINAL_TURN: &str = "This is the last turn. You must reply with status \"complete\" using what you know.";

/// Interview reply from the model
#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum InterviewReply {
    NeedsInput { questions: Vec<String> },
    Complete { artifact: serde_json::Value },
}

/// Shared machinery for the interview delegates
pub(crate) struct Interview {
    kind: TaskKind,
    llm: Arc<dyn LlmClient>,
    timeout: Duration,
    system_prompt: &'static str,
    /// Artifacts shown to the model as background
    context_keys: &'static [&'static str],
    output_key: &'static str,
}

impl Interview {
    fn notes_key(&self) -> String {
        format!("{}_notes", self.kind)
    }

    fn build_request(&self, ctx: &TaskContext) -> CompletionRequest {
        let mut system = format!("{}\n\n{}", self.system_prompt, REPLY_PROTOCOL);
        if ctx.final_turn {
            system.push_str("\n\n");
            system.push_str(FINAL_TURN);
        }

        let mut user = String::new();
        for key in self.context_keys {
            if let Some(content) = ctx.artifacts.get(key) {
                user.push_str(&format!("## {}\n{}\n\n", key, content));
            }
        }
        if let Some(notes) = ctx.artifacts.get(&self.notes_key()) {
            user.push_str(&format!("## Conversation so far\n{}\n\n", notes));
        }
        if let Some(previous) = ctx.artifacts.get(self.output_key) {
            user.push_str(&format!("## Current {}\n{}\n\n", self.output_key, previous));
        }
        if let Some(feedback) = &ctx.feedback {
            user.push_str(&format!("## Reviewer feedback\n{}\n\n", feedback));
        }
        match &ctx.user_input {
            Some(input) => user.push_str(&format!("## Author says\n{}\n", input)),
            None => user.push_str("## Author says\n(nothing yet; open the conversation)\n"),
        }

        CompletionRequest::single(system, user, DEFAULT_MAX_TOKENS)
    }

    /// Append the last exchange to the running notes
    fn notes_with_exchange(&self, ctx: &TaskContext) -> Option<String> {
        let input = ctx.user_input.as_ref()?;
        let mut notes = ctx.artifacts.get(&self.notes_key()).unwrap_or_default().to_string();
        for question in &ctx.open_questions {
            notes.push_str(&format!("Q: {}\n", question));
        }
        notes.push_str(&format!("A: {}\n", input));
        Some(notes)
    }

    pub(crate) async fn run(&self, ctx: &TaskContext) -> Result<TaskResult, DelegateError> {
        debug!(kind = %self.kind, turn = ctx.turn, final_turn = ctx.final_turn, "Interview::run: called");
        let request = self.build_request(ctx);
        let text = complete_text(self.llm.as_ref(), request, self.timeout)
            .await
            .map_err(|e| DelegateError::from_llm(self.kind, e))?;
        let value = extract_json(&text).map_err(|e| DelegateError::from_llm(self.kind, e))?;
        let reply: InterviewReply = serde_json::from_value(value)
            .map_err(|e| DelegateError::failed(self.kind, format!("unexpected reply shape: {}", e), true))?;

        let mut writes = BTreeMap::new();
        if let Some(notes) = self.notes_with_exchange(ctx) {
            writes.insert(self.notes_key(), notes);
        }

        match reply {
            InterviewReply::NeedsInput { questions } if !questions.is_empty() && !ctx.final_turn => {
                Ok(TaskResult::needs_input(questions, writes))
            }
            InterviewReply::NeedsInput { .. } => Err(DelegateError::failed(
                self.kind,
                "delegate asked for input when it had to finish",
                true,
            )),
            InterviewReply::Complete { artifact } => {
                writes.insert(self.output_key.to_string(), artifact_text(artifact));
                Ok(TaskResult::complete(writes))
            }
        }
    }
}

/// Strings are stored as is; structured values as pretty JSON
fn artifact_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        other => serde_json::to_string_pretty(&other).unwrap_or_else(|_| other.to_string()),
    }
}
