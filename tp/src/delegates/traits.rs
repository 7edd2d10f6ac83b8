//! Delegate trait and its uniform input/output contract

use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::debug;

use super::{DelegateError, TaskKind};
use crate::artifacts::ArtifactView;
use crate::domain::ChapterId;

/// Everything a delegate may look at
///
/// The artifact view is a copy; delegates never write to the store directly.
#[derive(Debug, Clone, Default)]
pub struct TaskContext {
    pub session_id: String,
    /// Set for chapter-scoped work
    pub chapter: Option<ChapterId>,
    pub artifacts: ArtifactView,
    /// The author's latest message
    pub user_input: Option<String>,
    /// Questions this delegate asked on the previous turn
    pub open_questions: Vec<String>,
    /// Review feedback to incorporate
    pub feedback: Option<String>,
    /// Turn number within the current stage (1-based)
    pub turn: u32,
    /// Delegate must finish on this turn
    pub final_turn: bool,
}

impl TaskContext {
    pub fn new(session_id: impl Into<String>, artifacts: ArtifactView) -> Self {
        Self {
            session_id: session_id.into(),
            artifacts,
            turn: 1,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Complete,
    NeedsInput { questions: Vec<String> },
}

/// Artifact writes plus an outcome
///
/// Writes are merged into the work item's namespace whatever the outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskResult {
    pub writes: BTreeMap<String, String>,
    pub outcome: TaskOutcome,
}

impl TaskResult {
    pub fn complete(writes: BTreeMap<String, String>) -> Self {
        debug!(writes = writes.len(), "TaskResult::complete: called");
        Self {
            writes,
            outcome: TaskOutcome::Complete,
        }
    }

    pub fn needs_input(questions: Vec<String>, writes: BTreeMap<String, String>) -> Self {
        debug!(questions = questions.len(), "TaskResult::needs_input: called");
        Self {
            writes,
            outcome: TaskOutcome::NeedsInput { questions },
        }
    }

    pub fn is_complete(&self) -> bool {
        self.outcome == TaskOutcome::Complete
    }
}

/// A unit of delegated work
#[async_trait]
pub trait TaskDelegate: Send + Sync {
    fn kind(&self) -> TaskKind;

    /// Registry name
    fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    async fn run(&self, ctx: &TaskContext) -> Result<TaskResult, DelegateError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_result_constructors() {
        let mut writes = BTreeMap::new();
        writes.insert("author_profile".to_string(), "Jane".to_string());
        let done = TaskResult::complete(writes);
        assert!(done.is_complete());

        let ask = TaskResult::needs_input(vec!["Who are you?".into()], BTreeMap::new());
        assert!(!ask.is_complete());
        assert!(ask.writes.is_empty());
    }

    #[test]
    fn test_context_starts_on_first_turn() {
        let ctx = TaskContext::new("s1", ArtifactView::default());
        assert_eq!(ctx.turn, 1);
        assert!(!ctx.final_turn);
        assert!(ctx.chapter.is_none());
    }
}
