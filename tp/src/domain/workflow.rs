//! Session-level workflow state
//!
//! `WorkflowState` is the single source of truth for where a session is.
//! Status is derived from it (plus chapter states), never from which
//! artifacts happen to exist.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::id::now_ms;
use super::{ChapterId, ContinuationToken, Stage, TokenStatus};
use crate::error::WorkflowError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub session_id: String,
    pub stage: Stage,
    /// Ordered, duplicate-free
    pub completed_stages: Vec<Stage>,
    pub active_chapter: Option<ChapterId>,
    /// Stage review awaiting a decision
    #[serde(default)]
    pub pending: Option<ContinuationToken>,
    /// Questions the current delegate asked, answered through `advance`
    #[serde(default)]
    pub open_questions: Vec<String>,
    /// Conversation turns spent in the current stage
    #[serde(default)]
    pub turns: u32,
    /// Consumed tokens
    #[serde(default)]
    pub resolved: Vec<ContinuationToken>,
    #[serde(default)]
    pub last_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl WorkflowState {
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            session_id: session_id.into(),
            stage: Stage::Welcome,
            completed_stages: Vec::new(),
            active_chapter: None,
            pending: None,
            open_questions: Vec::new(),
            turns: 0,
            resolved: Vec::new(),
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_completed(&self, stage: Stage) -> bool {
        self.completed_stages.contains(&stage)
    }

    /// Prerequisites of `target` that are neither completed nor current
    pub fn missing_for(&self, target: Stage) -> Vec<Stage> {
        target
            .prerequisites()
            .iter()
            .copied()
            .filter(|s| *s != self.stage && !self.is_completed(*s))
            .collect()
    }

    /// Complete the current stage and enter `target`
    ///
    /// Returns `Ok(false)` when `target` is the current stage or already
    /// completed; nothing changes in that case.
    pub fn transition(&mut self, target: Stage) -> Result<bool, WorkflowError> {
        debug!(session_id = %self.session_id, from = %self.stage, %target, "WorkflowState::transition: called");
        if target == self.stage || self.is_completed(target) {
            debug!("WorkflowState::transition: no-op");
            return Ok(false);
        }

        let missing = self.missing_for(target);
        if !missing.is_empty() || !target.prerequisites().contains(&self.stage) {
            return Err(WorkflowError::PrerequisiteNotMet { target, missing });
        }

        if !self.is_completed(self.stage) {
            self.completed_stages.push(self.stage);
        }
        info!(session_id = %self.session_id, from = %self.stage, to = %target, "stage transition");
        self.stage = target;
        self.turns = 0;
        self.open_questions.clear();
        self.last_error = None;
        self.touch();
        Ok(true)
    }

    /// Move back to an earlier (or the current) stage
    ///
    /// `completed_stages` is truncated to the prerequisites of `target`. A
    /// pending stage review is superseded and moved to the history.
    pub fn rollback(&mut self, target: Stage) -> Result<(), WorkflowError> {
        debug!(session_id = %self.session_id, from = %self.stage, %target, "WorkflowState::rollback: called");
        if target != self.stage && !self.is_completed(target) {
            let missing = self.missing_for(target);
            return Err(WorkflowError::PrerequisiteNotMet { target, missing });
        }

        self.completed_stages.retain(|s| *s < target);
        if let Some(mut token) = self.pending.take() {
            token.resolve(TokenStatus::Superseded);
            self.resolved.push(token);
        }
        if target < Stage::ChapterLoop {
            self.active_chapter = None;
        }
        info!(session_id = %self.session_id, from = %self.stage, to = %target, "stage rollback");
        self.stage = target;
        self.turns = 0;
        self.open_questions.clear();
        self.touch();
        Ok(())
    }

    /// Take the pending token if `token_id` names it
    pub fn take_pending(&mut self, token_id: &str) -> Option<ContinuationToken> {
        match &self.pending {
            Some(token) if token.id == token_id => self.pending.take(),
            _ => None,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = now_ms();
    }
}
