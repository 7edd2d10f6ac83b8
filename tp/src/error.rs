//! Workflow error taxonomy
//!
//! Every failure the core reports is a [`WorkflowError`]. Callers branch on
//! [`WorkflowError::class`] and show [`WorkflowError::remediation`] to the
//! author.

use thiserror::Error;

use crate::artifacts::ArtifactError;
use crate::delegates::DelegateError;
use crate::domain::{ChapterId, Stage, SubStage};
use crate::gap::GapError;
use crate::state::StoreError;

/// Broad category of a workflow error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Something has to happen first
    Prerequisite,
    /// A collaborator failed or was unreachable
    Unavailable,
    /// Caller presented a bad continuation or decision
    Continuation,
    /// The requested state change is not legal
    Transition,
    /// Unknown session, chapter or delegate
    NotFound,
    /// Persistence failure
    Internal,
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("cannot enter {target}: {} not completed", format_stages(missing))]
    PrerequisiteNotMet { target: Stage, missing: Vec<Stage> },

    #[error("Unknown delegate: {name}")]
    UnknownDelegate { name: String },

    #[error("Delegate {task} failed after {attempts} attempt(s): {reason}")]
    DelegateFailed {
        task: String,
        attempts: u32,
        reason: String,
        retryable: bool,
    },

    #[error("Gap analysis unavailable for chapter {chapter}: {reason}")]
    AnalysisUnavailable { chapter: ChapterId, reason: String },

    #[error("Invalid continuation {token}: {reason}")]
    InvalidContinuation { token: String, reason: String },

    #[error("Artifact not found: {namespace}/{key}")]
    ArtifactNotFound { namespace: String, key: String },

    #[error("Chapter {chapter} cannot move from {from} to {to}")]
    InvalidTransition {
        chapter: ChapterId,
        from: SubStage,
        to: SubStage,
    },

    #[error("Chapter {chapter} has {pending} unresolved clarification request(s)")]
    OutstandingClarifications { chapter: ChapterId, pending: usize },

    #[error("Chapter {chapter} was abandoned and must be redone first")]
    RedoRequired { chapter: ChapterId },

    #[error("Waiting for a decision on {token}")]
    AwaitingDecision { token: String },

    #[error("Invalid decision for {token}: {reason}")]
    InvalidDecision { token: String, reason: String },

    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("Chapter not found: {chapter}")]
    ChapterNotFound { chapter: ChapterId },

    #[error("Persistence failed: {0}")]
    Persistence(#[from] StoreError),
}

fn format_stages(stages: &[Stage]) -> String {
    stages.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
}

impl WorkflowError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::PrerequisiteNotMet { .. }
            | Self::ArtifactNotFound { .. }
            | Self::OutstandingClarifications { .. }
            | Self::RedoRequired { .. }
            | Self::AwaitingDecision { .. } => ErrorClass::Prerequisite,
            Self::DelegateFailed { .. } | Self::AnalysisUnavailable { .. } => ErrorClass::Unavailable,
            Self::InvalidContinuation { .. } | Self::InvalidDecision { .. } => ErrorClass::Continuation,
            Self::InvalidTransition { .. } => ErrorClass::Transition,
            Self::UnknownDelegate { .. } | Self::SessionNotFound { .. } | Self::ChapterNotFound { .. } => {
                ErrorClass::NotFound
            }
            Self::Persistence(_) => ErrorClass::Internal,
        }
    }

    /// Whether repeating the same call may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::DelegateFailed { retryable, .. } => *retryable,
            Self::AnalysisUnavailable { .. } | Self::Persistence(_) => true,
            _ => false,
        }
    }

    /// Actionable sentence for the author
    pub fn remediation(&self) -> String {
        match self {
            Self::PrerequisiteNotMet { missing, .. } => match missing.first() {
                Some(stage) => format!("finish the {} stage first", stage),
                None => "finish the current stage first".to_string(),
            },
            Self::UnknownDelegate { name } => format!("register a delegate named '{}'", name),
            Self::DelegateFailed { task, .. } => format!("retry the {} step", task),
            Self::AnalysisUnavailable { chapter, .. } => format!("resubmit transcript for chapter {}", chapter),
            Self::InvalidContinuation { .. } => "check status for the current pending decision".to_string(),
            Self::ArtifactNotFound { key, .. } => format!("produce {} before continuing", key),
            Self::InvalidTransition { chapter, to, .. } => {
                format!("check status for chapter {} before moving it to {}", chapter, to)
            }
            Self::OutstandingClarifications { chapter, .. } => {
                format!("answer or skip the open questions for chapter {}", chapter)
            }
            Self::RedoRequired { chapter } => format!("redo chapter {}", chapter),
            Self::AwaitingDecision { token } => format!("resume {} with accept, respond, edit or abandon", token),
            Self::InvalidDecision { token, .. } => format!("resume {} with a different decision", token),
            Self::SessionNotFound { .. } => "start the session first".to_string(),
            Self::ChapterNotFound { .. } => "check status for the chapters in the current plan".to_string(),
            Self::Persistence(_) => "check the state directory and retry".to_string(),
        }
    }
}

impl From<ArtifactError> for WorkflowError {
    fn from(err: ArtifactError) -> Self {
        match err {
            ArtifactError::NotFound { namespace, key } => Self::ArtifactNotFound { namespace, key },
        }
    }
}

impl From<DelegateError> for WorkflowError {
    fn from(err: DelegateError) -> Self {
        match err {
            DelegateError::Unknown { name } => Self::UnknownDelegate { name },
            DelegateError::Failed {
                task,
                attempts,
                reason,
                retryable,
            } => Self::DelegateFailed {
                task,
                attempts,
                reason,
                retryable,
            },
        }
    }
}

impl WorkflowError {
    pub(crate) fn from_gap(chapter: ChapterId, err: GapError) -> Self {
        match err {
            GapError::AnalysisUnavailable(reason) => Self::AnalysisUnavailable { chapter, reason },
            GapError::InvalidPlan(reason) => Self::DelegateFailed {
                task: format!("chapter {} plan", chapter),
                attempts: 0,
                reason,
                retryable: false,
            },
        }
    }
}
