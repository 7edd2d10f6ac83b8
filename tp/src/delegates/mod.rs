//! Task delegates
//!
//! A delegate does one kind of work (interviewing the author, building the
//! reader persona, planning chapters, drafting a chapter). The orchestrator
//! only sees the uniform [`TaskDelegate`] contract and selects delegates by
//! name through the [`Dispatcher`].

pub mod builtin;
mod dispatcher;
mod traits;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub use dispatcher::Dispatcher;
pub use traits::{TaskContext, TaskDelegate, TaskOutcome, TaskResult};

use crate::artifacts::keys;
use crate::llm::LlmError;

/// The closed set of delegate kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Profiling,
    Persona,
    Planning,
    Drafting,
}

impl TaskKind {
    pub const ALL: [TaskKind; 4] = [
        TaskKind::Profiling,
        TaskKind::Persona,
        TaskKind::Planning,
        TaskKind::Drafting,
    ];

    /// Book-level artifact a finished run of this delegate produces
    pub const fn output_key(self) -> Option<&'static str> {
        match self {
            Self::Profiling => Some(keys::AUTHOR_PROFILE),
            Self::Persona => Some(keys::AUDIENCE_PERSONA),
            Self::Planning => Some(keys::BOOK_PLAN),
            Self::Drafting => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Profiling => "profiling",
            Self::Persona => "persona",
            Self::Planning => "planning",
            Self::Drafting => "drafting",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = DelegateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| DelegateError::Unknown { name: s.to_string() })
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DelegateError {
    #[error("Unknown delegate: {name}")]
    Unknown { name: String },

    #[error("{task} failed after {attempts} attempt(s): {reason}")]
    Failed {
        task: String,
        attempts: u32,
        reason: String,
        retryable: bool,
    },
}

impl DelegateError {
    pub fn failed(task: impl fmt::Display, reason: impl Into<String>, retryable: bool) -> Self {
        Self::Failed {
            task: task.to_string(),
            attempts: 1,
            reason: reason.into(),
            retryable,
        }
    }

    /// Wrap a collaborator failure
    ///
    /// Malformed replies count as retryable; the next completion may be fine.
    pub fn from_llm(task: impl fmt::Display, err: LlmError) -> Self {
        let retryable = err.is_retryable();
        Self::failed(task, err.to_string(), retryable)
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unknown { .. } => false,
            Self::Failed { retryable, .. } => *retryable,
        }
    }
}
