//! Session persistence
//!
//! The orchestrator saves after every committed transition: artifact
//! namespaces first, then chapter and workflow state. A crash between the two
//! leaves artifacts ahead of state, never state pointing at missing content.

mod file;
mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

use crate::artifacts::NamespaceSnapshot;
use crate::domain::{ChapterId, ChapterState, WorkflowState};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid session id '{0}': use letters, digits, '-' or '_'")]
    InvalidSessionId(String),
}

/// Everything needed to rebuild a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSession {
    pub workflow: WorkflowState,
    pub chapters: BTreeMap<ChapterId, ChapterState>,
    pub artifacts: BTreeMap<String, NamespaceSnapshot>,
}

/// Persistence collaborator
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn save_workflow(&self, state: &WorkflowState) -> Result<(), StoreError>;

    async fn save_chapter(&self, session_id: &str, chapter: &ChapterState) -> Result<(), StoreError>;

    async fn save_artifacts(
        &self,
        session_id: &str,
        namespace: &str,
        snapshot: &NamespaceSnapshot,
    ) -> Result<(), StoreError>;

    /// `None` when the session was never saved
    async fn load(&self, session_id: &str) -> Result<Option<PersistedSession>, StoreError>;

    async fn list_sessions(&self) -> Result<Vec<String>, StoreError>;
}

/// Session ids become directory names
pub fn validate_session_id(session_id: &str) -> Result<(), StoreError> {
    let ok = !session_id.is_empty()
        && session_id.len() <= 128
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidSessionId(session_id.to_string()))
    }
}
