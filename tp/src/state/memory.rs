//! In-memory store, for tests and embedding

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;
use tracing::debug;

use super::{PersistedSession, StateStore, StoreError, validate_session_id};
use crate::artifacts::NamespaceSnapshot;
use crate::domain::{ChapterId, ChapterState, WorkflowState};

#[derive(Debug, Default)]
struct Entry {
    workflow: Option<WorkflowState>,
    chapters: BTreeMap<ChapterId, ChapterState>,
    artifacts: BTreeMap<String, NamespaceSnapshot>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn save_workflow(&self, state: &WorkflowState) -> Result<(), StoreError> {
        debug!(session_id = %state.session_id, "MemoryStore::save_workflow: called");
        validate_session_id(&state.session_id)?;
        let mut sessions = self.sessions.lock().await;
        sessions.entry(state.session_id.clone()).or_default().workflow = Some(state.clone());
        Ok(())
    }

    async fn save_chapter(&self, session_id: &str, chapter: &ChapterState) -> Result<(), StoreError> {
        validate_session_id(session_id)?;
        let mut sessions = self.sessions.lock().await;
        sessions
            .entry(session_id.to_string())
            .or_default()
            .chapters
            .insert(chapter.chapter, chapter.clone());
        Ok(())
    }

    async fn save_artifacts(
        &self,
        session_id: &str,
        namespace: &str,
        snapshot: &NamespaceSnapshot,
    ) -> Result<(), StoreError> {
        validate_session_id(session_id)?;
        let mut sessions = self.sessions.lock().await;
        sessions
            .entry(session_id.to_string())
            .or_default()
            .artifacts
            .insert(namespace.to_string(), snapshot.clone());
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<PersistedSession>, StoreError> {
        let sessions = self.sessions.lock().await;
        Ok(sessions.get(session_id).and_then(|entry| {
            entry.workflow.clone().map(|workflow| PersistedSession {
                workflow,
                chapters: entry.chapters.clone(),
                artifacts: entry.artifacts.clone(),
            })
        }))
    }

    async fn list_sessions(&self) -> Result<Vec<String>, StoreError> {
        let sessions = self.sessions.lock().await;
        let mut ids: Vec<String> = sessions
            .iter()
            .filter(|(_, e)| e.workflow.is_some())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}
