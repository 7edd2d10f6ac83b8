//! Live session state

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::artifacts::ArtifactStore;
use crate::domain::{ChapterId, ChapterState, WorkflowState};
use crate::error::WorkflowError;
use crate::hitl::{self, TokenLookup};
use crate::state::PersistedSession;

/// One session: a workflow lock, one lock per chapter, and its own artifacts
///
/// Lock order is workflow, then the chapter map, then a chapter. Chapter
/// operations release the workflow lock before taking their chapter lock.
///
/// A chapter lock may be held across a collaborator call. Readers that must
/// not wait on that (status, token routing) use `published`, the last
/// committed copy of each chapter, whose lock is only held for a copy.
pub(crate) struct SessionHandle {
    pub id: String,
    pub workflow: Mutex<WorkflowState>,
    chapters: RwLock<BTreeMap<ChapterId, Arc<Mutex<ChapterState>>>>,
    published: RwLock<BTreeMap<ChapterId, ChapterState>>,
    pub artifacts: ArtifactStore,
}

impl SessionHandle {
    pub fn new(workflow: WorkflowState) -> Self {
        Self {
            id: workflow.session_id.clone(),
            workflow: Mutex::new(workflow),
            chapters: RwLock::new(BTreeMap::new()),
            published: RwLock::new(BTreeMap::new()),
            artifacts: ArtifactStore::new(),
        }
    }

    pub async fn from_persisted(persisted: PersistedSession) -> Self {
        debug!(session_id = %persisted.workflow.session_id, chapters = persisted.chapters.len(), "SessionHandle::from_persisted: called");
        let handle = Self::new(persisted.workflow);
        for (namespace, snapshot) in persisted.artifacts {
            handle.artifacts.restore(&namespace, snapshot).await;
        }
        for (_, state) in persisted.chapters {
            handle.insert_chapter(state).await;
        }
        handle
    }

    pub async fn chapter(&self, chapter: ChapterId) -> Result<Arc<Mutex<ChapterState>>, WorkflowError> {
        self.chapters
            .read()
            .await
            .get(&chapter)
            .cloned()
            .ok_or(WorkflowError::ChapterNotFound { chapter })
    }

    /// Last committed copy of one chapter
    pub async fn published(&self, chapter: ChapterId) -> Result<ChapterState, WorkflowError> {
        self.published
            .read()
            .await
            .get(&chapter)
            .cloned()
            .ok_or(WorkflowError::ChapterNotFound { chapter })
    }

    /// Last committed copies of every chapter, in chapter order
    pub async fn chapter_states(&self) -> Vec<ChapterState> {
        self.published.read().await.values().cloned().collect()
    }

    /// Make a committed chapter state visible to readers
    pub async fn publish(&self, state: &ChapterState) {
        self.published.write().await.insert(state.chapter, state.clone());
    }

    /// Chapter that holds `token_id`, pending or consumed
    pub async fn token_owner(&self, token_id: &str) -> Option<ChapterId> {
        self.published
            .read()
            .await
            .values()
            .find(|ch| hitl::lookup(*ch, token_id) != TokenLookup::Unknown)
            .map(|ch| ch.chapter)
    }

    /// Add a chapter, or replace the state of an existing one
    pub async fn insert_chapter(&self, state: ChapterState) {
        self.publish(&state).await;
        let existing = self.chapters.read().await.get(&state.chapter).cloned();
        match existing {
            Some(handle) => *handle.lock().await = state,
            None => {
                self.chapters
                    .write()
                    .await
                    .insert(state.chapter, Arc::new(Mutex::new(state)));
            }
        }
    }
}
