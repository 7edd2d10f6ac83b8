//! JSON file store
//!
//! Layout, one directory per session:
//!
//! ```text
//! <root>/<session>/workflow.json
//! <root>/<session>/chapters/<n>.json
//! <root>/<session>/artifacts/<namespace>.json
//! ```
//!
//! Every file is written to a temporary sibling and renamed into place.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{PersistedSession, StateStore, StoreError, validate_session_id};
use crate::artifacts::NamespaceSnapshot;
use crate::domain::{ChapterState, WorkflowState};

pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        debug!(?root, "JsonFileStore::new: called");
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_dir(&self, session_id: &str) -> Result<PathBuf, StoreError> {
        validate_session_id(session_id)?;
        Ok(self.root.join(session_id))
    }

    async fn write_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
        debug!(?path, "JsonFileStore::write_atomic: called");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_vec_pretty(value)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = path.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::now_v7().simple()));

        let mut file = fs::File::create(&tmp).await?;
        file.write_all(&body).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
        let body = fs::read(path).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Read every `*.json` file in a directory, keyed by file stem
    async fn read_dir_json<T: DeserializeOwned>(dir: &Path) -> Result<Vec<(String, T)>, StoreError> {
        let mut out = Vec::new();
        if !fs::try_exists(dir).await? {
            return Ok(out);
        }
        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            if stem.starts_with('.') {
                continue;
            }
            out.push((stem, Self::read_json(&path).await?));
        }
        Ok(out)
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn save_workflow(&self, state: &WorkflowState) -> Result<(), StoreError> {
        debug!(session_id = %state.session_id, stage = %state.stage, "JsonFileStore::save_workflow: called");
        let path = self.session_dir(&state.session_id)?.join("workflow.json");
        Self::write_atomic(&path, state).await
    }

    async fn save_chapter(&self, session_id: &str, chapter: &ChapterState) -> Result<(), StoreError> {
        debug!(%session_id, chapter = chapter.chapter, "JsonFileStore::save_chapter: called");
        let path = self
            .session_dir(session_id)?
            .join("chapters")
            .join(format!("{}.json", chapter.chapter));
        Self::write_atomic(&path, chapter).await
    }

    async fn save_artifacts(
        &self,
        session_id: &str,
        namespace: &str,
        snapshot: &NamespaceSnapshot,
    ) -> Result<(), StoreError> {
        debug!(%session_id, %namespace, "JsonFileStore::save_artifacts: called");
        let path = self
            .session_dir(session_id)?
            .join("artifacts")
            .join(format!("{}.json", namespace));
        Self::write_atomic(&path, snapshot).await
    }

    async fn load(&self, session_id: &str) -> Result<Option<PersistedSession>, StoreError> {
        debug!(%session_id, "JsonFileStore::load: called");
        let dir = self.session_dir(session_id)?;
        let workflow_path = dir.join("workflow.json");
        if !fs::try_exists(&workflow_path).await? {
            debug!(%session_id, "JsonFileStore::load: no saved session");
            return Ok(None);
        }
        let workflow: WorkflowState = Self::read_json(&workflow_path).await?;

        let mut chapters = BTreeMap::new();
        for (stem, chapter) in Self::read_dir_json::<ChapterState>(&dir.join("chapters")).await? {
            if stem != chapter.chapter.to_string() {
                warn!(%stem, chapter = chapter.chapter, "JsonFileStore::load: chapter file name mismatch");
            }
            chapters.insert(chapter.chapter, chapter);
        }

        let artifacts: BTreeMap<String, NamespaceSnapshot> =
            Self::read_dir_json(&dir.join("artifacts")).await?.into_iter().collect();

        Ok(Some(PersistedSession {
            workflow,
            chapters,
            artifacts,
        }))
    }

    async fn list_sessions(&self) -> Result<Vec<String>, StoreError> {
        let mut sessions = Vec::new();
        if !fs::try_exists(&self.root).await? {
            return Ok(sessions);
        }
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.path().join("workflow.json").exists() {
                sessions.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        sessions.sort();
        Ok(sessions)
    }
}
