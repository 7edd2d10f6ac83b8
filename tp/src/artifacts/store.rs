//! In-memory artifact store with per-namespace locking

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::now_ms;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArtifactError {
    #[error("Artifact not found: {namespace}/{key}")]
    NotFound { namespace: String, key: String },
}

/// A stored text blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub key: String,
    pub content: String,
    /// Namespace version at the time of the write
    pub version: u64,
    pub written_at: i64,
}

/// Pointer to a specific artifact write
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub namespace: String,
    pub key: String,
    pub version: u64,
}

/// Serializable copy of one namespace
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceSnapshot {
    pub version: u64,
    pub artifacts: BTreeMap<String, Artifact>,
}

/// Read-only flattened view handed to delegates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactView {
    entries: BTreeMap<String, String>,
}

impl ArtifactView {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for ArtifactView {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

type Namespace = Arc<RwLock<NamespaceSnapshot>>;

/// Artifact store for one session
///
/// Each namespace has its own lock, so chapters never contend with each other.
/// The outer map lock is only held long enough to find or create a namespace.
#[derive(Debug, Default)]
pub struct ArtifactStore {
    namespaces: RwLock<HashMap<String, Namespace>>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn namespace(&self, name: &str) -> Namespace {
        if let Some(ns) = self.namespaces.read().await.get(name) {
            return ns.clone();
        }
        let mut map = self.namespaces.write().await;
        map.entry(name.to_string()).or_default().clone()
    }

    async fn existing(&self, name: &str) -> Option<Namespace> {
        self.namespaces.read().await.get(name).cloned()
    }

    /// Create or overwrite a single artifact
    pub async fn put(&self, namespace: &str, key: &str, content: impl Into<String>) -> ArtifactRef {
        debug!(%namespace, %key, "ArtifactStore::put: called");
        let mut delta = BTreeMap::new();
        delta.insert(key.to_string(), content.into());
        let version = self.merge_versioned(namespace, delta).await;
        ArtifactRef {
            namespace: namespace.to_string(),
            key: key.to_string(),
            version,
        }
    }

    /// Apply a batch of writes atomically
    ///
    /// Concurrent merges on the same namespace are serialized; for a key
    /// written by both, the later merge wins. Readers see all of a merge or
    /// none of it.
    pub async fn merge(&self, namespace: &str, delta: BTreeMap<String, String>) -> Vec<ArtifactRef> {
        debug!(%namespace, count = delta.len(), "ArtifactStore::merge: called");
        let keys: Vec<String> = delta.keys().cloned().collect();
        let version = self.merge_versioned(namespace, delta).await;
        keys.into_iter()
            .map(|key| ArtifactRef {
                namespace: namespace.to_string(),
                key,
                version,
            })
            .collect()
    }

    async fn merge_versioned(&self, namespace: &str, delta: BTreeMap<String, String>) -> u64 {
        let ns = self.namespace(namespace).await;
        let mut guard = ns.write().await;
        guard.version += 1;
        let version = guard.version;
        let written_at = now_ms();
        for (key, content) in delta {
            guard.artifacts.insert(
                key.clone(),
                Artifact {
                    key,
                    content,
                    version,
                    written_at,
                },
            );
        }
        version
    }

    pub async fn get(&self, namespace: &str, key: &str) -> Result<String, ArtifactError> {
        self.get_artifact(namespace, key).await.map(|a| a.content)
    }

    pub async fn get_artifact(&self, namespace: &str, key: &str) -> Result<Artifact, ArtifactError> {
        debug!(%namespace, %key, "ArtifactStore::get_artifact: called");
        let not_found = || ArtifactError::NotFound {
            namespace: namespace.to_string(),
            key: key.to_string(),
        };
        let ns = self.existing(namespace).await.ok_or_else(not_found)?;
        let guard = ns.read().await;
        guard.artifacts.get(key).cloned().ok_or_else(not_found)
    }

    pub async fn keys(&self, namespace: &str) -> Vec<String> {
        match self.existing(namespace).await {
            Some(ns) => ns.read().await.artifacts.keys().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Names of all namespaces that have been written
    pub async fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.namespaces.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn snapshot(&self, namespace: &str) -> NamespaceSnapshot {
        debug!(%namespace, "ArtifactStore::snapshot: called");
        match self.existing(namespace).await {
            Some(ns) => ns.read().await.clone(),
            None => NamespaceSnapshot::default(),
        }
    }

    /// Replace a namespace with a persisted snapshot
    pub async fn restore(&self, namespace: &str, snapshot: NamespaceSnapshot) {
        debug!(%namespace, count = snapshot.artifacts.len(), "ArtifactStore::restore: called");
        let ns = self.namespace(namespace).await;
        *ns.write().await = snapshot;
    }

    /// Flatten the given namespaces into a read-only view
    pub async fn view(&self, namespaces: &[String]) -> ArtifactView {
        let mut entries = BTreeMap::new();
        for name in namespaces {
            if let Some(ns) = self.existing(name).await {
                let guard = ns.read().await;
                for (key, artifact) in &guard.artifacts {
                    entries.insert(key.clone(), artifact.content.clone());
                }
            }
        }
        ArtifactView { entries }
    }
}
