//! Artifact store
//!
//! Text artifacts keyed by namespace (`book` or `chapter_<n>`) and key. Content
//! only; workflow position never depends on whether an artifact exists.

mod store;

pub use store::{Artifact, ArtifactError, ArtifactRef, ArtifactStore, ArtifactView, NamespaceSnapshot};

/// Namespace for session-level artifacts
pub const BOOK_NAMESPACE: &str = "book";

/// Well-known artifact keys
pub mod keys {
    pub const AUTHOR_PROFILE: &str = "author_profile";
    pub const AUDIENCE_PERSONA: &str = "audience_persona";
    pub const BOOK_PLAN: &str = "book_plan";

    pub fn chapter_plan(chapter: u32) -> String {
        format!("chapter_{}_plan", chapter)
    }

    pub fn chapter_transcript(chapter: u32) -> String {
        format!("chapter_{}_transcript", chapter)
    }

    pub fn chapter_gaps(chapter: u32) -> String {
        format!("chapter_{}_gaps", chapter)
    }

    pub fn chapter_clarifications(chapter: u32) -> String {
        format!("chapter_{}_clarifications", chapter)
    }

    pub fn chapter_draft(chapter: u32) -> String {
        format!("chapter_{}_draft", chapter)
    }
}
