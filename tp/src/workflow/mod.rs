//! Workflow orchestration
//!
//! The [`Orchestrator`] owns live sessions and exposes the operations a
//! transport calls: start or resume a session, advance the conversation,
//! submit chapter transcripts, resume pauses, draft, redo and report status.

mod chapters;
mod orchestrator;
mod session;
mod status;

pub use orchestrator::{AdvanceOutcome, Orchestrator};
pub use status::{ArtifactSummary, ChapterStatus, NextAction, PendingSummary, StatusSnapshot};
