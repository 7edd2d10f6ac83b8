//! Domain types for the Talk2Publish workflow
//!
//! All workflow position lives in these explicit types. Artifact content is
//! kept separately in the artifact store.

mod chapter;
mod clarification;
mod id;
mod interrupt;
mod plan;
mod stage;
mod workflow;

pub use chapter::{ChapterState, SubStage, chapter_namespace};
pub use clarification::{ClarificationRequest, Disposition};
pub use id::{generate_token_id, now_ms};
pub use interrupt::{ContinuationToken, Decision, InterruptPoint, TokenStatus};
pub use plan::{BookPlan, ChapterPlan};
pub use stage::Stage;
pub use workflow::WorkflowState;

/// Chapter number as assigned by planning (1-based)
pub type ChapterId = u32;
