//! Per-chapter sub-stage machine
//!
//! ```text
//! planned → transcript_received → gaps_analyzed → clarified → drafted → complete
//! ```
//!
//! Sub-stages only move forward. `redo` is the single way back and clears
//! every artifact reference recorded after the redo target.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

use super::{ChapterId, ClarificationRequest, ContinuationToken, Disposition, TokenStatus};
use crate::artifacts::ArtifactRef;
use crate::error::WorkflowError;
use crate::gap::GapAnalysisResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubStage {
    #[default]
    Planned,
    TranscriptReceived,
    GapsAnalyzed,
    Clarified,
    Drafted,
    Complete,
}

impl SubStage {
    pub const ALL: [SubStage; 6] = [
        SubStage::Planned,
        SubStage::TranscriptReceived,
        SubStage::GapsAnalyzed,
        SubStage::Clarified,
        SubStage::Drafted,
        SubStage::Complete,
    ];

    /// Forward moves allowed from this sub-stage
    pub const fn allowed_next_states(self) -> &'static [Self] {
        match self {
            Self::Planned => &[Self::TranscriptReceived],
            Self::TranscriptReceived => &[Self::GapsAnalyzed],
            Self::GapsAnalyzed => &[Self::Clarified],
            Self::Clarified => &[Self::Drafted],
            Self::Drafted => &[Self::Complete],
            Self::Complete => &[],
        }
    }

    pub fn can_transition_to(self, target: Self) -> bool {
        self.allowed_next_states().contains(&target)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::TranscriptReceived => "transcript_received",
            Self::GapsAnalyzed => "gaps_analyzed",
            Self::Clarified => "clarified",
            Self::Drafted => "drafted",
            Self::Complete => "complete",
        }
    }
}

impl fmt::Display for SubStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|sub| sub.as_str() == s.replace('-', "_"))
            .ok_or_else(|| format!("unknown chapter stage '{}'", s))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterState {
    pub chapter: ChapterId,
    pub title: String,
    pub sub_stage: SubStage,
    pub plan_ref: Option<ArtifactRef>,
    pub transcript_ref: Option<ArtifactRef>,
    pub gap_result_ref: Option<ArtifactRef>,
    #[serde(default)]
    pub clarification_refs: Vec<ArtifactRef>,
    pub draft_ref: Option<ArtifactRef>,
    #[serde(default)]
    pub clarifications: Vec<ClarificationRequest>,
    #[serde(default)]
    pub gaps: Option<GapAnalysisResult>,
    #[serde(default)]
    pub pending: Option<ContinuationToken>,
    #[serde(default)]
    pub resolved: Vec<ContinuationToken>,
    #[serde(default)]
    pub redo_required: bool,
    #[serde(default)]
    pub last_error: Option<String>,
    /// Number of drafts written
    #[serde(default)]
    pub revision: u32,
    /// Dropped from the accepted book plan; kept for its artifacts only
    #[serde(default)]
    pub superseded: bool,
}

impl ChapterState {
    pub fn new(chapter: ChapterId, title: impl Into<String>, plan_ref: ArtifactRef) -> Self {
        Self {
            chapter,
            title: title.into(),
            sub_stage: SubStage::Planned,
            plan_ref: Some(plan_ref),
            transcript_ref: None,
            gap_result_ref: None,
            clarification_refs: Vec::new(),
            draft_ref: None,
            clarifications: Vec::new(),
            gaps: None,
            pending: None,
            resolved: Vec::new(),
            redo_required: false,
            last_error: None,
            revision: 0,
            superseded: false,
        }
    }

    /// Artifact namespace for this chapter
    pub fn namespace(&self) -> String {
        chapter_namespace(self.chapter)
    }

    pub fn pending_clarifications(&self) -> usize {
        self.clarifications.iter().filter(|c| c.is_pending()).count()
    }

    pub fn is_complete(&self) -> bool {
        self.sub_stage == SubStage::Complete
    }

    /// Take the chapter out of the book; a pending token is superseded
    pub fn supersede(&mut self) {
        info!(chapter = self.chapter, sub_stage = %self.sub_stage, "chapter dropped from plan");
        if let Some(mut token) = self.pending.take() {
            token.resolve(TokenStatus::Superseded);
            self.resolved.push(token);
        }
        self.superseded = true;
    }

    /// Check that the chapter may record `target` without changing anything
    ///
    /// Recording `transcript_received` or `drafted` again while already there
    /// is a replacement and is allowed.
    pub fn ensure_can_enter(&self, target: SubStage) -> Result<(), WorkflowError> {
        if self.redo_required {
            return Err(WorkflowError::RedoRequired { chapter: self.chapter });
        }
        let replacing = self.sub_stage == target && matches!(target, SubStage::TranscriptReceived | SubStage::Drafted);
        if !replacing && !self.sub_stage.can_transition_to(target) {
            return Err(WorkflowError::InvalidTransition {
                chapter: self.chapter,
                from: self.sub_stage,
                to: target,
            });
        }
        Ok(())
    }

    fn advance(&mut self, target: SubStage) -> Result<(), WorkflowError> {
        self.ensure_can_enter(target)?;
        if self.sub_stage == target {
            return Ok(());
        }
        info!(chapter = self.chapter, from = %self.sub_stage, to = %target, "chapter transition");
        self.sub_stage = target;
        self.last_error = None;
        Ok(())
    }

    /// Record a submitted transcript
    ///
    /// Re-submitting while still at `transcript_received` replaces the
    /// reference without moving the sub-stage.
    pub fn record_transcript(&mut self, transcript_ref: ArtifactRef) -> Result<(), WorkflowError> {
        debug!(chapter = self.chapter, "ChapterState::record_transcript: called");
        self.advance(SubStage::TranscriptReceived)?;
        self.transcript_ref = Some(transcript_ref);
        Ok(())
    }

    pub fn record_gaps(
        &mut self,
        gap_result_ref: ArtifactRef,
        result: GapAnalysisResult,
        requests: Vec<ClarificationRequest>,
    ) -> Result<(), WorkflowError> {
        debug!(chapter = self.chapter, requests = requests.len(), "ChapterState::record_gaps: called");
        self.advance(SubStage::GapsAnalyzed)?;
        self.gap_result_ref = Some(gap_result_ref);
        self.gaps = Some(result);
        self.clarifications = requests;
        Ok(())
    }

    /// Move to `clarified`; every request must have a disposition
    pub fn mark_clarified(&mut self, record_ref: ArtifactRef) -> Result<(), WorkflowError> {
        debug!(chapter = self.chapter, "ChapterState::mark_clarified: called");
        let pending = self.pending_clarifications();
        if pending > 0 {
            return Err(WorkflowError::OutstandingClarifications {
                chapter: self.chapter,
                pending,
            });
        }
        self.advance(SubStage::Clarified)?;
        self.clarification_refs.push(record_ref);
        Ok(())
    }

    /// Record a draft; a redraft while at `drafted` replaces the reference
    pub fn record_draft(&mut self, draft_ref: ArtifactRef) -> Result<(), WorkflowError> {
        debug!(chapter = self.chapter, revision = self.revision, "ChapterState::record_draft: called");
        self.advance(SubStage::Drafted)?;
        self.draft_ref = Some(draft_ref);
        self.revision += 1;
        Ok(())
    }

    pub fn complete(&mut self) -> Result<(), WorkflowError> {
        debug!(chapter = self.chapter, "ChapterState::complete: called");
        self.advance(SubStage::Complete)
    }

    /// Take the pending token if `token_id` names it
    pub fn take_pending(&mut self, token_id: &str) -> Option<ContinuationToken> {
        match &self.pending {
            Some(token) if token.id == token_id => self.pending.take(),
            _ => None,
        }
    }

    /// Return to an earlier sub-stage
    ///
    /// References of sub-stages after `target` are cleared; those at or before
    /// it are kept. Returning to `gaps_analyzed` reopens every clarification
    /// request. A pending token is superseded.
    pub fn redo(&mut self, target: SubStage) -> Result<(), WorkflowError> {
        debug!(chapter = self.chapter, from = %self.sub_stage, %target, "ChapterState::redo: called");
        if target >= self.sub_stage {
            return Err(WorkflowError::InvalidTransition {
                chapter: self.chapter,
                from: self.sub_stage,
                to: target,
            });
        }

        if target < SubStage::TranscriptReceived {
            self.transcript_ref = None;
        }
        if target < SubStage::GapsAnalyzed {
            self.gap_result_ref = None;
            self.gaps = None;
            self.clarifications.clear();
        }
        if target < SubStage::Clarified {
            self.clarification_refs.clear();
        }
        if target < SubStage::Drafted {
            self.draft_ref = None;
        }
        if target == SubStage::GapsAnalyzed {
            for request in &mut self.clarifications {
                request.disposition = Disposition::Pending;
            }
        }

        if let Some(mut token) = self.pending.take() {
            token.resolve(TokenStatus::Superseded);
            self.resolved.push(token);
        }

        info!(chapter = self.chapter, from = %self.sub_stage, to = %target, "chapter redo");
        self.sub_stage = target;
        self.redo_required = false;
        self.last_error = None;
        Ok(())
    }
}

/// Artifact namespace for a chapter
pub fn chapter_namespace(chapter: ChapterId) -> String {
    format!("chapter_{}", chapter)
}
