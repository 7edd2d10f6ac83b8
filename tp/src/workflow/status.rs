//! Status snapshots
//!
//! Built from workflow and chapter state alone. Two processes holding the
//! same persisted state produce the same snapshot.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::artifacts::ArtifactRef;
use crate::domain::{ChapterId, ChapterState, ContinuationToken, InterruptPoint, Stage, SubStage, WorkflowState};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterStatus {
    pub chapter: ChapterId,
    pub title: String,
    pub sub_stage: SubStage,
    pub pending_clarifications: usize,
    pub redo_required: bool,
    pub revision: u32,
    pub last_error: Option<String>,
}

impl From<&ChapterState> for ChapterStatus {
    fn from(ch: &ChapterState) -> Self {
        Self {
            chapter: ch.chapter,
            title: ch.title.clone(),
            sub_stage: ch.sub_stage,
            pending_clarifications: ch.pending_clarifications(),
            redo_required: ch.redo_required,
            revision: ch.revision,
            last_error: ch.last_error.clone(),
        }
    }
}

/// A decision waiting on the author
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSummary {
    pub token: String,
    pub point: InterruptPoint,
    pub questions: Vec<String>,
    pub advisory: Vec<String>,
}

impl From<&ContinuationToken> for PendingSummary {
    fn from(token: &ContinuationToken) -> Self {
        Self {
            token: token.id.clone(),
            point: token.point,
            questions: token.questions.clone(),
            advisory: token.advisory.clone(),
        }
    }
}

/// What the author should do next
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum NextAction {
    /// Keep talking to the current stage's delegate
    Converse { stage: Stage },
    /// Answer questions the delegate asked
    Answer { stage: Stage, questions: Vec<String> },
    /// Resume a pending token
    Decide { token: String },
    SubmitTranscript { chapter: ChapterId },
    Draft { chapter: ChapterId },
    Redo { chapter: ChapterId },
    Done,
}

impl fmt::Display for NextAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Converse { stage } => write!(f, "continue the {} conversation", stage),
            Self::Answer { stage, .. } => write!(f, "answer the {} questions", stage),
            Self::Decide { token } => write!(f, "resume {}", token),
            Self::SubmitTranscript { chapter } => write!(f, "submit the transcript for chapter {}", chapter),
            Self::Draft { chapter } => write!(f, "draft chapter {}", chapter),
            Self::Redo { chapter } => write!(f, "redo chapter {}", chapter),
            Self::Done => write!(f, "nothing, the book is complete"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub session_id: String,
    pub stage: Stage,
    pub completed_stages: Vec<Stage>,
    pub active_chapter: Option<ChapterId>,
    pub chapters: Vec<ChapterStatus>,
    pub pending: Vec<PendingSummary>,
    pub next_action: NextAction,
    pub last_error: Option<String>,
}

impl StatusSnapshot {
    /// Derive status; `chapters` must be ordered by chapter number
    ///
    /// Chapters dropped from the plan are left out.
    pub fn build(workflow: &WorkflowState, chapters: &[ChapterState]) -> Self {
        let chapters: Vec<ChapterState> = chapters.iter().filter(|ch| !ch.superseded).cloned().collect();
        let chapters = chapters.as_slice();
        let mut pending: Vec<PendingSummary> = workflow.pending.iter().map(PendingSummary::from).collect();
        pending.extend(chapters.iter().filter_map(|ch| ch.pending.as_ref()).map(PendingSummary::from));

        Self {
            session_id: workflow.session_id.clone(),
            stage: workflow.stage,
            completed_stages: workflow.completed_stages.clone(),
            active_chapter: workflow.active_chapter,
            chapters: chapters.iter().map(ChapterStatus::from).collect(),
            pending,
            next_action: next_action(workflow, chapters),
            last_error: workflow.last_error.clone(),
        }
    }
}

fn next_action(workflow: &WorkflowState, chapters: &[ChapterState]) -> NextAction {
    if let Some(token) = &workflow.pending {
        return NextAction::Decide { token: token.id.clone() };
    }
    match workflow.stage {
        Stage::Welcome | Stage::Profiling | Stage::Audience | Stage::Planning => {
            if workflow.open_questions.is_empty() {
                NextAction::Converse { stage: workflow.stage }
            } else {
                NextAction::Answer {
                    stage: workflow.stage,
                    questions: workflow.open_questions.clone(),
                }
            }
        }
        Stage::ChapterLoop => {
            // The active chapter goes first, then chapter order
            let ordered = workflow
                .active_chapter
                .and_then(|id| chapters.iter().find(|ch| ch.chapter == id))
                .into_iter()
                .chain(chapters.iter());
            ordered.filter_map(chapter_action).next().unwrap_or(NextAction::Done)
        }
        Stage::Complete => NextAction::Done,
    }
}

fn chapter_action(ch: &ChapterState) -> Option<NextAction> {
    if let Some(token) = &ch.pending {
        return Some(NextAction::Decide { token: token.id.clone() });
    }
    if ch.redo_required {
        return Some(NextAction::Redo { chapter: ch.chapter });
    }
    match ch.sub_stage {
        SubStage::Planned | SubStage::TranscriptReceived | SubStage::GapsAnalyzed => {
            Some(NextAction::SubmitTranscript { chapter: ch.chapter })
        }
        SubStage::Clarified | SubStage::Drafted => Some(NextAction::Draft { chapter: ch.chapter }),
        SubStage::Complete => None,
    }
}

/// Summary of an artifact write returned by `advance`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSummary {
    pub namespace: String,
    pub key: String,
    pub version: u64,
    pub bytes: usize,
}

impl ArtifactSummary {
    pub fn new(reference: &ArtifactRef, bytes: usize) -> Self {
        Self {
            namespace: reference.namespace.clone(),
            key: reference.key.clone(),
            version: reference.version,
            bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ClarificationRequest;
    use crate::hitl;

    fn chapter(n: ChapterId) -> ChapterState {
        ChapterState::new(
            n,
            format!("Chapter {}", n),
            ArtifactRef {
                namespace: format!("chapter_{}", n),
                key: format!("chapter_{}_plan", n),
                version: 1,
            },
        )
    }

    fn at_loop() -> WorkflowState {
        let mut wf = WorkflowState::new("s1");
        for stage in [Stage::Profiling, Stage::Audience, Stage::Planning, Stage::ChapterLoop] {
            wf.transition(stage).unwrap();
        }
        wf
    }

    #[test]
    fn test_fresh_session_converses() {
        let wf = WorkflowState::new("s1");
        let status = StatusSnapshot::build(&wf, &[]);
        assert_eq!(status.next_action, NextAction::Converse { stage: Stage::Welcome });
        assert!(status.pending.is_empty());
    }

    #[test]
    fn test_open_questions_ask_for_answers() {
        let mut wf = WorkflowState::new("s1");
        wf.transition(Stage::Profiling).unwrap();
        wf.open_questions = vec!["Who are you?".into()];
        let status = StatusSnapshot::build(&wf, &[]);
        assert!(matches!(status.next_action, NextAction::Answer { .. }));
    }

    #[test]
    fn test_chapter_loop_prefers_active_chapter() {
        let mut wf = at_loop();
        wf.active_chapter = Some(2);
        let chapters = vec![chapter(1), chapter(2)];
        let status = StatusSnapshot::build(&wf, &chapters);
        assert_eq!(status.next_action, NextAction::SubmitTranscript { chapter: 2 });
    }

    #[test]
    fn test_pending_chapter_tokens_are_listed() {
        let wf = at_loop();
        let mut ch = chapter(1);
        ch.clarifications = vec![ClarificationRequest::for_topic(1, 1, "support")];
        let token = hitl::raise(
            &mut ch,
            "s1",
            InterruptPoint::Clarification { chapter: 1 },
            vec!["q".into()],
            vec!["refunds".into()],
        );
        let status = StatusSnapshot::build(&wf, &[ch]);
        assert_eq!(status.pending.len(), 1);
        assert_eq!(status.pending[0].advisory, vec!["refunds".to_string()]);
        assert_eq!(status.next_action, NextAction::Decide { token: token.id });
        assert_eq!(status.chapters[0].pending_clarifications, 1);
    }

    #[test]
    fn test_chapters_dropped_from_plan_are_hidden() {
        let wf = at_loop();
        let mut dropped = chapter(2);
        dropped.supersede();
        let status = StatusSnapshot::build(&wf, &[chapter(1), dropped]);
        assert_eq!(status.chapters.len(), 1);
        assert_eq!(status.next_action, NextAction::SubmitTranscript { chapter: 1 });
    }

    #[test]
    fn test_redo_required_and_done() {
        let wf = at_loop();
        let mut ch = chapter(1);
        ch.redo_required = true;
        assert_eq!(
            StatusSnapshot::build(&wf, &[ch]).next_action,
            NextAction::Redo { chapter: 1 }
        );

        let mut done = at_loop();
        done.transition(Stage::Complete).unwrap();
        assert_eq!(StatusSnapshot::build(&done, &[]).next_action, NextAction::Done);
    }
}
