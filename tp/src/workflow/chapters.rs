//! Chapter operations
//!
//! Each takes the workflow lock only briefly (to check the stage and record
//! the active chapter) and then works under its own chapter lock, so
//! different chapters progress in parallel. Every commit publishes the new
//! chapter state, which is what status and token routing read.

use tracing::{debug, info, warn};

use super::orchestrator::Orchestrator;
use super::session::SessionHandle;
use super::status::StatusSnapshot;
use crate::artifacts::{ArtifactRef, BOOK_NAMESPACE, keys};
use crate::delegates::{TaskContext, TaskKind};
use crate::domain::{
    ChapterId, ChapterState, ClarificationRequest, ContinuationToken, Decision, Disposition, InterruptPoint, Stage,
    SubStage, TokenStatus,
};
use crate::error::WorkflowError;
use crate::gap::{GapAnalysisResult, normalize_topic};
use crate::hitl;
use crate::state::StoreError;

impl Orchestrator {
    /// Record a transcript for `chapter` and run gap analysis on it
    ///
    /// Missing topics raise a clarification pause. With nothing missing the
    /// chapter goes straight to `clarified` (and is drafted when auto-draft
    /// is on). An analysis outage keeps the transcript and leaves the chapter
    /// at `transcript_received` so it can be resubmitted.
    pub async fn submit_transcript(
        &self,
        session_id: &str,
        chapter: ChapterId,
        text: &str,
    ) -> Result<GapAnalysisResult, WorkflowError> {
        debug!(%session_id, chapter, len = text.len(), "Orchestrator::submit_transcript: called");
        let session = self.session(session_id).await?;
        self.enter_chapter(&session, chapter).await?;
        let handle = session.chapter(chapter).await?;
        let mut guard = handle.lock().await;
        guard.ensure_can_enter(SubStage::TranscriptReceived)?;

        let namespace = guard.namespace();
        let mut ch = guard.clone();
        let transcript_ref = self
            .put_and_save(&session, &namespace, &keys::chapter_transcript(chapter), text)
            .await?;
        ch.record_transcript(transcript_ref)?;
        self.commit_chapter(&session, &mut guard, ch.clone()).await?;

        let plan = session.artifacts.get(&namespace, &keys::chapter_plan(chapter)).await?;
        let result = match self.analyzer.analyze(&plan, text).await {
            Ok(result) => result,
            Err(e) => {
                let err = WorkflowError::from_gap(chapter, e);
                warn!(%session_id, chapter, error = %err, "submit_transcript: analysis failed");
                ch.last_error = Some(err.to_string());
                self.commit_chapter(&session, &mut guard, ch).await?;
                return Err(err);
            }
        };

        let gaps_json = serde_json::to_string_pretty(&result).map_err(StoreError::from)?;
        let gaps_ref = self
            .put_and_save(&session, &namespace, &keys::chapter_gaps(chapter), gaps_json)
            .await?;
        let requests: Vec<ClarificationRequest> = result
            .missing_topics
            .iter()
            .enumerate()
            .map(|(i, topic)| ClarificationRequest::for_topic(chapter, i + 1, topic))
            .collect();
        ch.record_gaps(gaps_ref, result.clone(), requests)?;

        if ch.pending_clarifications() > 0 {
            let questions = ch.clarifications.iter().map(|r| r.question.clone()).collect();
            hitl::raise(
                &mut ch,
                session_id,
                InterruptPoint::Clarification { chapter },
                questions,
                advisory_notes(&result),
            );
            self.commit_chapter(&session, &mut guard, ch).await?;
        } else {
            self.finish_clarification(&session, &mut ch, None).await?;
            self.commit_chapter(&session, &mut guard, ch).await?;
            if self.config.auto_draft {
                self.auto_draft(&session, &mut guard).await;
            }
        }
        Ok(result)
    }

    /// Draft (or redraft with feedback) a clarified chapter
    pub async fn draft_chapter(
        &self,
        session_id: &str,
        chapter: ChapterId,
        feedback: Option<String>,
    ) -> Result<StatusSnapshot, WorkflowError> {
        debug!(%session_id, chapter, "Orchestrator::draft_chapter: called");
        let session = self.session(session_id).await?;
        self.enter_chapter(&session, chapter).await?;
        let handle = session.chapter(chapter).await?;
        let mut guard = handle.lock().await;
        if let Some(token) = &guard.pending {
            return Err(WorkflowError::AwaitingDecision { token: token.id.clone() });
        }

        let mut ch = guard.clone();
        match self.draft_into(&session, &mut ch, feedback).await {
            Ok(_) => self.commit_chapter(&session, &mut guard, ch).await?,
            Err(err) => {
                let mut failed = guard.clone();
                failed.last_error = Some(err.to_string());
                self.commit_chapter(&session, &mut guard, failed).await?;
                return Err(err);
            }
        }
        drop(guard);
        Ok(self.snapshot(&session).await)
    }

    /// Return a chapter to an earlier sub-stage
    ///
    /// Redoing to `gaps_analyzed` reopens the clarification requests under a
    /// new token; redoing to `drafted` asks for a fresh draft review. A
    /// finished book goes back to the chapter loop.
    pub async fn redo_chapter(
        &self,
        session_id: &str,
        chapter: ChapterId,
        target: SubStage,
    ) -> Result<StatusSnapshot, WorkflowError> {
        debug!(%session_id, chapter, %target, "Orchestrator::redo_chapter: called");
        let session = self.session(session_id).await?;
        self.enter_chapter(&session, chapter).await?;
        let handle = session.chapter(chapter).await?;
        {
            let mut guard = handle.lock().await;
            let mut ch = guard.clone();
            ch.redo(target)?;
            match target {
                SubStage::GapsAnalyzed if ch.pending_clarifications() > 0 => {
                    let questions = ch.clarifications.iter().map(|r| r.question.clone()).collect();
                    let advisory = ch.gaps.as_ref().map(advisory_notes).unwrap_or_default();
                    hitl::raise(
                        &mut ch,
                        session_id,
                        InterruptPoint::Clarification { chapter },
                        questions,
                        advisory,
                    );
                }
                SubStage::GapsAnalyzed => self.finish_clarification(&session, &mut ch, None).await?,
                SubStage::Drafted => {
                    raise_draft_review(&mut ch, session_id);
                }
                _ => {}
            }
            self.commit_chapter(&session, &mut guard, ch).await?;
        }

        let mut wf = session.workflow.lock().await;
        if wf.stage == Stage::Complete {
            let mut next = wf.clone();
            next.rollback(Stage::ChapterLoop)?;
            next.active_chapter = Some(chapter);
            self.commit_workflow(&mut wf, next).await?;
        }
        Ok(self.snapshot_with(&session, &wf).await)
    }

    /// Handle a decision on a clarification token; `guard` is the locked chapter
    pub(super) async fn resume_clarification_point(
        &self,
        session: &SessionHandle,
        guard: &mut ChapterState,
        token: ContinuationToken,
        decision: Decision,
    ) -> Result<(), WorkflowError> {
        let chapter = guard.chapter;
        let namespace = guard.namespace();
        info!(session_id = %session.id, chapter, decision = %decision.status(), "clarification decision");

        let mut ch = guard.clone();
        let mut clarified = false;
        match decision {
            Decision::Accept => {
                set_pending(&mut ch, Disposition::Skipped);
                hitl::consume(&mut ch, &token.id, TokenStatus::Accepted)?;
                self.finish_clarification(session, &mut ch, None).await?;
                clarified = true;
            }
            Decision::Respond { text } => {
                let topics: Vec<String> = ch
                    .clarifications
                    .iter()
                    .filter(|r| r.is_pending())
                    .map(|r| r.topic.clone())
                    .collect();
                let covered = match self.analyzer.check_coverage(&topics, &text).await {
                    Ok(covered) => covered,
                    Err(e) => {
                        let err = WorkflowError::from_gap(chapter, e);
                        let mut failed = guard.clone();
                        failed.last_error = Some(err.to_string());
                        self.commit_chapter(session, guard, failed).await?;
                        return Err(err);
                    }
                };

                let uncovered: Vec<String> = topics
                    .iter()
                    .filter(|t| !covered.contains(&normalize_topic(t)))
                    .cloned()
                    .collect();
                set_pending(&mut ch, Disposition::Answered(text));
                hitl::consume(&mut ch, &token.id, TokenStatus::Responded)?;

                if uncovered.is_empty() {
                    self.finish_clarification(session, &mut ch, None).await?;
                    clarified = true;
                } else {
                    debug!(chapter, uncovered = uncovered.len(), "clarification answer left topics open");
                    let start = ch.clarifications.len();
                    let follow_ups: Vec<ClarificationRequest> = uncovered
                        .iter()
                        .enumerate()
                        .map(|(i, topic)| ClarificationRequest::for_topic(chapter, start + i + 1, topic))
                        .collect();
                    let questions = follow_ups.iter().map(|r| r.question.clone()).collect();
                    ch.clarifications.extend(follow_ups);
                    hitl::raise(
                        &mut ch,
                        &session.id,
                        InterruptPoint::Clarification { chapter },
                        questions,
                        token.advisory.clone(),
                    );
                }
            }
            Decision::Edit { key, content } => {
                let transcript_key = keys::chapter_transcript(chapter);
                let record_key = keys::chapter_clarifications(chapter);
                if key != transcript_key && key != record_key {
                    return Err(WorkflowError::InvalidDecision {
                        token: token.id.clone(),
                        reason: format!("only {} or {} can be edited here", transcript_key, record_key),
                    });
                }
                let edited = self.put_and_save(session, &namespace, &key, content).await?;
                set_pending(&mut ch, Disposition::Edited(key.clone()));
                hitl::consume(&mut ch, &token.id, TokenStatus::Edited)?;
                if key == transcript_key {
                    ch.transcript_ref = Some(edited);
                    self.finish_clarification(session, &mut ch, None).await?;
                } else {
                    self.finish_clarification(session, &mut ch, Some(edited)).await?;
                }
                clarified = true;
            }
            Decision::Abandon => {
                set_pending(&mut ch, Disposition::Skipped);
                hitl::consume(&mut ch, &token.id, TokenStatus::Abandoned)?;
                ch.redo_required = true;
            }
        }

        self.commit_chapter(session, guard, ch).await?;
        if clarified && self.config.auto_draft {
            self.auto_draft(session, guard).await;
        }
        Ok(())
    }

    /// Handle a decision on a draft review token; `guard` is the locked chapter
    pub(super) async fn resume_draft_review(
        &self,
        session: &SessionHandle,
        guard: &mut ChapterState,
        token: ContinuationToken,
        decision: Decision,
    ) -> Result<(), WorkflowError> {
        let chapter = guard.chapter;
        info!(session_id = %session.id, chapter, decision = %decision.status(), "draft review decision");

        let mut ch = guard.clone();
        match decision {
            Decision::Accept => {
                hitl::consume(&mut ch, &token.id, TokenStatus::Accepted)?;
                ch.complete()?;
            }
            Decision::Respond { text } => {
                hitl::consume(&mut ch, &token.id, TokenStatus::Responded)?;
                if let Err(err) = self.draft_into(session, &mut ch, Some(text)).await {
                    let mut failed = guard.clone();
                    failed.last_error = Some(err.to_string());
                    self.commit_chapter(session, guard, failed).await?;
                    return Err(err);
                }
            }
            Decision::Edit { key, content } => {
                let draft_key = keys::chapter_draft(chapter);
                if key != draft_key {
                    return Err(WorkflowError::InvalidDecision {
                        token: token.id.clone(),
                        reason: format!("only {} can be edited here", draft_key),
                    });
                }
                let draft_ref = self.put_and_save(session, &ch.namespace(), &key, content).await?;
                ch.record_draft(draft_ref)?;
                hitl::consume(&mut ch, &token.id, TokenStatus::Edited)?;
                ch.complete()?;
            }
            Decision::Abandon => {
                hitl::consume(&mut ch, &token.id, TokenStatus::Abandoned)?;
                ch.redo_required = true;
            }
        }
        self.commit_chapter(session, guard, ch).await
    }

    /// Check the session is in the chapter loop and make `chapter` active
    async fn enter_chapter(&self, session: &SessionHandle, chapter: ChapterId) -> Result<(), WorkflowError> {
        let mut wf = session.workflow.lock().await;
        if wf.stage < Stage::ChapterLoop {
            let missing = Stage::ChapterLoop
                .prerequisites()
                .iter()
                .copied()
                .filter(|s| !wf.is_completed(*s))
                .collect();
            return Err(WorkflowError::PrerequisiteNotMet {
                target: Stage::ChapterLoop,
                missing,
            });
        }
        if session.published(chapter).await?.superseded {
            return Err(WorkflowError::ChapterNotFound { chapter });
        }
        if wf.active_chapter != Some(chapter) {
            let mut next = wf.clone();
            next.active_chapter = Some(chapter);
            next.touch();
            self.commit_workflow(&mut wf, next).await?;
        }
        Ok(())
    }

    /// Write the clarification record and move to `clarified`
    ///
    /// `record` replaces the generated record when the author edited it.
    async fn finish_clarification(
        &self,
        session: &SessionHandle,
        ch: &mut ChapterState,
        record: Option<ArtifactRef>,
    ) -> Result<(), WorkflowError> {
        ch.ensure_can_enter(SubStage::Clarified)?;
        let record_ref = match record {
            Some(record) => record,
            None => {
                let body = serde_json::to_string_pretty(&ch.clarifications).map_err(StoreError::from)?;
                self.put_and_save(session, &ch.namespace(), &keys::chapter_clarifications(ch.chapter), body)
                    .await?
            }
        };
        ch.mark_clarified(record_ref)
    }

    /// Run the drafting delegate on `ch` and raise a draft review; not committed
    async fn draft_into(
        &self,
        session: &SessionHandle,
        ch: &mut ChapterState,
        feedback: Option<String>,
    ) -> Result<ContinuationToken, WorkflowError> {
        ch.ensure_can_enter(SubStage::Drafted)?;
        let chapter = ch.chapter;
        let namespace = ch.namespace();

        let mut ctx = TaskContext::new(
            &session.id,
            session
                .artifacts
                .view(&[BOOK_NAMESPACE.to_string(), namespace.clone()])
                .await,
        );
        ctx.chapter = Some(chapter);
        ctx.feedback = feedback;
        ctx.turn = ch.revision + 1;

        let result = self.dispatcher.dispatch(TaskKind::Drafting.as_str(), &ctx).await?;
        let draft_key = keys::chapter_draft(chapter);
        let draft_ref = self
            .merge_and_save(session, &namespace, result.writes)
            .await?
            .into_iter()
            .find(|r| r.key == draft_key)
            .ok_or_else(|| WorkflowError::DelegateFailed {
                task: TaskKind::Drafting.to_string(),
                attempts: 1,
                reason: format!("no {} was written", draft_key),
                retryable: true,
            })?;
        ch.record_draft(draft_ref)?;
        Ok(raise_draft_review(ch, &session.id))
    }

    /// Draft after clarification; a failure is recorded on the chapter, not returned
    async fn auto_draft(&self, session: &SessionHandle, guard: &mut ChapterState) {
        let mut ch = guard.clone();
        let outcome = match self.draft_into(session, &mut ch, None).await {
            Ok(_) => self.commit_chapter(session, guard, ch).await,
            Err(err) => {
                warn!(session_id = %session.id, chapter = guard.chapter, error = %err, "auto_draft: drafting failed");
                let mut failed = guard.clone();
                failed.last_error = Some(err.to_string());
                self.commit_chapter(session, guard, failed).await
            }
        };
        if let Err(e) = outcome {
            warn!(session_id = %session.id, chapter = guard.chapter, error = %e, "auto_draft: could not save chapter");
        }
    }
}

fn set_pending(ch: &mut ChapterState, disposition: Disposition) {
    for request in ch.clarifications.iter_mut().filter(|r| r.is_pending()) {
        request.disposition = disposition.clone();
    }
}

fn advisory_notes(result: &GapAnalysisResult) -> Vec<String> {
    result
        .novel_topics
        .iter()
        .map(|topic| format!("You also talked about \"{}\", which is not in the plan", topic))
        .collect()
}

fn raise_draft_review(ch: &mut ChapterState, session_id: &str) -> ContinuationToken {
    let chapter = ch.chapter;
    hitl::raise(
        ch,
        session_id,
        InterruptPoint::DraftReview { chapter },
        vec![format!(
            "Review the draft of chapter {}: accept it, respond with changes, edit it, or abandon it.",
            chapter
        )],
        Vec::new(),
    )
}
