//! Orchestrator - the top-level sequencer
//!
//! Every operation follows the same shape: check the explicit stage, call a
//! collaborator if needed, write artifacts, then commit the state change by
//! saving it and only afterwards replacing the in-memory copy. A failed call
//! leaves both the persisted and the live state as they were.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::session::SessionHandle;
use super::status::{ArtifactSummary, StatusSnapshot};
use crate::artifacts::{ArtifactRef, BOOK_NAMESPACE, keys};
use crate::config::WorkflowConfig;
use crate::delegates::{Dispatcher, TaskContext, TaskKind, TaskOutcome};
use crate::domain::{
    BookPlan, ChapterId, ChapterState, ContinuationToken, Decision, InterruptPoint, Stage, SubStage, TokenStatus,
    WorkflowState, chapter_namespace,
};
use crate::error::WorkflowError;
use crate::gap::GapAnalyzer;
use crate::hitl::{self, TokenLookup};
use crate::state::{StateStore, validate_session_id};

/// Result of one `advance` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdvanceOutcome {
    /// The delegate needs answers; `token` is set when a review decision is required
    Questions { questions: Vec<String>, token: Option<String> },
    /// The stage finished and produced these artifacts
    Artifacts { artifacts: Vec<ArtifactSummary> },
    /// Nothing to converse about at this stage
    Status { status: StatusSnapshot },
}

pub struct Orchestrator {
    pub(super) config: WorkflowConfig,
    pub(super) store: Arc<dyn StateStore>,
    pub(super) dispatcher: Arc<Dispatcher>,
    pub(super) analyzer: GapAnalyzer,
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
}

impl Orchestrator {
    pub fn new(
        config: WorkflowConfig,
        store: Arc<dyn StateStore>,
        dispatcher: Arc<Dispatcher>,
        analyzer: GapAnalyzer,
    ) -> Self {
        debug!(?config, "Orchestrator::new: called");
        Self {
            config,
            store,
            dispatcher,
            analyzer,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Live handle for a session, loading it from the store if needed
    pub(super) async fn session(&self, session_id: &str) -> Result<Arc<SessionHandle>, WorkflowError> {
        if let Some(handle) = self.sessions.read().await.get(session_id) {
            return Ok(handle.clone());
        }
        let persisted = self
            .store
            .load(session_id)
            .await?
            .ok_or_else(|| WorkflowError::SessionNotFound {
                session_id: session_id.to_string(),
            })?;
        debug!(%session_id, "Orchestrator::session: loaded from store");
        let handle = Arc::new(SessionHandle::from_persisted(persisted).await);
        let mut sessions = self.sessions.write().await;
        Ok(sessions.entry(session_id.to_string()).or_insert(handle).clone())
    }

    /// Open a session, creating it on first use
    pub async fn start_or_resume_session(&self, session_id: &str) -> Result<StatusSnapshot, WorkflowError> {
        debug!(%session_id, "Orchestrator::start_or_resume_session: called");
        validate_session_id(session_id)?;
        match self.session(session_id).await {
            Ok(handle) => {
                info!(%session_id, "session resumed");
                return Ok(self.snapshot(&handle).await);
            }
            Err(WorkflowError::SessionNotFound { .. }) => {}
            Err(e) => return Err(e),
        }

        let handle = {
            let mut sessions = self.sessions.write().await;
            match sessions.get(session_id) {
                Some(handle) => handle.clone(),
                None => {
                    let workflow = WorkflowState::new(session_id);
                    self.store.save_workflow(&workflow).await?;
                    let handle = Arc::new(SessionHandle::new(workflow));
                    sessions.insert(session_id.to_string(), handle.clone());
                    info!(%session_id, "session started");
                    handle
                }
            }
        };
        Ok(self.snapshot(&handle).await)
    }

    pub async fn current_status(&self, session_id: &str) -> Result<StatusSnapshot, WorkflowError> {
        debug!(%session_id, "Orchestrator::current_status: called");
        let session = self.session(session_id).await?;
        Ok(self.snapshot(&session).await)
    }

    pub async fn list_sessions(&self) -> Result<Vec<String>, WorkflowError> {
        Ok(self.store.list_sessions().await?)
    }

    /// Feed the author's message to the current stage's delegate
    pub async fn advance(&self, session_id: &str, user_input: Option<String>) -> Result<AdvanceOutcome, WorkflowError> {
        debug!(%session_id, has_input = user_input.is_some(), "Orchestrator::advance: called");
        let session = self.session(session_id).await?;
        let mut wf = session.workflow.lock().await;
        if let Some(token) = &wf.pending {
            return Err(WorkflowError::AwaitingDecision { token: token.id.clone() });
        }

        let mut next = wf.clone();
        if next.stage == Stage::Welcome {
            next.transition(Stage::Profiling)?;
        }
        let stage = next.stage;
        let Some(kind) = stage.delegate() else {
            if next != *wf {
                self.commit_workflow(&mut wf, next).await?;
            }
            return Ok(AdvanceOutcome::Status {
                status: self.snapshot_with(&session, &wf).await,
            });
        };

        let turn = next.turns + 1;
        let mut ctx = TaskContext::new(session_id, session.artifacts.view(&[BOOK_NAMESPACE.to_string()]).await);
        ctx.user_input = user_input;
        ctx.open_questions = next.open_questions.clone();
        ctx.turn = turn;
        ctx.final_turn = turn >= self.config.max_turns;

        let result = match self.dispatcher.dispatch(kind.as_str(), &ctx).await {
            Ok(result) => result,
            Err(e) => {
                let err = WorkflowError::from(e);
                warn!(%session_id, %stage, error = %err, "advance: delegate failed");
                next.last_error = Some(err.to_string());
                next.touch();
                self.commit_workflow(&mut wf, next).await?;
                return Err(err);
            }
        };

        let sizes: BTreeMap<String, usize> = result.writes.iter().map(|(k, v)| (k.clone(), v.len())).collect();
        let refs = self.merge_and_save(&session, BOOK_NAMESPACE, result.writes).await?;
        next.turns = turn;
        next.last_error = None;
        next.touch();

        match result.outcome {
            TaskOutcome::NeedsInput { questions } => {
                next.open_questions = questions.clone();
                self.commit_workflow(&mut wf, next).await?;
                Ok(AdvanceOutcome::Questions { questions, token: None })
            }
            TaskOutcome::Complete => {
                next.open_questions.clear();
                if self.config.reviews(stage) {
                    let token = raise_stage_review(&mut next, stage, kind);
                    self.commit_workflow(&mut wf, next).await?;
                    return Ok(AdvanceOutcome::Questions {
                        questions: token.questions,
                        token: Some(token.id),
                    });
                }
                self.complete_stage(&session, &mut next).await?;
                self.commit_workflow(&mut wf, next).await?;
                let artifacts = refs
                    .iter()
                    .filter(|r| !r.key.ends_with("_notes"))
                    .map(|r| ArtifactSummary::new(r, sizes.get(&r.key).copied().unwrap_or(0)))
                    .collect();
                Ok(AdvanceOutcome::Artifacts { artifacts })
            }
        }
    }

    /// Explicitly move the session to `target`
    ///
    /// Moving to the next stage runs the same completion work as an accepted
    /// review (chapter creation after planning, the all-chapters check before
    /// `complete`). Re-affirming a completed stage is a no-op.
    pub async fn transition(&self, session_id: &str, target: Stage) -> Result<StatusSnapshot, WorkflowError> {
        debug!(%session_id, %target, "Orchestrator::transition: called");
        let session = self.session(session_id).await?;
        let mut wf = session.workflow.lock().await;
        if let Some(token) = &wf.pending {
            return Err(WorkflowError::AwaitingDecision { token: token.id.clone() });
        }

        let mut next = wf.clone();
        if wf.stage.next() == Some(target) {
            self.complete_stage(&session, &mut next).await?;
        } else if !next.transition(target)? {
            return Ok(self.snapshot_with(&session, &wf).await);
        }
        self.commit_workflow(&mut wf, next).await?;
        Ok(self.snapshot_with(&session, &wf).await)
    }

    /// Move the session back to an earlier stage, keeping all artifacts
    pub async fn rollback(&self, session_id: &str, target: Stage) -> Result<StatusSnapshot, WorkflowError> {
        debug!(%session_id, %target, "Orchestrator::rollback: called");
        let session = self.session(session_id).await?;
        let mut wf = session.workflow.lock().await;
        let mut next = wf.clone();
        next.rollback(target)?;
        self.commit_workflow(&mut wf, next).await?;
        Ok(self.snapshot_with(&session, &wf).await)
    }

    /// Resume any pending token with a decision
    ///
    /// Stage reviews live on the workflow; clarifications and draft reviews
    /// on their chapter. A token that is unknown or already consumed is
    /// rejected with `InvalidContinuation`.
    pub async fn resume_clarification(
        &self,
        session_id: &str,
        token_id: &str,
        decision: Decision,
    ) -> Result<StatusSnapshot, WorkflowError> {
        debug!(%session_id, %token_id, ?decision, "Orchestrator::resume_clarification: called");
        let session = self.session(session_id).await?;

        {
            let mut wf = session.workflow.lock().await;
            match hitl::lookup(&*wf, token_id) {
                TokenLookup::Pending(token) => {
                    self.resume_stage_review(&session, &mut wf, token, decision).await?;
                    return Ok(self.snapshot_with(&session, &wf).await);
                }
                found @ TokenLookup::Consumed(_) => return Err(hitl::invalid(token_id, &found)),
                TokenLookup::Unknown => {}
            }
        }

        // Only the owning chapter is locked; other chapters may be busy
        let Some(chapter) = session.token_owner(token_id).await else {
            return Err(hitl::invalid(token_id, &TokenLookup::Unknown));
        };
        let handle = session.chapter(chapter).await?;
        let mut guard = handle.lock().await;
        let token = match hitl::lookup(&*guard, token_id) {
            TokenLookup::Pending(token) => token,
            found => return Err(hitl::invalid(token_id, &found)),
        };
        match token.point {
            InterruptPoint::Clarification { .. } => {
                self.resume_clarification_point(&session, &mut guard, token, decision)
                    .await?
            }
            InterruptPoint::DraftReview { .. } => self.resume_draft_review(&session, &mut guard, token, decision).await?,
            InterruptPoint::StageReview { .. } => return Err(hitl::invalid(token_id, &TokenLookup::Unknown)),
        }
        let finished = guard.is_complete();
        drop(guard);
        if finished {
            self.maybe_finish_book(&session).await?;
        }
        Ok(self.snapshot(&session).await)
    }

    async fn resume_stage_review(
        &self,
        session: &SessionHandle,
        wf: &mut WorkflowState,
        token: ContinuationToken,
        decision: Decision,
    ) -> Result<(), WorkflowError> {
        let stage = match token.point {
            InterruptPoint::StageReview { stage } => stage,
            _ => return Err(hitl::invalid(&token.id, &TokenLookup::Unknown)),
        };
        let Some(kind) = stage.delegate() else {
            return Err(hitl::invalid(&token.id, &TokenLookup::Unknown));
        };
        info!(session_id = %session.id, %stage, decision = %decision.status(), "stage review decision");

        let mut next = wf.clone();
        match decision {
            Decision::Accept => {
                hitl::consume(&mut next, &token.id, TokenStatus::Accepted)?;
                self.complete_stage(session, &mut next).await?;
            }
            Decision::Respond { text } => {
                let turn = next.turns + 1;
                let mut ctx = TaskContext::new(&session.id, session.artifacts.view(&[BOOK_NAMESPACE.to_string()]).await);
                ctx.feedback = Some(text);
                ctx.turn = turn;
                ctx.final_turn = true;

                let result = match self.dispatcher.dispatch(kind.as_str(), &ctx).await {
                    Ok(result) if result.is_complete() => result,
                    Ok(_) => {
                        return Err(WorkflowError::DelegateFailed {
                            task: kind.to_string(),
                            attempts: 1,
                            reason: "revision did not produce a result".to_string(),
                            retryable: true,
                        });
                    }
                    Err(e) => {
                        let err = WorkflowError::from(e);
                        let mut failed = wf.clone();
                        failed.last_error = Some(err.to_string());
                        self.commit_workflow(wf, failed).await?;
                        return Err(err);
                    }
                };
                self.merge_and_save(session, BOOK_NAMESPACE, result.writes).await?;
                next.turns = turn;
                hitl::consume(&mut next, &token.id, TokenStatus::Responded)?;
                raise_stage_review(&mut next, stage, kind);
            }
            Decision::Edit { key, content } => {
                if Some(key.as_str()) != kind.output_key() {
                    return Err(WorkflowError::InvalidDecision {
                        token: token.id.clone(),
                        reason: format!("only {} can be edited at this review", kind.output_key().unwrap_or("-")),
                    });
                }
                if stage == Stage::Planning {
                    BookPlan::parse(&content).map_err(|reason| WorkflowError::InvalidDecision {
                        token: token.id.clone(),
                        reason,
                    })?;
                }
                self.put_and_save(session, BOOK_NAMESPACE, &key, content).await?;
                hitl::consume(&mut next, &token.id, TokenStatus::Edited)?;
                self.complete_stage(session, &mut next).await?;
            }
            Decision::Abandon => {
                hitl::consume(&mut next, &token.id, TokenStatus::Abandoned)?;
                next.turns = 0;
                next.open_questions.clear();
            }
        }
        next.last_error = None;
        next.touch();
        self.commit_workflow(wf, next).await
    }

    /// Complete the current stage and enter the next one, without saving
    pub(super) async fn complete_stage(
        &self,
        session: &SessionHandle,
        next: &mut WorkflowState,
    ) -> Result<(), WorkflowError> {
        let stage = next.stage;
        let Some(target) = stage.next() else {
            return Ok(());
        };
        debug!(session_id = %session.id, %stage, %target, "Orchestrator::complete_stage: called");

        if let Some(key) = stage.delegate().and_then(TaskKind::output_key) {
            session.artifacts.get(BOOK_NAMESPACE, key).await?;
        }
        match stage {
            Stage::Planning => self.create_chapters(session).await?,
            Stage::ChapterLoop => {
                let chapters: Vec<ChapterState> = session
                    .chapter_states()
                    .await
                    .into_iter()
                    .filter(|ch| !ch.superseded)
                    .collect();
                if chapters.is_empty() || !chapters.iter().all(ChapterState::is_complete) {
                    return Err(WorkflowError::PrerequisiteNotMet {
                        target,
                        missing: vec![Stage::ChapterLoop],
                    });
                }
                next.active_chapter = None;
            }
            _ => {}
        }
        next.transition(target)?;
        Ok(())
    }

    /// Create chapter states from the accepted book plan
    ///
    /// Chapters that already progressed past `planned` keep their state; a
    /// chapter still at `planned` takes the new title and plan. Chapters the
    /// plan no longer lists are superseded: they keep their artifacts but no
    /// longer count towards finishing the book.
    async fn create_chapters(&self, session: &SessionHandle) -> Result<(), WorkflowError> {
        let text = session.artifacts.get(BOOK_NAMESPACE, keys::BOOK_PLAN).await?;
        let plan = BookPlan::parse(&text).map_err(|reason| WorkflowError::DelegateFailed {
            task: TaskKind::Planning.to_string(),
            attempts: 0,
            reason,
            retryable: false,
        })?;

        let listed: BTreeSet<ChapterId> = plan.chapters.iter().map(|c| c.chapter_number).collect();
        for mut dropped in session.chapter_states().await {
            if listed.contains(&dropped.chapter) || dropped.superseded {
                continue;
            }
            dropped.supersede();
            self.store.save_chapter(&session.id, &dropped).await?;
            session.insert_chapter(dropped).await;
        }

        for chapter_plan in plan.chapters {
            let chapter = chapter_plan.chapter_number;
            if let Ok(mut existing) = session.published(chapter).await {
                if existing.sub_stage != SubStage::Planned {
                    debug!(chapter, "create_chapters: keeping chapter in progress");
                    if existing.superseded {
                        existing.superseded = false;
                        self.store.save_chapter(&session.id, &existing).await?;
                        session.insert_chapter(existing).await;
                    }
                    continue;
                }
            }

            let namespace = chapter_namespace(chapter);
            let plan_ref = self
                .put_and_save(session, &namespace, &keys::chapter_plan(chapter), chapter_plan.to_json())
                .await?;
            let state = ChapterState::new(chapter, chapter_plan.title, plan_ref);
            self.store.save_chapter(&session.id, &state).await?;
            session.insert_chapter(state).await;
            info!(session_id = %session.id, chapter, "chapter planned");
        }
        Ok(())
    }

    /// Move the book to `complete` once every chapter is complete
    pub(super) async fn maybe_finish_book(&self, session: &SessionHandle) -> Result<(), WorkflowError> {
        let mut wf = session.workflow.lock().await;
        if wf.stage != Stage::ChapterLoop || wf.pending.is_some() {
            return Ok(());
        }
        let mut next = wf.clone();
        match self.complete_stage(session, &mut next).await {
            Ok(()) => {
                info!(session_id = %session.id, "book complete");
                self.commit_workflow(&mut wf, next).await
            }
            Err(WorkflowError::PrerequisiteNotMet { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub(super) async fn snapshot(&self, session: &SessionHandle) -> StatusSnapshot {
        let wf = session.workflow.lock().await;
        self.snapshot_with(session, &wf).await
    }

    /// Snapshot while the caller already holds the workflow lock
    pub(super) async fn snapshot_with(&self, session: &SessionHandle, wf: &WorkflowState) -> StatusSnapshot {
        let chapters = session.chapter_states().await;
        StatusSnapshot::build(wf, &chapters)
    }

    pub(super) async fn commit_workflow(&self, slot: &mut WorkflowState, next: WorkflowState) -> Result<(), WorkflowError> {
        self.store.save_workflow(&next).await?;
        *slot = next;
        Ok(())
    }

    pub(super) async fn commit_chapter(
        &self,
        session: &SessionHandle,
        slot: &mut ChapterState,
        next: ChapterState,
    ) -> Result<(), WorkflowError> {
        self.store.save_chapter(&session.id, &next).await?;
        session.publish(&next).await;
        *slot = next;
        Ok(())
    }

    async fn save_namespace(&self, session: &SessionHandle, namespace: &str) -> Result<(), WorkflowError> {
        let snapshot = session.artifacts.snapshot(namespace).await;
        self.store.save_artifacts(&session.id, namespace, &snapshot).await?;
        Ok(())
    }

    pub(super) async fn put_and_save(
        &self,
        session: &SessionHandle,
        namespace: &str,
        key: &str,
        content: impl Into<String>,
    ) -> Result<ArtifactRef, WorkflowError> {
        let reference = session.artifacts.put(namespace, key, content).await;
        self.save_namespace(session, namespace).await?;
        Ok(reference)
    }

    pub(super) async fn merge_and_save(
        &self,
        session: &SessionHandle,
        namespace: &str,
        writes: BTreeMap<String, String>,
    ) -> Result<Vec<ArtifactRef>, WorkflowError> {
        if writes.is_empty() {
            return Ok(Vec::new());
        }
        let refs = session.artifacts.merge(namespace, writes).await;
        self.save_namespace(session, namespace).await?;
        Ok(refs)
    }
}

fn raise_stage_review(wf: &mut WorkflowState, stage: Stage, kind: TaskKind) -> ContinuationToken {
    let session_id = wf.session_id.clone();
    let output = kind.output_key().unwrap_or(kind.as_str());
    hitl::raise(
        wf,
        &session_id,
        InterruptPoint::StageReview { stage },
        vec![format!(
            "Review the {} and accept it, respond with changes, edit it, or abandon it.",
            output
        )],
        Vec::new(),
    )
}
