//! Integration tests for Talk2Publish
//!
//! These drive the orchestrator end to end with scripted delegates and
//! classifiers in place of the LLM.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use proptest::prelude::*;
use tempfile::TempDir;

use talk2publish::artifacts::keys;
use talk2publish::config::WorkflowConfig;
use talk2publish::delegates::{DelegateError, Dispatcher, TaskContext, TaskDelegate, TaskKind, TaskResult};
use talk2publish::domain::{Decision, InterruptPoint, Stage, SubStage, WorkflowState, chapter_namespace};
use talk2publish::error::{ErrorClass, WorkflowError};
use talk2publish::gap::{Classification, GapAnalyzer, GapError, KeywordClassifier, TopicClassifier};
use talk2publish::state::{JsonFileStore, MemoryStore, StateStore};
use talk2publish::workflow::{AdvanceOutcome, NextAction, Orchestrator, StatusSnapshot};

const PLAN: &str = r#"{
    "chapters": [
        {"chapter_number": 1, "title": "Getting paid", "key_topics": ["pricing", "onboarding", "support"], "learning_outcomes": ["price a service"]},
        {"chapter_number": 2, "title": "Keeping customers", "key_topics": ["retention"], "learning_outcomes": []}
    ]
}"#;

// =============================================================================
// Scripted collaborators
// =============================================================================

/// Asks one question on a bare first turn, then completes with `artifact`
struct ScriptedInterview {
    kind: TaskKind,
    artifact: String,
}

#[async_trait]
impl TaskDelegate for ScriptedInterview {
    fn kind(&self) -> TaskKind {
        self.kind
    }

    async fn run(&self, ctx: &TaskContext) -> Result<TaskResult, DelegateError> {
        let key = self.kind.output_key().unwrap_or("notes").to_string();
        if ctx.user_input.is_none() && ctx.feedback.is_none() && !ctx.final_turn {
            return Ok(TaskResult::needs_input(
                vec![format!("Tell me about your {}", self.kind)],
                BTreeMap::new(),
            ));
        }
        let mut writes = BTreeMap::new();
        writes.insert(key, self.artifact.clone());
        Ok(TaskResult::complete(writes))
    }
}

/// Writes the transcript back as the draft and counts calls
#[derive(Default)]
struct ScriptedWriter {
    calls: AtomicUsize,
}

#[async_trait]
impl TaskDelegate for ScriptedWriter {
    fn kind(&self) -> TaskKind {
        TaskKind::Drafting
    }

    async fn run(&self, ctx: &TaskContext) -> Result<TaskResult, DelegateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let chapter = ctx
            .chapter
            .ok_or_else(|| DelegateError::failed(TaskKind::Drafting, "no chapter", false))?;
        let transcript = ctx
            .artifacts
            .get(&keys::chapter_transcript(chapter))
            .unwrap_or_default()
            .to_string();
        let mut body = format!("# Chapter {}\n\n{}", chapter, transcript);
        if let Some(feedback) = &ctx.feedback {
            body.push_str(&format!("\n\n(revised: {})", feedback));
        }
        let mut writes = BTreeMap::new();
        writes.insert(keys::chapter_draft(chapter), body);
        Ok(TaskResult::complete(writes))
    }
}

/// Keyword coverage plus a fixed vocabulary of topics it can spot in text
struct VocabularyClassifier {
    vocabulary: Vec<String>,
}

#[async_trait]
impl TopicClassifier for VocabularyClassifier {
    async fn classify(&self, plan_topics: &[String], content: &str) -> Result<Classification, GapError> {
        let text = content.to_lowercase();
        let covered: Vec<String> = plan_topics
            .iter()
            .filter(|t| text.contains(&t.to_lowercase()))
            .cloned()
            .collect();
        let mut content_topics = covered.clone();
        content_topics.extend(self.vocabulary.iter().filter(|t| text.contains(t.as_str())).cloned());
        Ok(Classification {
            covered,
            content_topics,
        })
    }
}

/// Always unreachable
struct DownClassifier;

#[async_trait]
impl TopicClassifier for DownClassifier {
    async fn classify(&self, _plan_topics: &[String], _content: &str) -> Result<Classification, GapError> {
        Err(GapError::AnalysisUnavailable("connection refused".to_string()))
    }
}

/// Keyword coverage that takes its time on texts mentioning "slowly"
struct SlowClassifier {
    delay: Duration,
}

#[async_trait]
impl TopicClassifier for SlowClassifier {
    async fn classify(&self, plan_topics: &[String], content: &str) -> Result<Classification, GapError> {
        if content.contains("slowly") {
            tokio::time::sleep(self.delay).await;
        }
        KeywordClassifier.classify(plan_topics, content).await
    }
}

struct Harness {
    orchestrator: Arc<Orchestrator>,
    writer: Arc<ScriptedWriter>,
}

fn dispatcher(writer: Arc<ScriptedWriter>) -> Dispatcher {
    let mut dispatcher = Dispatcher::empty(0);
    dispatcher.register(Arc::new(ScriptedInterview {
        kind: TaskKind::Profiling,
        artifact: "Jane, a bookkeeper for small studios".to_string(),
    }));
    dispatcher.register(Arc::new(ScriptedInterview {
        kind: TaskKind::Persona,
        artifact: "First-time studio owners".to_string(),
    }));
    dispatcher.register(Arc::new(ScriptedInterview {
        kind: TaskKind::Planning,
        artifact: PLAN.to_string(),
    }));
    dispatcher.register(writer);
    dispatcher
}

fn harness_with(store: Arc<dyn StateStore>, config: WorkflowConfig, classifier: Arc<dyn TopicClassifier>) -> Harness {
    let writer = Arc::new(ScriptedWriter::default());
    let orchestrator = Orchestrator::new(
        config,
        store,
        Arc::new(dispatcher(writer.clone())),
        GapAnalyzer::new(classifier),
    );
    Harness {
        orchestrator: Arc::new(orchestrator),
        writer,
    }
}

fn harness(store: Arc<dyn StateStore>) -> Harness {
    harness_with(store, WorkflowConfig::default(), Arc::new(KeywordClassifier))
}

fn pending_token(status: &StatusSnapshot) -> String {
    status.pending.first().map(|p| p.token.clone()).expect("a pending token")
}

/// Drive a fresh session up to the chapter loop
async fn reach_chapter_loop(orchestrator: &Orchestrator, session: &str) {
    orchestrator.start_or_resume_session(session).await.unwrap();

    let outcome = orchestrator.advance(session, None).await.unwrap();
    assert!(matches!(outcome, AdvanceOutcome::Questions { token: None, .. }));

    for answer in ["I keep books for studios", "Studio owners"] {
        let outcome = orchestrator.advance(session, Some(answer.to_string())).await.unwrap();
        assert!(matches!(outcome, AdvanceOutcome::Artifacts { .. }));
    }

    let outcome = orchestrator
        .advance(session, Some("Two chapters please".to_string()))
        .await
        .unwrap();
    let token = match outcome {
        AdvanceOutcome::Questions { token: Some(token), .. } => token,
        other => panic!("expected a plan review, got {:?}", other),
    };

    let status = orchestrator
        .resume_clarification(session, &token, Decision::Accept)
        .await
        .unwrap();
    assert_eq!(status.stage, Stage::ChapterLoop);
}

// =============================================================================
// Workflow Tests
// =============================================================================

#[tokio::test]
async fn test_full_book_happy_path() {
    let h = harness(Arc::new(MemoryStore::new()));
    let o = &h.orchestrator;
    reach_chapter_loop(o, "book").await;

    let status = o.current_status("book").await.unwrap();
    assert_eq!(status.chapters.len(), 2);
    assert_eq!(status.next_action, NextAction::SubmitTranscript { chapter: 1 });

    // Chapter 1 misses "support"
    let gaps = o
        .submit_transcript("book", 1, "We covered pricing and onboarding at length.")
        .await
        .unwrap();
    assert_eq!(gaps.missing_topics.iter().collect::<Vec<_>>(), vec!["support"]);

    let status = o.current_status("book").await.unwrap();
    let token = pending_token(&status);
    assert_eq!(status.chapters[0].sub_stage, SubStage::GapsAnalyzed);
    assert_eq!(status.chapters[0].pending_clarifications, 1);
    assert_eq!(status.pending[0].point, InterruptPoint::Clarification { chapter: 1 });

    // Answering covers support; auto-draft runs and asks for review
    let status = o
        .resume_clarification("book", &token, Decision::Respond {
            text: "Support is email only, answered within a day.".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(status.chapters[0].sub_stage, SubStage::Drafted);
    assert_eq!(h.writer.calls.load(Ordering::SeqCst), 1);
    let draft_token = pending_token(&status);
    assert_eq!(status.pending[0].point, InterruptPoint::DraftReview { chapter: 1 });

    let status = o
        .resume_clarification("book", &draft_token, Decision::Accept)
        .await
        .unwrap();
    assert_eq!(status.chapters[0].sub_stage, SubStage::Complete);
    assert_eq!(status.stage, Stage::ChapterLoop);
    assert_eq!(status.next_action, NextAction::SubmitTranscript { chapter: 2 });

    // Chapter 2 has no gaps and goes straight to a draft
    let gaps = o
        .submit_transcript("book", 2, "Retention comes from showing up.")
        .await
        .unwrap();
    assert!(gaps.is_clear());
    let status = o.current_status("book").await.unwrap();
    assert_eq!(status.chapters[1].sub_stage, SubStage::Drafted);

    let status = o
        .resume_clarification("book", &pending_token(&status), Decision::Accept)
        .await
        .unwrap();
    assert_eq!(status.stage, Stage::Complete);
    assert_eq!(status.next_action, NextAction::Done);
    assert_eq!(
        status.completed_stages,
        vec![
            Stage::Welcome,
            Stage::Profiling,
            Stage::Audience,
            Stage::Planning,
            Stage::ChapterLoop
        ]
    );
}

#[tokio::test]
async fn test_transition_to_planning_on_fresh_session_fails() {
    let h = harness(Arc::new(MemoryStore::new()));
    h.orchestrator.start_or_resume_session("fresh").await.unwrap();

    let err = h.orchestrator.transition("fresh", Stage::Planning).await.unwrap_err();
    match &err {
        WorkflowError::PrerequisiteNotMet { target, missing } => {
            assert_eq!(*target, Stage::Planning);
            assert!(missing.contains(&Stage::Profiling));
            assert!(missing.contains(&Stage::Audience));
        }
        other => panic!("expected PrerequisiteNotMet, got {:?}", other),
    }
    assert_eq!(err.class(), ErrorClass::Prerequisite);

    let status = h.orchestrator.current_status("fresh").await.unwrap();
    assert_eq!(status.stage, Stage::Welcome);
    assert!(status.completed_stages.is_empty());
}

#[tokio::test]
async fn test_transcript_before_chapter_loop_fails() {
    let h = harness(Arc::new(MemoryStore::new()));
    h.orchestrator.start_or_resume_session("early").await.unwrap();

    let err = h.orchestrator.submit_transcript("early", 1, "hello").await.unwrap_err();
    assert!(matches!(err, WorkflowError::PrerequisiteNotMet { .. }));
}

#[tokio::test]
async fn test_unknown_session() {
    let h = harness(Arc::new(MemoryStore::new()));
    let err = h.orchestrator.current_status("nobody").await.unwrap_err();
    assert!(matches!(err, WorkflowError::SessionNotFound { .. }));
}

#[tokio::test]
async fn test_pending_clarification_blocks_clarified() {
    let h = harness(Arc::new(MemoryStore::new()));
    let o = &h.orchestrator;
    reach_chapter_loop(o, "stuck").await;

    o.submit_transcript("stuck", 1, "Only pricing today.").await.unwrap();
    let status = o.current_status("stuck").await.unwrap();
    assert_eq!(status.chapters[0].sub_stage, SubStage::GapsAnalyzed);
    assert_eq!(status.chapters[0].pending_clarifications, 2);

    // Drafting needs clarified; the open questions keep it in gaps_analyzed
    let err = o.draft_chapter("stuck", 1, None).await.unwrap_err();
    assert!(matches!(err, WorkflowError::AwaitingDecision { .. }));

    // A partial answer leaves the uncovered topic open under a new token
    let first = pending_token(&status);
    let status = o
        .resume_clarification("stuck", &first, Decision::Respond {
            text: "Onboarding is a single call.".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(status.chapters[0].sub_stage, SubStage::GapsAnalyzed);
    assert_eq!(status.chapters[0].pending_clarifications, 1);
    let second = pending_token(&status);
    assert_ne!(first, second);
    assert!(status.pending[0].questions[0].contains("support"));

    let status = o
        .resume_clarification("stuck", &second, Decision::Respond {
            text: "Support is by email.".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(status.chapters[0].pending_clarifications, 0);
    assert_eq!(status.chapters[0].sub_stage, SubStage::Drafted);
}

#[tokio::test]
async fn test_novel_topics_are_advisory() {
    let classifier = Arc::new(VocabularyClassifier {
        vocabulary: vec!["refunds".to_string()],
    });
    let h = harness_with(Arc::new(MemoryStore::new()), WorkflowConfig::default(), classifier);
    let o = &h.orchestrator;
    reach_chapter_loop(o, "novel").await;

    let gaps = o
        .submit_transcript("novel", 1, "pricing, onboarding and refunds")
        .await
        .unwrap();
    assert_eq!(gaps.missing_topics.iter().collect::<Vec<_>>(), vec!["support"]);
    assert_eq!(gaps.novel_topics.iter().collect::<Vec<_>>(), vec!["refunds"]);

    let status = o.current_status("novel").await.unwrap();
    assert_eq!(status.pending[0].questions.len(), 1);
    assert!(status.pending[0].advisory[0].contains("refunds"));
}

#[tokio::test]
async fn test_stage_review_accept_advances_exactly_once() {
    let h = harness(Arc::new(MemoryStore::new()));
    let o = &h.orchestrator;
    o.start_or_resume_session("review").await.unwrap();
    o.advance("review", Some("about me".to_string())).await.unwrap();
    o.advance("review", Some("readers".to_string())).await.unwrap();
    let outcome = o.advance("review", Some("plan it".to_string())).await.unwrap();
    let token = match outcome {
        AdvanceOutcome::Questions { token: Some(token), .. } => token,
        other => panic!("expected review, got {:?}", other),
    };

    // While the review is pending, advancing is refused
    let err = o.advance("review", Some("more".to_string())).await.unwrap_err();
    assert!(matches!(err, WorkflowError::AwaitingDecision { .. }));

    let status = o.resume_clarification("review", &token, Decision::Accept).await.unwrap();
    assert_eq!(status.stage, Stage::ChapterLoop);
    let planning_count = status.completed_stages.iter().filter(|s| **s == Stage::Planning).count();
    assert_eq!(planning_count, 1);

    let err = o
        .resume_clarification("review", &token, Decision::Accept)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidContinuation { .. }));
    assert_eq!(err.class(), ErrorClass::Continuation);

    let again = o.current_status("review").await.unwrap();
    assert_eq!(again.stage, Stage::ChapterLoop);
    assert_eq!(again.completed_stages, status.completed_stages);
}

#[tokio::test]
async fn test_clarification_accept_without_auto_draft() {
    let config = WorkflowConfig {
        auto_draft: false,
        ..WorkflowConfig::default()
    };
    let h = harness_with(Arc::new(MemoryStore::new()), config, Arc::new(KeywordClassifier));
    let o = &h.orchestrator;
    reach_chapter_loop(o, "manual").await;

    o.submit_transcript("manual", 1, "pricing only").await.unwrap();
    let token = pending_token(&o.current_status("manual").await.unwrap());

    let status = o.resume_clarification("manual", &token, Decision::Accept).await.unwrap();
    assert_eq!(status.chapters[0].sub_stage, SubStage::Clarified);
    assert_eq!(status.next_action, NextAction::Draft { chapter: 1 });
    assert_eq!(h.writer.calls.load(Ordering::SeqCst), 0);

    let status = o.draft_chapter("manual", 1, Some("keep it short".to_string())).await.unwrap();
    assert_eq!(status.chapters[0].sub_stage, SubStage::Drafted);
    assert_eq!(status.chapters[0].revision, 1);
}

#[tokio::test]
async fn test_draft_review_respond_redrafts() {
    let h = harness(Arc::new(MemoryStore::new()));
    let o = &h.orchestrator;
    reach_chapter_loop(o, "redraft").await;

    o.submit_transcript("redraft", 2, "retention matters").await.unwrap();
    let token = pending_token(&o.current_status("redraft").await.unwrap());

    let status = o
        .resume_clarification("redraft", &token, Decision::Respond {
            text: "add an example".to_string(),
        })
        .await
        .unwrap();
    let chapter = &status.chapters[1];
    assert_eq!(chapter.sub_stage, SubStage::Drafted);
    assert_eq!(chapter.revision, 2);
    assert_eq!(h.writer.calls.load(Ordering::SeqCst), 2);
    assert_ne!(pending_token(&status), token);
}

#[tokio::test]
async fn test_abandon_then_redo() {
    let h = harness(Arc::new(MemoryStore::new()));
    let o = &h.orchestrator;
    reach_chapter_loop(o, "abandon").await;

    o.submit_transcript("abandon", 1, "pricing").await.unwrap();
    let token = pending_token(&o.current_status("abandon").await.unwrap());
    let status = o
        .resume_clarification("abandon", &token, Decision::Abandon)
        .await
        .unwrap();
    assert!(status.chapters[0].redo_required);
    assert_eq!(status.next_action, NextAction::Redo { chapter: 1 });

    let err = o.submit_transcript("abandon", 1, "pricing again").await.unwrap_err();
    assert!(matches!(err, WorkflowError::RedoRequired { chapter: 1 }));

    let status = o.redo_chapter("abandon", 1, SubStage::Planned).await.unwrap();
    assert_eq!(status.chapters[0].sub_stage, SubStage::Planned);
    assert!(!status.chapters[0].redo_required);

    o.submit_transcript("abandon", 1, "pricing onboarding support").await.unwrap();
    let status = o.current_status("abandon").await.unwrap();
    assert_eq!(status.chapters[0].sub_stage, SubStage::Drafted);
}

#[tokio::test]
async fn test_redo_to_gaps_analyzed_reopens_requests() {
    let h = harness(Arc::new(MemoryStore::new()));
    let o = &h.orchestrator;
    reach_chapter_loop(o, "reopen").await;

    o.submit_transcript("reopen", 1, "pricing and onboarding").await.unwrap();
    let first = pending_token(&o.current_status("reopen").await.unwrap());
    let status = o
        .resume_clarification("reopen", &first, Decision::Respond {
            text: "Support is by email.".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(status.chapters[0].sub_stage, SubStage::Drafted);
    let review = pending_token(&status);

    let status = o.redo_chapter("reopen", 1, SubStage::GapsAnalyzed).await.unwrap();
    assert_eq!(status.chapters[0].sub_stage, SubStage::GapsAnalyzed);
    assert_eq!(status.chapters[0].pending_clarifications, 1);
    assert_eq!(status.pending.len(), 1);
    assert_eq!(status.pending[0].point, InterruptPoint::Clarification { chapter: 1 });
    assert!(status.pending[0].questions[0].contains("support"));
    let reopened = pending_token(&status);
    assert_ne!(reopened, first);
    assert_ne!(reopened, review);

    // The draft review pending at redo time is gone for good
    let err = o
        .resume_clarification("reopen", &review, Decision::Accept)
        .await
        .unwrap_err();
    match &err {
        WorkflowError::InvalidContinuation { reason, .. } => assert!(reason.contains("superseded")),
        other => panic!("expected InvalidContinuation, got {:?}", other),
    }

    let status = o
        .resume_clarification("reopen", &reopened, Decision::Respond {
            text: "Support is by email and phone.".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(status.chapters[0].sub_stage, SubStage::Drafted);
}

#[tokio::test]
async fn test_redo_to_gaps_analyzed_without_requests_clarifies() {
    let h = harness(Arc::new(MemoryStore::new()));
    let o = &h.orchestrator;
    reach_chapter_loop(o, "clear").await;

    let gaps = o.submit_transcript("clear", 2, "retention is everything").await.unwrap();
    assert!(gaps.is_clear());
    let status = o.current_status("clear").await.unwrap();
    assert_eq!(status.chapters[1].sub_stage, SubStage::Drafted);
    let review = pending_token(&status);

    let status = o.redo_chapter("clear", 2, SubStage::GapsAnalyzed).await.unwrap();
    assert_eq!(status.chapters[1].sub_stage, SubStage::Clarified);
    assert_eq!(status.chapters[1].pending_clarifications, 0);
    assert!(status.pending.is_empty());
    assert_eq!(status.next_action, NextAction::Draft { chapter: 2 });

    let err = o.resume_clarification("clear", &review, Decision::Accept).await.unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidContinuation { .. }));
}

#[tokio::test]
async fn test_redo_finished_chapter_reopens_book() {
    let h = harness(Arc::new(MemoryStore::new()));
    let o = &h.orchestrator;
    reach_chapter_loop(o, "reopen-book").await;

    for (chapter, text) in [(1, "pricing onboarding support"), (2, "retention")] {
        o.submit_transcript("reopen-book", chapter, text).await.unwrap();
        let token = pending_token(&o.current_status("reopen-book").await.unwrap());
        o.resume_clarification("reopen-book", &token, Decision::Accept).await.unwrap();
    }
    let status = o.current_status("reopen-book").await.unwrap();
    assert_eq!(status.stage, Stage::Complete);
    let drafts_before = h.writer.calls.load(Ordering::SeqCst);

    let status = o.redo_chapter("reopen-book", 1, SubStage::Drafted).await.unwrap();
    assert_eq!(status.stage, Stage::ChapterLoop);
    assert_eq!(status.active_chapter, Some(1));
    assert!(!status.completed_stages.contains(&Stage::ChapterLoop));
    assert_eq!(status.chapters[0].sub_stage, SubStage::Drafted);
    assert_eq!(status.pending[0].point, InterruptPoint::DraftReview { chapter: 1 });
    // The existing draft is reviewed again, not rewritten
    assert_eq!(h.writer.calls.load(Ordering::SeqCst), drafts_before);

    let status = o
        .resume_clarification("reopen-book", &pending_token(&status), Decision::Accept)
        .await
        .unwrap();
    assert_eq!(status.chapters[0].sub_stage, SubStage::Complete);
    assert_eq!(status.stage, Stage::Complete);
    assert_eq!(status.next_action, NextAction::Done);
}

#[tokio::test]
async fn test_analysis_outage_keeps_transcript() {
    let store = Arc::new(MemoryStore::new());
    let h = harness_with(store.clone(), WorkflowConfig::default(), Arc::new(DownClassifier));
    let o = &h.orchestrator;
    reach_chapter_loop(o, "outage").await;

    let err = o.submit_transcript("outage", 1, "pricing").await.unwrap_err();
    assert!(matches!(err, WorkflowError::AnalysisUnavailable { chapter: 1, .. }));
    assert!(err.is_retryable());
    assert_eq!(err.remediation(), "resubmit transcript for chapter 1");

    let status = o.current_status("outage").await.unwrap();
    assert_eq!(status.chapters[0].sub_stage, SubStage::TranscriptReceived);
    assert!(status.chapters[0].last_error.is_some());
    assert!(status.pending.is_empty());

    let persisted = store.load("outage").await.unwrap().unwrap();
    let namespace = persisted.artifacts.get(&chapter_namespace(1)).unwrap();
    assert!(namespace.artifacts.contains_key(&keys::chapter_transcript(1)));
}

#[tokio::test]
async fn test_rollback_to_audience_keeps_artifacts() {
    let store = Arc::new(MemoryStore::new());
    let h = harness(store.clone());
    let o = &h.orchestrator;
    reach_chapter_loop(o, "back").await;

    let status = o.rollback("back", Stage::Audience).await.unwrap();
    assert_eq!(status.stage, Stage::Audience);
    assert_eq!(status.completed_stages, vec![Stage::Welcome, Stage::Profiling]);
    assert!(status.active_chapter.is_none());

    let persisted = store.load("back").await.unwrap().unwrap();
    let book = persisted.artifacts.get("book").unwrap();
    assert!(book.artifacts.contains_key(keys::BOOK_PLAN));
}

#[tokio::test]
async fn test_replanning_with_fewer_chapters_drops_the_rest() {
    let store = Arc::new(MemoryStore::new());
    let h = harness(store.clone());
    let o = &h.orchestrator;
    reach_chapter_loop(o, "replan").await;

    o.rollback("replan", Stage::Planning).await.unwrap();
    let outcome = o.advance("replan", Some("just one chapter".to_string())).await.unwrap();
    let token = match outcome {
        AdvanceOutcome::Questions { token: Some(token), .. } => token,
        other => panic!("expected a plan review, got {:?}", other),
    };
    let one_chapter = r#"{"chapters": [{"chapter_number": 1, "title": "Only", "key_topics": ["pricing"], "learning_outcomes": []}]}"#;
    let status = o
        .resume_clarification("replan", &token, Decision::Edit {
            key: keys::BOOK_PLAN.to_string(),
            content: one_chapter.to_string(),
        })
        .await
        .unwrap();
    assert_eq!(status.stage, Stage::ChapterLoop);
    assert_eq!(status.chapters.len(), 1);
    assert_eq!(status.chapters[0].title, "Only");
    assert_eq!(status.next_action, NextAction::SubmitTranscript { chapter: 1 });

    let err = o.submit_transcript("replan", 2, "retention").await.unwrap_err();
    assert!(matches!(err, WorkflowError::ChapterNotFound { chapter: 2 }));

    // Finishing the only planned chapter finishes the book
    o.submit_transcript("replan", 1, "pricing").await.unwrap();
    let status = o.current_status("replan").await.unwrap();
    let status = o
        .resume_clarification("replan", &pending_token(&status), Decision::Accept)
        .await
        .unwrap();
    assert_eq!(status.stage, Stage::Complete);
    assert_eq!(status.next_action, NextAction::Done);

    // The dropped chapter is kept on disk, marked as such
    let persisted = store.load("replan").await.unwrap().unwrap();
    assert!(persisted.chapters[&2].superseded);
    assert!(!persisted.chapters[&1].superseded);
}

#[tokio::test]
async fn test_two_chapters_concurrently() {
    let store = Arc::new(MemoryStore::new());
    let h = harness_with(
        store.clone(),
        WorkflowConfig {
            auto_draft: false,
            ..WorkflowConfig::default()
        },
        Arc::new(KeywordClassifier),
    );
    reach_chapter_loop(&h.orchestrator, "parallel").await;

    let first = {
        let o = h.orchestrator.clone();
        tokio::spawn(async move { o.submit_transcript("parallel", 1, "pricing onboarding").await })
    };
    let second = {
        let o = h.orchestrator.clone();
        tokio::spawn(async move { o.submit_transcript("parallel", 2, "nothing relevant").await })
    };
    let (first, second) = tokio::join!(first, second);
    assert_eq!(first.unwrap().unwrap().missing_topics.len(), 1);
    assert_eq!(second.unwrap().unwrap().missing_topics.len(), 1);

    let status = h.orchestrator.current_status("parallel").await.unwrap();
    assert_eq!(status.pending.len(), 2);
    assert_ne!(status.pending[0].token, status.pending[1].token);
    assert!(
        status
            .chapters
            .iter()
            .all(|ch| ch.sub_stage == SubStage::GapsAnalyzed)
    );

    let persisted = store.load("parallel").await.unwrap().unwrap();
    assert_eq!(persisted.chapters.len(), 2);
    assert!(persisted.chapters.values().all(|ch| ch.pending.is_some()));
}

#[tokio::test]
async fn test_busy_chapter_does_not_block_others() {
    let classifier = Arc::new(SlowClassifier {
        delay: Duration::from_secs(2),
    });
    let h = harness_with(Arc::new(MemoryStore::new()), WorkflowConfig::default(), classifier);
    reach_chapter_loop(&h.orchestrator, "busy").await;

    h.orchestrator.submit_transcript("busy", 2, "nothing relevant").await.unwrap();
    let token = pending_token(&h.orchestrator.current_status("busy").await.unwrap());

    let slow = {
        let o = h.orchestrator.clone();
        tokio::spawn(async move { o.submit_transcript("busy", 1, "slowly, pricing").await })
    };
    // Let chapter 1 take its lock and start analysis
    tokio::time::sleep(Duration::from_millis(100)).await;

    let deadline = Duration::from_millis(500);
    let status = tokio::time::timeout(deadline, h.orchestrator.current_status("busy"))
        .await
        .expect("status waited on chapter 1")
        .unwrap();
    assert_eq!(status.chapters[0].sub_stage, SubStage::TranscriptReceived);

    let status = tokio::time::timeout(
        deadline,
        h.orchestrator.resume_clarification("busy", &token, Decision::Respond {
            text: "retention is about habits".to_string(),
        }),
    )
    .await
    .expect("resume waited on chapter 1")
    .unwrap();
    assert_eq!(status.chapters[1].sub_stage, SubStage::Drafted);

    let gaps = slow.await.unwrap().unwrap();
    assert_eq!(gaps.missing_topics.len(), 2);
    let status = h.orchestrator.current_status("busy").await.unwrap();
    assert_eq!(status.chapters[0].sub_stage, SubStage::GapsAnalyzed);
}

// =============================================================================
// Persistence Tests
// =============================================================================

#[tokio::test]
async fn test_restart_reproduces_status() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");

    let before = {
        let h = harness(Arc::new(JsonFileStore::new(temp_dir.path())));
        reach_chapter_loop(&h.orchestrator, "disk").await;
        h.orchestrator
            .submit_transcript("disk", 1, "pricing and onboarding")
            .await
            .unwrap();
        h.orchestrator.current_status("disk").await.unwrap()
    };

    // A fresh orchestrator over the same directory sees the same session
    let h = harness(Arc::new(JsonFileStore::new(temp_dir.path())));
    let after = h.orchestrator.current_status("disk").await.unwrap();
    assert_eq!(before, after);

    let sessions = h.orchestrator.list_sessions().await.unwrap();
    assert_eq!(sessions, vec!["disk".to_string()]);
}

#[tokio::test]
async fn test_resume_token_from_fresh_process() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let token = {
        let h = harness(Arc::new(JsonFileStore::new(temp_dir.path())));
        reach_chapter_loop(&h.orchestrator, "resume").await;
        h.orchestrator.submit_transcript("resume", 2, "nothing").await.unwrap();
        pending_token(&h.orchestrator.current_status("resume").await.unwrap())
    };

    let h = harness(Arc::new(JsonFileStore::new(temp_dir.path())));
    let status = h
        .orchestrator
        .resume_clarification("resume", &token, Decision::Respond {
            text: "retention is about habits".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(status.chapters[1].sub_stage, SubStage::Drafted);

    // The consumed token stays consumed across restarts
    let h = harness(Arc::new(JsonFileStore::new(temp_dir.path())));
    let err = h
        .orchestrator
        .resume_clarification("resume", &token, Decision::Accept)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidContinuation { .. }));
}

#[tokio::test]
async fn test_invalid_session_id_rejected() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let h = harness(Arc::new(JsonFileStore::new(temp_dir.path())));
    let err = h.orchestrator.start_or_resume_session("../escape").await.unwrap_err();
    assert!(matches!(err, WorkflowError::Persistence(_)));
}

// =============================================================================
// Stage Properties
// =============================================================================

#[derive(Debug, Clone)]
enum StageOp {
    Transition(Stage),
    Rollback(Stage),
}

fn stage_strategy() -> impl Strategy<Value = Stage> {
    prop::sample::select(Stage::ALL.to_vec())
}

fn op_strategy() -> impl Strategy<Value = StageOp> {
    prop_oneof![
        4 => stage_strategy().prop_map(StageOp::Transition),
        1 => stage_strategy().prop_map(StageOp::Rollback),
    ]
}

proptest! {
    #[test]
    fn completed_stages_only_grow_and_never_repeat(ops in prop::collection::vec(op_strategy(), 0..40)) {
        let mut state = WorkflowState::new("prop");
        for op in ops {
            let before = state.completed_stages.clone();
            match op {
                StageOp::Transition(target) => {
                    let _ = state.transition(target);
                    // Append-only: the old list is a prefix of the new one
                    prop_assert!(state.completed_stages.starts_with(&before));
                }
                StageOp::Rollback(target) => {
                    if state.rollback(target).is_err() {
                        prop_assert_eq!(&state.completed_stages, &before);
                    }
                }
            }

            let mut seen = state.completed_stages.clone();
            seen.dedup();
            prop_assert_eq!(seen.len(), state.completed_stages.len());
            prop_assert!(state.completed_stages.windows(2).all(|w| w[0] < w[1]));
            prop_assert!(!state.completed_stages.contains(&state.stage));
        }
    }
}
