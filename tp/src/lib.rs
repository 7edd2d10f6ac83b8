//! Talk2Publish - resumable workflow core for conversational book authoring
//!
//! An author talks through their book: a profile of the author, a reader
//! persona, a chapter plan, then one spoken transcript per chapter. The core
//! compares each transcript with its plan, asks the author to fill the gaps,
//! and drafts the chapter once nothing is left open.
//!
//! # Core Concepts
//!
//! - **Explicit State**: Stages and chapter sub-stages are tagged enums with
//!   validated transitions, persisted after every committed change
//! - **Content Apart From State**: Artifacts are versioned text in per-chapter
//!   namespaces; state only holds references to them
//! - **Interrupts Are Data**: A pause for the author is a persisted
//!   continuation token, resumable from a fresh process
//! - **Uniform Delegates**: Every kind of work runs behind one trait, selected
//!   by name
//!
//! # Modules
//!
//! - [`artifacts`] - Versioned artifact namespaces
//! - [`gap`] - Plan versus transcript gap analysis
//! - [`delegates`] - Task delegate contract, dispatcher and built-in delegates
//! - [`hitl`] - Continuation tokens for author decisions
//! - [`domain`] - Stages, chapter state and workflow state
//! - [`workflow`] - The orchestrator tying it together
//! - [`state`] - Session persistence
//! - [`llm`] - LLM client trait and Anthropic implementation
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod artifacts;
pub mod cli;
pub mod config;
pub mod delegates;
pub mod domain;
pub mod error;
pub mod gap;
pub mod hitl;
pub mod llm;
pub mod state;
pub mod workflow;

// Re-export commonly used types
pub use artifacts::{ArtifactRef, ArtifactStore, ArtifactView};
pub use config::{ClassifierKind, Config, LlmConfig, StorageConfig, WorkflowConfig};
pub use delegates::{Dispatcher, TaskContext, TaskDelegate, TaskKind, TaskOutcome, TaskResult};
pub use domain::{
    ChapterId, ChapterState, ClarificationRequest, ContinuationToken, Decision, Disposition, InterruptPoint, Stage,
    SubStage, TokenStatus, WorkflowState,
};
pub use error::{ErrorClass, WorkflowError};
pub use gap::{GapAnalysisResult, GapAnalyzer, KeywordClassifier, LlmClassifier, TopicClassifier};
pub use llm::{AnthropicClient, CompletionRequest, CompletionResponse, LlmClient, LlmError};
pub use state::{JsonFileStore, MemoryStore, PersistedSession, StateStore, StoreError};
pub use workflow::{AdvanceOutcome, NextAction, Orchestrator, StatusSnapshot};
