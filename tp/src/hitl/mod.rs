//! Human-in-the-loop interrupts
//!
//! A pause is a [`ContinuationToken`] stored in the owner's state (the
//! workflow for stage reviews, a chapter for clarifications and draft
//! reviews). Nothing waits on it: the caller persists the owner and returns.
//! A later resume presents the token id, which is consumed exactly once and
//! moved to the owner's history with its final status.

use tracing::{debug, info};

use crate::domain::{ChapterState, ContinuationToken, InterruptPoint, TokenStatus, WorkflowState};
use crate::error::WorkflowError;

/// State that can hold one pending token plus a history of consumed ones
pub trait InterruptSlot {
    fn pending(&self) -> Option<&ContinuationToken>;
    fn history(&self) -> &[ContinuationToken];
    fn slot_mut(&mut self) -> (&mut Option<ContinuationToken>, &mut Vec<ContinuationToken>);
}

impl InterruptSlot for WorkflowState {
    fn pending(&self) -> Option<&ContinuationToken> {
        self.pending.as_ref()
    }

    fn history(&self) -> &[ContinuationToken] {
        &self.resolved
    }

    fn slot_mut(&mut self) -> (&mut Option<ContinuationToken>, &mut Vec<ContinuationToken>) {
        (&mut self.pending, &mut self.resolved)
    }
}

impl InterruptSlot for ChapterState {
    fn pending(&self) -> Option<&ContinuationToken> {
        self.pending.as_ref()
    }

    fn history(&self) -> &[ContinuationToken] {
        &self.resolved
    }

    fn slot_mut(&mut self) -> (&mut Option<ContinuationToken>, &mut Vec<ContinuationToken>) {
        (&mut self.pending, &mut self.resolved)
    }
}

/// Where a presented token id stands for one owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenLookup {
    Pending(ContinuationToken),
    Consumed(TokenStatus),
    Unknown,
}

/// Raise a new pause on `owner`
///
/// An older pending token on the same owner is superseded.
pub fn raise<S: InterruptSlot>(
    owner: &mut S,
    session_id: &str,
    point: InterruptPoint,
    questions: Vec<String>,
    advisory: Vec<String>,
) -> ContinuationToken {
    let token = ContinuationToken::new(session_id, point, questions, advisory);
    let (pending, history) = owner.slot_mut();
    if let Some(mut old) = pending.take() {
        debug!(old = %old.id, new = %token.id, "raise: superseding pending token");
        old.resolve(TokenStatus::Superseded);
        history.push(old);
    }
    info!(token = %token.id, %point, questions = token.questions.len(), "interrupt raised");
    *pending = Some(token.clone());
    token
}

pub fn lookup<S: InterruptSlot>(owner: &S, token_id: &str) -> TokenLookup {
    if let Some(token) = owner.pending().filter(|t| t.id == token_id) {
        return TokenLookup::Pending(token.clone());
    }
    match owner.history().iter().rev().find(|t| t.id == token_id) {
        Some(token) => TokenLookup::Consumed(token.status),
        None => TokenLookup::Unknown,
    }
}

/// Consume the pending token named by `token_id` with a final status
pub fn consume<S: InterruptSlot>(
    owner: &mut S,
    token_id: &str,
    status: TokenStatus,
) -> Result<ContinuationToken, WorkflowError> {
    let found = lookup(owner, token_id);
    if !matches!(found, TokenLookup::Pending(_)) {
        return Err(invalid(token_id, &found));
    }
    let (pending, history) = owner.slot_mut();
    let Some(mut token) = pending.take() else {
        return Err(invalid(token_id, &TokenLookup::Unknown));
    };
    token.resolve(status);
    info!(token = %token.id, %status, "interrupt resolved");
    history.push(token.clone());
    Ok(token)
}

/// Error for a token that cannot be resumed
pub fn invalid(token_id: &str, found: &TokenLookup) -> WorkflowError {
    let reason = match found {
        TokenLookup::Consumed(status) => format!("already consumed ({})", status),
        TokenLookup::Unknown => "unknown token".to_string(),
        TokenLookup::Pending(_) => "token is pending".to_string(),
    };
    WorkflowError::InvalidContinuation {
        token: token_id.to_string(),
        reason,
    }
}
