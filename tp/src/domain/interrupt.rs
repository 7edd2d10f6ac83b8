//! Continuation tokens and decisions for human-in-the-loop pauses

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use super::id::{generate_token_id, now_ms};
use super::{ChapterId, Stage};

/// Where the workflow paused for the author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InterruptPoint {
    /// Author approves the output of a completed stage
    StageReview { stage: Stage },
    /// Author fills the topic gaps of a chapter transcript
    Clarification { chapter: ChapterId },
    /// Author approves a chapter draft
    DraftReview { chapter: ChapterId },
}

impl InterruptPoint {
    /// Chapter this point belongs to, if any
    pub fn chapter(&self) -> Option<ChapterId> {
        match self {
            Self::StageReview { .. } => None,
            Self::Clarification { chapter } | Self::DraftReview { chapter } => Some(*chapter),
        }
    }

    fn id_parts(&self) -> (&'static str, String) {
        match self {
            Self::StageReview { stage } => ("review", stage.to_string()),
            Self::Clarification { chapter } => ("clarify", format!("ch{}", chapter)),
            Self::DraftReview { chapter } => ("draft", format!("ch{}", chapter)),
        }
    }
}

impl fmt::Display for InterruptPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StageReview { stage } => write!(f, "{} review", stage),
            Self::Clarification { chapter } => write!(f, "chapter {} clarification", chapter),
            Self::DraftReview { chapter } => write!(f, "chapter {} draft review", chapter),
        }
    }
}

/// Lifecycle of a continuation token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    #[default]
    Pending,
    Accepted,
    Responded,
    Edited,
    Abandoned,
    /// Replaced by a newer token or cleared by a redo/rollback
    Superseded,
}

impl fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Responded => "responded",
            Self::Edited => "edited",
            Self::Abandoned => "abandoned",
            Self::Superseded => "superseded",
        };
        f.write_str(s)
    }
}

/// Serializable pause marker, consumed exactly once
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuationToken {
    pub id: String,
    pub session_id: String,
    pub point: InterruptPoint,
    /// Questions shown to the author
    pub questions: Vec<String>,
    /// Non-blocking notes (e.g. topics the author raised that the plan lacks)
    #[serde(default)]
    pub advisory: Vec<String>,
    pub status: TokenStatus,
    pub raised_at: i64,
    #[serde(default)]
    pub resolved_at: Option<i64>,
}

impl ContinuationToken {
    pub fn new(session_id: impl Into<String>, point: InterruptPoint, questions: Vec<String>, advisory: Vec<String>) -> Self {
        debug!(%point, "ContinuationToken::new: called");
        let (kind, scope) = point.id_parts();
        Self {
            id: generate_token_id(kind, &scope),
            session_id: session_id.into(),
            point,
            questions,
            advisory,
            status: TokenStatus::Pending,
            raised_at: now_ms(),
            resolved_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == TokenStatus::Pending
    }

    /// Mark the token consumed with a final status
    pub fn resolve(&mut self, status: TokenStatus) {
        debug!(id = %self.id, %status, "ContinuationToken::resolve: called");
        self.status = status;
        self.resolved_at = Some(now_ms());
    }
}

/// Author decision presented on resume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    /// Proceed as is
    Accept,
    /// Free-form answer or feedback
    Respond { text: String },
    /// Replace an artifact outright
    Edit { key: String, content: String },
    /// Cancel; the work item becomes redo-eligible
    Abandon,
}

impl Decision {
    /// Token status recorded when this decision consumes a token
    pub fn status(&self) -> TokenStatus {
        match self {
            Self::Accept => TokenStatus::Accepted,
            Self::Respond { .. } => TokenStatus::Responded,
            Self::Edit { .. } => TokenStatus::Edited,
            Self::Abandon => TokenStatus::Abandoned,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_id_reflects_point() {
        let token = ContinuationToken::new("s1", InterruptPoint::Clarification { chapter: 3 }, vec![], vec![]);
        assert!(token.id.ends_with("-clarify-ch3"));
        assert!(token.is_pending());
        assert_eq!(token.point.chapter(), Some(3));
    }

    #[test]
    fn test_resolve_sets_status() {
        let mut token = ContinuationToken::new(
            "s1",
            InterruptPoint::StageReview { stage: Stage::Planning },
            vec!["Approve the plan?".into()],
            vec![],
        );
        token.resolve(TokenStatus::Accepted);
        assert!(!token.is_pending());
        assert!(token.resolved_at.is_some());
    }

    #[test]
    fn test_token_serde_roundtrip_keeps_point() {
        let token = ContinuationToken::new("s1", InterruptPoint::DraftReview { chapter: 1 }, vec![], vec!["x".into()]);
        let json = serde_json::to_string(&token).unwrap();
        assert!(json.contains("\"kind\":\"draft_review\""));
        let back: ContinuationToken = serde_json::from_str(&json).unwrap();
        assert_eq!(back, token);
    }

    #[test]
    fn test_decision_status_mapping() {
        assert_eq!(Decision::Accept.status(), TokenStatus::Accepted);
        assert_eq!(Decision::Respond { text: "x".into() }.status(), TokenStatus::Responded);
        assert_eq!(
            Decision::Edit {
                key: "k".into(),
                content: "c".into()
            }
            .status(),
            TokenStatus::Edited
        );
        assert_eq!(Decision::Abandon.status(), TokenStatus::Abandoned);
    }

    #[test]
    fn test_decision_json_shape() {
        let d: Decision = serde_json::from_str(r#"{"decision":"respond","text":"hi"}"#).unwrap();
        assert_eq!(d, Decision::Respond { text: "hi".into() });
    }
}
