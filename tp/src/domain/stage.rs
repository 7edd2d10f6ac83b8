//! Top-level workflow stages and the prerequisite graph
//!
//! ```text
//! welcome → profiling → audience → planning → chapter_loop → complete
//! ```
//!
//! The graph is a single chain, so the prerequisites of a stage are every
//! stage before it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::delegates::TaskKind;

/// A top-level phase of the session workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Welcome,
    Profiling,
    Audience,
    Planning,
    ChapterLoop,
    Complete,
}

impl Stage {
    /// All stages in prerequisite order
    pub const ALL: [Stage; 6] = [
        Stage::Welcome,
        Stage::Profiling,
        Stage::Audience,
        Stage::Planning,
        Stage::ChapterLoop,
        Stage::Complete,
    ];

    /// Stage that directly follows this one
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Welcome => Some(Self::Profiling),
            Self::Profiling => Some(Self::Audience),
            Self::Audience => Some(Self::Planning),
            Self::Planning => Some(Self::ChapterLoop),
            Self::ChapterLoop => Some(Self::Complete),
            Self::Complete => None,
        }
    }

    /// Every stage that must be completed before entering this one
    pub fn prerequisites(self) -> &'static [Self] {
        let idx = Self::ALL.iter().position(|s| *s == self).unwrap_or(0);
        &Self::ALL[..idx]
    }

    /// Delegate that drives the conversational part of this stage
    pub const fn delegate(self) -> Option<TaskKind> {
        match self {
            Self::Profiling => Some(TaskKind::Profiling),
            Self::Audience => Some(TaskKind::Persona),
            Self::Planning => Some(TaskKind::Planning),
            Self::Welcome | Self::ChapterLoop | Self::Complete => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Welcome => "welcome",
            Self::Profiling => "profiling",
            Self::Audience => "audience",
            Self::Planning => "planning",
            Self::ChapterLoop => "chapter_loop",
            Self::Complete => "complete",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str() == s.replace('-', "_"))
            .ok_or_else(|| format!("unknown stage '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prerequisites_follow_chain() {
        assert!(Stage::Welcome.prerequisites().is_empty());
        assert_eq!(Stage::Profiling.prerequisites(), &[Stage::Welcome]);
        assert_eq!(
            Stage::Planning.prerequisites(),
            &[Stage::Welcome, Stage::Profiling, Stage::Audience]
        );
        assert_eq!(Stage::Complete.prerequisites().len(), 5);
    }

    #[test]
    fn test_next_walks_whole_chain() {
        let mut stage = Stage::Welcome;
        let mut seen = vec![stage];
        while let Some(next) = stage.next() {
            seen.push(next);
            stage = next;
        }
        assert_eq!(seen, Stage::ALL.to_vec());
    }

    #[test]
    fn test_delegates_per_stage() {
        assert_eq!(Stage::Profiling.delegate(), Some(TaskKind::Profiling));
        assert_eq!(Stage::Audience.delegate(), Some(TaskKind::Persona));
        assert_eq!(Stage::Planning.delegate(), Some(TaskKind::Planning));
        assert_eq!(Stage::ChapterLoop.delegate(), None);
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!("chapter_loop".parse::<Stage>().unwrap(), Stage::ChapterLoop);
        assert_eq!("chapter-loop".parse::<Stage>().unwrap(), Stage::ChapterLoop);
        assert_eq!(Stage::Audience.to_string(), "audience");
        assert!("drafting".parse::<Stage>().is_err());
    }

    #[test]
    fn test_serde_snake_case() {
        let json = serde_json::to_string(&Stage::ChapterLoop).unwrap();
        assert_eq!(json, "\"chapter_loop\"");
    }
}
