//! CLI command definitions and subcommands
//!
//! Each invocation is a fresh process: sessions are always resumed from the
//! state directory.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::domain::{ChapterId, Stage, SubStage};

/// Talk2Publish - talk your book into existence
#[derive(Parser)]
#[command(
    name = "tp",
    about = "Resumable conversational book authoring workflow",
    version,
    after_help = "Logs are written to: ~/.local/share/talk2publish/logs/talk2publish.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Start a new session or resume an existing one
    Start {
        /// Session identifier
        session: String,
    },

    /// Talk to the current stage (omit the message to let it ask first)
    Say {
        /// Session identifier
        session: String,

        /// Message to the current stage
        message: Vec<String>,
    },

    /// Submit a chapter transcript and run gap analysis
    Transcript {
        /// Session identifier
        session: String,

        /// Chapter number
        chapter: ChapterId,

        /// Transcript file ("-" reads stdin)
        file: PathBuf,
    },

    /// Resume a paused decision
    Resume {
        /// Session identifier
        session: String,

        /// Continuation token id
        token: String,

        #[command(subcommand)]
        decision: DecisionCommand,
    },

    /// Show session status
    Status {
        /// Session identifier
        session: String,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Draft (or redraft) a clarified chapter
    Draft {
        /// Session identifier
        session: String,

        /// Chapter number
        chapter: ChapterId,

        /// Notes for the writer
        #[arg(long)]
        feedback: Option<String>,
    },

    /// Send a chapter back to an earlier sub-stage
    Redo {
        /// Session identifier
        session: String,

        /// Chapter number
        chapter: ChapterId,

        /// Sub-stage to return to (planned, transcript_received, gaps_analyzed, clarified, drafted)
        target: SubStage,
    },

    /// Move the workflow to a later stage
    Transition {
        /// Session identifier
        session: String,

        /// Target stage
        stage: Stage,
    },

    /// Return the workflow to an earlier stage
    Rollback {
        /// Session identifier
        session: String,

        /// Target stage
        stage: Stage,
    },

    /// List known sessions
    Sessions,
}

impl Command {
    /// Whether the command can reach a delegate or the gap classifier
    pub fn uses_llm(&self) -> bool {
        matches!(
            self,
            Self::Say { .. } | Self::Transcript { .. } | Self::Resume { .. } | Self::Draft { .. }
        )
    }
}

/// Decision given when resuming a token
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum DecisionCommand {
    /// Proceed as is
    Accept,

    /// Answer the questions or give feedback
    Respond {
        /// Answer text
        #[arg(required = true)]
        text: Vec<String>,
    },

    /// Replace an artifact with the contents of a file
    Edit {
        /// Artifact key to replace
        key: String,

        /// File with the replacement content ("-" reads stdin)
        file: PathBuf,
    },

    /// Cancel and mark the work for redo
    Abandon,
}

/// Output format for the status command
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Log directory under the platform data directory
pub fn get_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("talk2publish")
        .join("logs")
}

/// Full path of the log file
pub fn get_log_path() -> PathBuf {
    get_log_dir().join("talk2publish.log")
}
