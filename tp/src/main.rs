//! Talk2Publish - conversational book authoring
//!
//! CLI entry point. Every command resumes its session from the state
//! directory, runs one operation, and prints the result.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tracing::info;

use talk2publish::cli::{Cli, Command, DecisionCommand, OutputFormat, get_log_dir, get_log_path};
use talk2publish::config::{ClassifierKind, Config};
use talk2publish::delegates::Dispatcher;
use talk2publish::domain::Decision;
use talk2publish::error::WorkflowError;
use talk2publish::gap::{GapAnalysisResult, GapAnalyzer, KeywordClassifier, LlmClassifier, TopicClassifier};
use talk2publish::llm::create_client;
use talk2publish::state::JsonFileStore;
use talk2publish::workflow::{AdvanceOutcome, Orchestrator, StatusSnapshot};

fn setup_logging(level: tracing::Level) -> Result<()> {
    // Create log directory
    let log_dir = get_log_dir();
    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Write to the log file, never stdout/stderr
    let log_file = fs::File::create(get_log_path()).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {})", level);
    Ok(())
}

/// CLI flag first, then config, then INFO
fn resolve_log_level(cli_level: Option<&str>, config_level: Option<String>) -> tracing::Level {
    cli_level
        .map(str::to_string)
        .or(config_level)
        .and_then(|level| level.parse().ok())
        .unwrap_or(tracing::Level::INFO)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = resolve_log_level(cli.log_level.as_deref(), Config::load_log_level(cli.config.as_ref()));
    setup_logging(level).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!(
        "Talk2Publish loaded config: provider={}, model={}, state-dir={}",
        config.llm.provider,
        config.llm.model,
        config.storage.state_dir
    );

    let orchestrator = build_orchestrator(&config, cli.command.uses_llm())?;

    match cli.command {
        Command::Start { session } => cmd_start(&orchestrator, &session).await,
        Command::Say { session, message } => cmd_say(&orchestrator, &session, message).await,
        Command::Transcript { session, chapter, file } => {
            cmd_transcript(&orchestrator, &session, chapter, &file).await
        }
        Command::Resume {
            session,
            token,
            decision,
        } => cmd_resume(&orchestrator, &session, &token, decision).await,
        Command::Status { session, format } => cmd_status(&orchestrator, &session, format).await,
        Command::Draft {
            session,
            chapter,
            feedback,
        } => {
            let status = orchestrator
                .draft_chapter(&session, chapter, feedback)
                .await
                .map_err(report)?;
            print_status(&status);
            Ok(())
        }
        Command::Redo {
            session,
            chapter,
            target,
        } => {
            let status = orchestrator
                .redo_chapter(&session, chapter, target)
                .await
                .map_err(report)?;
            print_status(&status);
            Ok(())
        }
        Command::Transition { session, stage } => {
            let status = orchestrator.transition(&session, stage).await.map_err(report)?;
            print_status(&status);
            Ok(())
        }
        Command::Rollback { session, stage } => {
            let status = orchestrator.rollback(&session, stage).await.map_err(report)?;
            print_status(&status);
            Ok(())
        }
        Command::Sessions => cmd_sessions(&orchestrator).await,
    }
}

/// Wire the orchestrator; commands that never reach the LLM skip the API key check
fn build_orchestrator(config: &Config, uses_llm: bool) -> Result<Orchestrator> {
    let timeout = config.workflow.collaborator_timeout();
    let retries = config.workflow.delegate_retries;

    let (dispatcher, classifier): (Dispatcher, Arc<dyn TopicClassifier>) = if uses_llm {
        config.validate()?;
        let llm = create_client(&config.llm).context("Failed to create LLM client")?;
        let classifier: Arc<dyn TopicClassifier> = match config.workflow.gap_classifier {
            ClassifierKind::Llm => Arc::new(LlmClassifier::new(llm.clone(), timeout)),
            ClassifierKind::Keyword => Arc::new(KeywordClassifier),
        };
        (Dispatcher::standard(llm, timeout, retries), classifier)
    } else {
        (Dispatcher::empty(retries), Arc::new(KeywordClassifier))
    };

    let store = Arc::new(JsonFileStore::new(config.storage.state_path()));
    Ok(Orchestrator::new(
        config.workflow.clone(),
        store,
        Arc::new(dispatcher),
        GapAnalyzer::new(classifier),
    ))
}

/// Surface a workflow error with its remediation attached
fn report(err: WorkflowError) -> eyre::Report {
    let hint = err.remediation();
    eyre::eyre!("{} (next: {})", err, hint)
}

fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read stdin")?;
        return Ok(text);
    }
    fs::read_to_string(path).context(format!("Failed to read {}", path.display()))
}

async fn cmd_start(orchestrator: &Orchestrator, session: &str) -> Result<()> {
    let status = orchestrator.start_or_resume_session(session).await.map_err(report)?;
    print_status(&status);
    Ok(())
}

async fn cmd_say(orchestrator: &Orchestrator, session: &str, message: Vec<String>) -> Result<()> {
    let input = if message.is_empty() { None } else { Some(message.join(" ")) };
    let outcome = orchestrator.advance(session, input).await.map_err(report)?;

    match outcome {
        AdvanceOutcome::Questions { questions, token } => {
            for question in &questions {
                println!("{} {}", "?".yellow(), question);
            }
            if let Some(token) = token {
                println!();
                println!(
                    "Decide with: {}",
                    format!("tp resume {} {} accept|respond|edit|abandon", session, token).cyan()
                );
            }
        }
        AdvanceOutcome::Artifacts { artifacts } => {
            for artifact in &artifacts {
                println!(
                    "{} {}/{} v{} ({} bytes)",
                    "wrote".green(),
                    artifact.namespace,
                    artifact.key,
                    artifact.version,
                    artifact.bytes
                );
            }
            let status = orchestrator.current_status(session).await.map_err(report)?;
            println!("Next: {}", status.next_action);
        }
        AdvanceOutcome::Status { status } => print_status(&status),
    }
    Ok(())
}

async fn cmd_transcript(orchestrator: &Orchestrator, session: &str, chapter: u32, file: &PathBuf) -> Result<()> {
    let text = read_input(file)?;
    let result = orchestrator
        .submit_transcript(session, chapter, &text)
        .await
        .map_err(report)?;
    print_gaps(chapter, &result);

    let status = orchestrator.current_status(session).await.map_err(report)?;
    print_status(&status);
    Ok(())
}

async fn cmd_resume(orchestrator: &Orchestrator, session: &str, token: &str, decision: DecisionCommand) -> Result<()> {
    let decision = match decision {
        DecisionCommand::Accept => Decision::Accept,
        DecisionCommand::Respond { text } => Decision::Respond { text: text.join(" ") },
        DecisionCommand::Edit { key, file } => Decision::Edit {
            key,
            content: read_input(&file)?,
        },
        DecisionCommand::Abandon => Decision::Abandon,
    };

    let status = orchestrator
        .resume_clarification(session, token, decision)
        .await
        .map_err(report)?;
    print_status(&status);
    Ok(())
}

async fn cmd_status(orchestrator: &Orchestrator, session: &str, format: OutputFormat) -> Result<()> {
    let status = orchestrator.current_status(session).await.map_err(report)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
        OutputFormat::Text => print_status(&status),
    }
    Ok(())
}

async fn cmd_sessions(orchestrator: &Orchestrator) -> Result<()> {
    let sessions = orchestrator.list_sessions().await.map_err(report)?;
    if sessions.is_empty() {
        println!("{}", "No sessions yet.".dimmed());
    }
    for session in sessions {
        println!("{}", session);
    }
    Ok(())
}

fn print_gaps(chapter: u32, result: &GapAnalysisResult) {
    if result.is_clear() {
        println!("{} chapter {} covers its plan", "✓".green(), chapter);
        return;
    }
    for topic in &result.missing_topics {
        println!("{} missing: {}", "-".red(), topic);
    }
    for topic in &result.novel_topics {
        println!("{} not in plan: {}", "+".yellow(), topic);
    }
    println!();
}

fn print_status(status: &StatusSnapshot) {
    println!("{} {}", "Session".bold(), status.session_id.bright_cyan());
    println!("  stage: {}", status.stage.to_string().bold());

    if !status.completed_stages.is_empty() {
        let done: Vec<String> = status.completed_stages.iter().map(|s| s.to_string()).collect();
        println!("  completed: {}", done.join(", ").dimmed());
    }

    if !status.chapters.is_empty() {
        println!();
        println!("{}", "Chapters".bold());
        for ch in &status.chapters {
            let marker = if status.active_chapter == Some(ch.chapter) { "*" } else { " " };
            let mut line = format!("{} {:>2}. {:<32} {}", marker, ch.chapter, ch.title, ch.sub_stage);
            if ch.pending_clarifications > 0 {
                line.push_str(&format!(" ({} open)", ch.pending_clarifications));
            }
            if ch.redo_required {
                line.push_str(" [redo]");
            }
            println!("{}", line);
            if let Some(err) = &ch.last_error {
                println!("       {}", err.red());
            }
        }
    }

    if !status.pending.is_empty() {
        println!();
        println!("{}", "Waiting on you".bold());
        for pending in &status.pending {
            println!("  {} {}", pending.token.yellow(), pending.point);
            for question in &pending.questions {
                println!("    - {}", question);
            }
            for note in &pending.advisory {
                println!("    {} {}", "note:".dimmed(), note);
            }
        }
    }

    if let Some(err) = &status.last_error {
        println!();
        println!("{} {}", "Last error:".red(), err);
    }

    println!();
    println!("Next: {}", status.next_action.to_string().green());
}
