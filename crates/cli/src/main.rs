// crates/cli/src/main.rs
//! `claude-recall` binary: Claude Code hook handlers plus maintenance
//! commands for the feedback store, repo snapshots, and the session brain.
//!
//! Hook subcommands read their input JSON from stdin and write hook
//! responses to stdout, so all logging goes to stderr.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use claude_recall_core::{brain, io, paths, snapshot};
use claude_recall_db::FeedbackStore;
use std::path::{Path, PathBuf};

mod hook;
mod insights;

#[derive(Parser)]
#[command(
    name = "claude-recall",
    version,
    about = "Session memory and skill feedback for Claude Code"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Hook handlers (read hook input JSON from stdin)
    Hook {
        #[command(subcommand)]
        event: HookEvent,
    },
    /// Repository utilities
    Repo {
        #[command(subcommand)]
        action: RepoAction,
    },
    /// Feedback data analysis and maintenance
    Feedback {
        #[command(subcommand)]
        action: FeedbackAction,
    },
    /// Session brain state
    Brain {
        #[command(subcommand)]
        action: BrainAction,
    },
}

#[derive(Subcommand)]
enum HookEvent {
    /// PostToolUse: attribute the tool call to a skill and log feedback
    PostToolUse,
    /// SessionStart: emit brain context and a repo snapshot
    SessionStart,
    /// SessionEnd: summarize the session and save a brain episode
    SessionEnd,
}

#[derive(Subcommand)]
enum RepoAction {
    /// Generate a bounded repo snapshot as JSON
    Snapshot {
        /// Repository root path (defaults to cwd)
        #[arg(short, long)]
        path: Option<PathBuf>,
        /// Output compact JSON (no indentation)
        #[arg(short, long)]
        compact: bool,
        /// Write output to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum FeedbackAction {
    /// Skill and tool statistics with recommendations
    Insights {
        /// Path to the feedback database (defaults to the project store)
        #[arg(long)]
        db: Option<PathBuf>,
        /// Restrict insights to one skill
        #[arg(short, long)]
        skill: Option<String>,
        /// Include common error listings
        #[arg(short, long)]
        errors: bool,
        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete all feedback data
    Reset {
        /// Path to the feedback database (defaults to the project store)
        #[arg(long)]
        db: Option<PathBuf>,
        /// Confirm the deletion
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum BrainAction {
    /// Print the current brain state as JSON
    Show,
}

fn open_store(path: &Path) -> Result<FeedbackStore> {
    FeedbackStore::new(path)
        .with_context(|| format!("failed to open feedback store at {}", path.display()))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Hook { event } => match event {
            HookEvent::PostToolUse => hook::post_tool_use(),
            HookEvent::SessionStart => hook::session_start(),
            HookEvent::SessionEnd => hook::session_end(),
        },
        Commands::Repo {
            action:
                RepoAction::Snapshot {
                    path,
                    compact,
                    output,
                },
        } => {
            let snapshot = snapshot::create_snapshot(path.as_deref());
            let value = snapshot.to_value();
            let text = if compact {
                serde_json::to_string(&value)?
            } else {
                serde_json::to_string_pretty(&value)?
            };
            match output {
                Some(path) => io::write_atomic(&path, &format!("{text}\n"))
                    .with_context(|| format!("failed to write {}", path.display()))?,
                None => println!("{text}"),
            }
            Ok(())
        }
        Commands::Feedback { action } => match action {
            FeedbackAction::Insights {
                db,
                skill,
                errors,
                json,
            } => {
                let path = db.unwrap_or_else(paths::feedback_db_path);
                if !path.exists() {
                    println!("No feedback data yet.");
                    return Ok(());
                }
                let store = open_store(&path)?;
                insights::run(&store, skill.as_deref(), errors, json)
            }
            FeedbackAction::Reset { db, yes } => {
                if !yes {
                    bail!("refusing to delete feedback data without --yes");
                }
                let path = db.unwrap_or_else(paths::feedback_db_path);
                let store = open_store(&path)?;
                store.reset()?;
                println!("Feedback data cleared.");
                Ok(())
            }
        },
        Commands::Brain {
            action: BrainAction::Show,
        } => {
            let brain = brain::load_brain(&paths::brain_json_path());
            println!("{}", serde_json::to_string_pretty(&brain)?);
            Ok(())
        }
    }
}
