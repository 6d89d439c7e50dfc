//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module    | Commands handled        |
//! |-----------|-------------------------|
//! | `run`     | `Start`, `Resume`       |
//! | `review`  | `Review`                |
//! | `show`    | `Show`, `History`       |
//! | `config`  | `Config`                |

pub mod config;
pub mod review;
pub mod run;
pub mod show;

pub use config::cmd_config;
pub use review::cmd_review;
pub use run::{cmd_resume, cmd_start};
pub use show::{cmd_history, cmd_show};

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;

use draftgate::blackboard::{Blackboard, RunStatus};
use draftgate::checkpoint::{CheckpointStore, FileCheckpointStore, SqliteCheckpointStore};
use draftgate::collaborators::{CommandCollaborator, Collaborators};
use draftgate::config::EngineConfig;
use draftgate::engine::{Engine, ExecutionStatus, RunOutcome};
use draftgate::events::{FanoutSink, JsonlEventLog, TracingSink};

use super::Cli;

pub const DEFAULT_DATA_DIR: &str = ".draftgate";
pub const CONFIG_FILE_NAME: &str = "draftgate.toml";
pub const COLLABORATOR_ENV: &str = "DRAFTGATE_COLLABORATOR_CMD";

/// Exit code for a run that ended in `failed`.
pub const EXIT_RUN_FAILED: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreKind {
    #[default]
    File,
    Sqlite,
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "file" | "jsonl" => Ok(Self::File),
            "sqlite" | "db" => Ok(Self::Sqlite),
            _ => Err(format!(
                "Invalid store '{}'. Valid values: file, sqlite",
                s
            )),
        }
    }
}

impl std::fmt::Display for StoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::File => "file",
            Self::Sqlite => "sqlite",
        })
    }
}

/// Paths and settings resolved from global flags, the config file and the
/// environment.
pub struct Workspace {
    pub data_dir: PathBuf,
    pub config_path: PathBuf,
    pub store: StoreKind,
    pub config: EngineConfig,
    pub collaborator_cmd: Option<String>,
}

impl Workspace {
    pub fn resolve(cli: &Cli) -> Result<Self> {
        let data_dir = cli
            .data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| data_dir.join(CONFIG_FILE_NAME));
        if cli.config.is_some() && !config_path.exists() {
            anyhow::bail!("Config file not found: {}", config_path.display());
        }
        let config = EngineConfig::load(Some(&config_path))?;
        let collaborator_cmd = cli
            .collaborator_cmd
            .clone()
            .or_else(|| std::env::var(COLLABORATOR_ENV).ok())
            .filter(|c| !c.trim().is_empty());

        Ok(Self {
            data_dir,
            config_path,
            store: cli.store,
            config,
            collaborator_cmd,
        })
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.data_dir.join("checkpoints")
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("draftgate.db")
    }

    pub fn events_dir(&self) -> PathBuf {
        self.data_dir.join("events")
    }

    pub fn open_store(&self) -> Result<Arc<dyn CheckpointStore>> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("Failed to create data dir {}", self.data_dir.display()))?;
        let store: Arc<dyn CheckpointStore> = match self.store {
            StoreKind::File => Arc::new(
                FileCheckpointStore::new(self.checkpoint_dir())
                    .context("Failed to open checkpoint directory")?,
            ),
            StoreKind::Sqlite => Arc::new(
                SqliteCheckpointStore::open(&self.database_path())
                    .context("Failed to open checkpoint database")?,
            ),
        };
        Ok(store)
    }

    pub fn collaborators(&self) -> Collaborators {
        match &self.collaborator_cmd {
            Some(command) => Collaborators::command(CommandCollaborator::new(command.clone())),
            None => Collaborators::heuristic(),
        }
    }

    /// Engine wired with the configured store, collaborators, and the
    /// tracing and per-run JSONL event sinks.
    pub fn engine(&self) -> Result<Engine> {
        let store = self.open_store()?;
        let sink = FanoutSink::new()
            .with(Arc::new(TracingSink))
            .with(Arc::new(JsonlEventLog::new(&self.events_dir())?));
        Ok(Engine::builder(self.config.clone(), store)
            .collaborators(self.collaborators())
            .sink(Arc::new(sink))
            .build())
    }
}

/// Print how a start/resume/review call ended and pick the exit code.
pub fn report_outcome(outcome: &RunOutcome) -> ExitCode {
    let state = &outcome.snapshot;
    println!();
    println!("Run:        {}", console::style(&outcome.run_id).bold());
    println!("Outcome:    {}", styled_outcome(outcome.status));
    println!("Status:     {}", styled_status(state.run_status));
    println!(
        "Iteration:  {}   Safety: {}/100   Quality: {}/100",
        state.iteration_count, state.safety_score, state.quality_score
    );

    match outcome.status {
        ExecutionStatus::Suspended => {
            println!();
            println!("Awaiting human review. Current draft:");
            print_draft(state);
            println!();
            println!(
                "Review with: draftgate review {} <approve|reject|cancel> [--feedback ..] [--edited-text ..]",
                outcome.run_id
            );
            ExitCode::SUCCESS
        }
        ExecutionStatus::Superseded => {
            println!(
                "{}",
                console::style("Another worker is driving this run; nothing was changed.").yellow()
            );
            ExitCode::SUCCESS
        }
        ExecutionStatus::Error => {
            print_failure(state);
            ExitCode::from(EXIT_RUN_FAILED)
        }
        ExecutionStatus::Terminal => {
            if let Some(artifact) = &state.final_artifact {
                println!();
                println!("{}", console::style("Final artifact").bold().green());
                println!("{}", artifact);
            }
            ExitCode::SUCCESS
        }
    }
}

pub fn print_failure(state: &Blackboard) {
    if let Some(failure) = &state.failure {
        println!(
            "{} {} ({})",
            console::style("Failed:").red().bold(),
            failure.message,
            failure.code
        );
    }
}

pub fn print_draft(state: &Blackboard) {
    if state.current_draft.is_empty() {
        println!("  {}", console::style("(no draft yet)").dim());
        return;
    }
    println!("{}", console::style("─".repeat(60)).dim());
    println!("{}", state.current_draft);
    println!("{}", console::style("─".repeat(60)).dim());
}

pub fn styled_status(status: RunStatus) -> console::StyledObject<&'static str> {
    let s = console::style(status.as_str());
    match status {
        RunStatus::Approved => s.green().bold(),
        RunStatus::AwaitingHuman => s.cyan().bold(),
        RunStatus::Rejected | RunStatus::Cancelled => s.yellow(),
        RunStatus::Failed => s.red().bold(),
        _ => s,
    }
}

fn styled_outcome(status: ExecutionStatus) -> console::StyledObject<&'static str> {
    let s = console::style(status.as_str());
    match status {
        ExecutionStatus::Terminal => s.green(),
        ExecutionStatus::Suspended => s.cyan(),
        ExecutionStatus::Error => s.red().bold(),
        ExecutionStatus::Superseded => s.yellow(),
    }
}
