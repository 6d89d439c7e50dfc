use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use draftgate::blackboard::ReviewAction;
use draftgate::errors::EngineError;

mod cmd;

use cmd::StoreKind;

#[derive(Parser)]
#[command(name = "draftgate")]
#[command(version, about = "Reviewed clinical-draft workflow engine")]
pub struct Cli {
    /// Debug-level logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Directory holding checkpoints, event logs and draftgate.toml. Defaults to .draftgate
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Checkpoint store: file or sqlite
    #[arg(long, global = true, default_value = "file")]
    pub store: StoreKind,

    /// Config file. Defaults to <data-dir>/draftgate.toml
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// External program used as drafter and reviewers instead of the built-in heuristics.
    /// Falls back to DRAFTGATE_COLLABORATOR_CMD.
    #[arg(long, global = true)]
    pub collaborator_cmd: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a run for a clinical intent and drive it to the human gate
    Start {
        intent: String,

        /// Approve at the human gate automatically
        #[arg(long)]
        auto_approve: bool,
    },
    /// Continue a run from its latest checkpoint
    Resume { run_id: String },
    /// Record a review decision for a run awaiting human review, then resume it
    Review {
        run_id: String,

        /// approve, reject or cancel
        action: ReviewAction,

        /// Replacement text to use as the base of the next draft
        #[arg(long)]
        edited_text: Option<String>,

        /// Reviewer feedback passed to the next draft
        #[arg(long)]
        feedback: Option<String>,
    },
    /// Show the current snapshot of a run
    Show {
        run_id: String,

        /// Print the raw blackboard as JSON
        #[arg(long)]
        json: bool,
    },
    /// List checkpoints and the scratchpad audit trail of a run
    History { run_id: String },
    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    if let Err(e) = draftgate::telemetry::init(cli.verbose, cli.log_json) {
        eprintln!("Warning: {}", e);
    }

    match run(&cli).await {
        Ok(code) => code,
        Err(e) => {
            let code = e
                .downcast_ref::<EngineError>()
                .map(|err| format!(" [{}]", err.code()))
                .unwrap_or_default();
            eprintln!("{}{} {:#}", console::style("Error:").red().bold(), code, e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> Result<ExitCode> {
    match &cli.command {
        Commands::Start {
            intent,
            auto_approve,
        } => cmd::cmd_start(cli, intent, *auto_approve).await,
        Commands::Resume { run_id } => cmd::cmd_resume(cli, run_id).await,
        Commands::Review {
            run_id,
            action,
            edited_text,
            feedback,
        } => {
            cmd::cmd_review(
                cli,
                run_id,
                *action,
                edited_text.clone(),
                feedback.clone(),
            )
            .await
        }
        Commands::Show { run_id, json } => cmd::cmd_show(cli, run_id, *json).await,
        Commands::History { run_id } => cmd::cmd_history(cli, run_id).await,
        Commands::Config => cmd::cmd_config(cli),
    }
}
