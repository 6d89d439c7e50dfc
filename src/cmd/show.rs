//! Inspection: `draftgate show` and `draftgate history`.

use anyhow::{Context, Result};
use std::process::ExitCode;

use draftgate::util::preview;

use super::super::Cli;
use super::{Workspace, print_draft, print_failure, styled_status};

pub async fn cmd_show(cli: &Cli, run_id: &str, json: bool) -> Result<ExitCode> {
    let engine = Workspace::resolve(cli)?.engine()?;
    let state = engine.get_state(run_id).await?;

    if json {
        let out = serde_json::to_string_pretty(&state).context("Failed to serialize snapshot")?;
        println!("{}", out);
        return Ok(ExitCode::SUCCESS);
    }

    println!();
    println!("{}", console::style(format!("Run {}", state.run_id)).bold().cyan());
    println!("Intent:       {}", state.intent);
    println!("Status:       {}", styled_status(state.run_status));
    println!("Iteration:    {}", state.iteration_count);
    println!("Safety:       {}/100", state.safety_score);
    println!("Quality:      {}/100", state.quality_score);
    println!("Drafts:       {}", state.drafts.len());
    if state.human_rejections > 0 {
        println!("Rejections:   {}", state.human_rejections);
    }
    if let Some(decision) = &state.pending_human_decision {
        println!("Pending:      {} (not yet applied)", decision.action);
    }
    if !state.safety_flags.is_empty() {
        println!();
        println!("Safety flags:");
        for flag in &state.safety_flags {
            println!("  - {}", flag);
        }
    }
    print_failure(&state);
    println!();
    match &state.final_artifact {
        Some(artifact) => {
            println!("{}", console::style("Final artifact").bold().green());
            println!("{}", artifact);
        }
        None => {
            println!("Current draft:");
            print_draft(&state);
        }
    }
    Ok(ExitCode::SUCCESS)
}

pub async fn cmd_history(cli: &Cli, run_id: &str) -> Result<ExitCode> {
    let engine = Workspace::resolve(cli)?.engine()?;
    let history = engine.history(run_id).await?;

    println!();
    println!("{}", console::style(format!("Checkpoints for {}", run_id)).bold().cyan());
    println!("─────────────────────────");
    for checkpoint in &history {
        println!(
            "  #{:<3} {:<16} {:<18} {:<15} {}",
            checkpoint.sequence_no,
            checkpoint.step_name.map(|s| s.as_str()).unwrap_or("-"),
            checkpoint.hint.to_string(),
            checkpoint.state.run_status.as_str(),
            checkpoint.written_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    let Some(latest) = history.last() else {
        return Ok(ExitCode::SUCCESS);
    };
    println!();
    println!("{}", console::style("Scratchpad").bold().cyan());
    println!("─────────────────────────");
    for note in &latest.state.scratchpad {
        println!(
            "  [{}] {}: {}",
            note.timestamp.format("%H:%M:%S"),
            console::style(&note.step_name).bold(),
            preview(&note.message, 200)
        );
    }
    Ok(ExitCode::SUCCESS)
}
