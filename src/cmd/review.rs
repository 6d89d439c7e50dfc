//! Human review: `draftgate review <run_id> <action>`.

use anyhow::Result;
use std::process::ExitCode;

use draftgate::blackboard::{HumanDecision, ReviewAction};

use super::super::Cli;
use super::{Workspace, report_outcome};

/// Submit the decision; the engine acts on it right away.
pub async fn cmd_review(
    cli: &Cli,
    run_id: &str,
    action: ReviewAction,
    edited_text: Option<String>,
    feedback: Option<String>,
) -> Result<ExitCode> {
    let engine = Workspace::resolve(cli)?.engine()?;

    let mut decision = HumanDecision::new(action);
    if let Some(feedback) = feedback {
        decision = decision.with_feedback(feedback);
    }
    if let Some(text) = edited_text {
        decision = decision.with_edited_text(text);
    }

    let ack = engine.submit_review(run_id, decision).await?;
    println!(
        "{} {} for run {} (checkpoint {})",
        console::style("Recorded").green(),
        console::style(ack.action).bold(),
        ack.run_id,
        ack.sequence_no
    );
    Ok(report_outcome(&ack.outcome))
}
