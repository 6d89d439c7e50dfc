//! Driving runs: `draftgate start` and `draftgate resume`.

use anyhow::Result;
use std::process::ExitCode;

use super::super::Cli;
use super::{Workspace, report_outcome};

pub async fn cmd_start(cli: &Cli, intent: &str, auto_approve: bool) -> Result<ExitCode> {
    let mut workspace = Workspace::resolve(cli)?;
    if auto_approve {
        workspace.config.auto_approve = true;
    }
    let engine = workspace.engine()?;

    println!(
        "{} {}",
        console::style("Starting run:").bold().cyan(),
        draftgate::util::preview(intent, 120)
    );
    if engine.config().auto_approve {
        println!(
            "  {}",
            console::style("Auto-approve is on; the human gate will not pause").dim()
        );
    }

    let outcome = engine.start(intent).await?;
    Ok(report_outcome(&outcome))
}

pub async fn cmd_resume(cli: &Cli, run_id: &str) -> Result<ExitCode> {
    let engine = Workspace::resolve(cli)?.engine()?;
    let outcome = engine.resume(run_id, None).await?;
    Ok(report_outcome(&outcome))
}
