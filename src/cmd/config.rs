//! Configuration view: `draftgate config`.

use anyhow::Result;
use std::process::ExitCode;

use super::super::Cli;
use super::Workspace;

pub fn cmd_config(cli: &Cli) -> Result<ExitCode> {
    let workspace = Workspace::resolve(cli)?;
    let config = &workspace.config;

    println!();
    println!("draftgate configuration");
    println!("=======================");
    println!();
    if workspace.config_path.exists() {
        println!("Config file: {}", workspace.config_path.display());
    } else {
        println!(
            "No config file at {} (defaults + environment)",
            workspace.config_path.display()
        );
    }
    println!("Data dir:    {}", workspace.data_dir.display());
    println!("Store:       {}", workspace.store);
    println!(
        "Collaborator: {}",
        workspace.collaborator_cmd.as_deref().unwrap_or("built-in heuristics")
    );
    println!();
    println!("Effective values (with env overrides):");
    println!("[engine]");
    println!("  safety_threshold = {}", config.safety_threshold);
    println!("  quality_threshold = {}", config.quality_threshold);
    println!("  max_iterations = {}", config.max_iterations);
    println!("  step_timeout_seconds = {}", config.step_timeout_seconds);
    println!("  auto_approve = {}", config.auto_approve);
    println!("  max_step_retries = {}", config.max_step_retries);
    println!("  retry_backoff_ms = {}", config.retry_backoff_ms);
    println!("  max_human_rejections = {}", config.max_human_rejections);
    Ok(ExitCode::SUCCESS)
}
