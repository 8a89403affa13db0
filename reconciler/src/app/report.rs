//! Report printing

use colored::Colorize;

use crate::app::run::PlanReport;
use crate::errors::DeployError;
use crate::models::deployment::{ApplyResult, DeployTarget, RunOutcome, WorkspaceState};

/// Print the outcome of a deploy run to stdout
pub fn print_result(result: &ApplyResult, json: bool) -> Result<(), DeployError> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    let outcome = match result.outcome {
        RunOutcome::Succeeded => "SUCCEEDED".green().bold(),
        RunOutcome::Degraded => "DEGRADED".yellow().bold(),
    };
    println!("{} {} [run {}]", outcome, result.target, result.run_id);
    println!("  probed:      {}", result.probed);
    println!("  action:      {}", result.action);
    for transition in &result.transitions {
        println!(
            "  {} {} -> {}: {}",
            "fallback".yellow(),
            transition.from,
            transition.to,
            transition.reason
        );
    }
    if let Some(revision) = &result.revision {
        println!("  revision:    {}", revision);
    }
    match (&result.ownership, &result.permissions) {
        (Some(owner), Some(modes)) => println!(
            "  ownership:   {} (dirs {}, files {})",
            owner, modes.dirs, modes.files
        ),
        _ => println!("  ownership:   {}", "not applied".red()),
    }
    println!(
        "  restarted:   {}",
        if result.service_restarted { "yes".normal() } else { "no".red() }
    );
    for warning in &result.warnings {
        println!("  {} {}", "warning:".yellow(), warning);
    }
    Ok(())
}

/// Print a plan
pub fn print_plan(report: &PlanReport, json: bool) -> Result<(), DeployError> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("{} is {}", report.target, report.state.to_string().bold());
    let steps: Vec<String> = report.plan.steps().map(|a| a.to_string()).collect();
    println!("  plan: {} -> placeholder_page", steps.join(" -> "));
    Ok(())
}

/// Print a probed state
pub fn print_state(target: &DeployTarget, state: WorkspaceState, json: bool) -> Result<(), DeployError> {
    if json {
        let value = serde_json::json!({ "target": target.to_string(), "state": state });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{} is {}", target, state.to_string().bold());
    }
    Ok(())
}

/// Print a fatal error in the selected format
pub fn print_error(err: &DeployError, json: bool) {
    if json {
        let value = serde_json::json!({
            "error": err.to_string(),
            "exit_code": err.exit_code(),
        });
        println!("{}", value);
    } else {
        eprintln!("{} {}", "error:".red().bold(), err);
    }
}
