//! Chain run command handlers

use anyhow::{Result, anyhow};
use clap::{Args, Subcommand};

use opschain_types::{Run, RunStatus, RunSummary};

use crate::app::App;
use crate::output::{OutputFormat, format_optional_time, format_time, handle_list, print_json};

#[derive(Args)]
pub struct RunArgs {
    #[command(subcommand)]
    pub command: RunCommand,
}

#[derive(Subcommand)]
pub enum RunCommand {
    /// List recent runs, newest first
    List {
        /// Only runs of this chain
        #[arg(long)]
        chain: Option<String>,
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },
    /// Show a run with its step results
    Show {
        /// Run ID
        id: String,
    },
}

pub fn handle(command: RunCommand, app: &App, format: OutputFormat) -> Result<()> {
    match command {
        RunCommand::List { chain, limit } => {
            let runs = app.runs.list(chain.as_deref(), limit)?;
            handle_list(format, &runs, "No runs found", format_run_list)?;
        }
        RunCommand::Show { id } => {
            let run = app.runs.get(&id)?.ok_or_else(|| anyhow!("run '{id}' not found"))?;
            print_run(&run, format)?;
        }
    }
    Ok(())
}

pub fn print_run(run: &Run, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(run),
        OutputFormat::Text => {
            format_run_detail(run);
            Ok(())
        }
    }
}

fn format_run_list(runs: &[RunSummary]) {
    println!("{:<14} {:<28} {:<17} {:>7}  STARTED", "ID", "CHAIN", "STATUS", "STEP");
    for run in runs {
        println!(
            "{:<14} {:<28} {:<17} {:>3}/{:<3}  {}",
            run.id,
            run.automation_name,
            run.status.as_str(),
            run.current_step.min(run.total_steps),
            run.total_steps,
            format_time(run.started_at)
        );
    }
}

fn format_run_detail(run: &Run) {
    println!("Run {} of {} ({})", run.id, run.automation_name, run.automation_id);
    println!("  status:    {}", run.status());
    println!("  started:   {}", format_time(run.started_at));
    println!("  completed: {}", format_optional_time(run.completed_at()));
    for result in run.step_results() {
        println!(
            "  [{}] {} {} on {} ({} ms)",
            result.status, result.step_id, result.label, result.device, result.duration_ms
        );
        if let Some(error) = &result.error {
            println!("      error: {error}");
        }
        if let Some(analysis) = &result.analysis {
            println!("      analysis: {analysis}");
        }
    }
    if run.status() == RunStatus::WaitingApproval
        && let Some(step) = run.waiting_step()
    {
        println!(
            "Waiting for approval at step {}. Resume with `opschain chain resume {} approve|reject`.",
            step + 1,
            run.id
        );
    }
}
