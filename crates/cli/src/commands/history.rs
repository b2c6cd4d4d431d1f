//! Execution history command handlers

use anyhow::{Result, anyhow};
use clap::{Args, Subcommand};

use opschain_types::ExecutionSummary;

use crate::app::App;
use crate::commands::skill::print_execution;
use crate::output::{OutputFormat, format_time, handle_list};

#[derive(Args)]
pub struct HistoryArgs {
    #[command(subcommand)]
    pub command: HistoryCommand,
}

#[derive(Subcommand)]
pub enum HistoryCommand {
    /// List recent skill executions, newest first
    List {
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },
    /// Show one execution with its step output
    Show {
        /// Execution ID
        id: String,
    },
}

pub fn handle(command: HistoryCommand, app: &App, format: OutputFormat) -> Result<()> {
    match command {
        HistoryCommand::List { limit } => {
            let executions = app.history.list(limit)?;
            handle_list(format, &executions, "No executions recorded", format_history_list)?;
        }
        HistoryCommand::Show { id } => {
            let result = app.history.get(&id)?.ok_or_else(|| anyhow!("execution '{id}' not found"))?;
            print_execution(&result, format)?;
        }
    }
    Ok(())
}

fn format_history_list(executions: &[ExecutionSummary]) {
    println!("{:<10} {:<28} {:<20} {:<9} {:>5}  STARTED", "ID", "SKILL", "DEVICE", "STATUS", "STEPS");
    for execution in executions {
        println!(
            "{:<10} {:<28} {:<20} {:<9} {:>5}  {}",
            execution.execution_id,
            execution.skill_name,
            execution.device_hostname,
            execution.status.as_str(),
            execution.step_count,
            format_time(execution.started_at)
        );
    }
}
