mod app;
mod commands;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use opschain_util::Settings;

use crate::app::App;
use crate::commands::{chain, history, run, skill};
use crate::output::OutputFormat;

/// Run network device skills and automation chains.
#[derive(Parser)]
#[command(name = "opschain", version, about)]
struct Cli {
    /// Output format for listings and records
    #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage and run automation chains
    Chain(chain::ChainArgs),
    /// Inspect chain runs
    Run(run::RunArgs),
    /// Browse and execute skills
    Skill(skill::SkillArgs),
    /// Inspect skill execution history
    History(history::HistoryArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let settings = Settings::from_env().context("reading settings from the environment")?;
    let app = App::from_settings(settings)?;

    match cli.command {
        Command::Chain(args) => chain::handle(args.command, &app, cli.output).await,
        Command::Run(args) => run::handle(args.command, &app, cli.output),
        Command::Skill(args) => skill::handle(args.command, &app, cli.output).await,
        Command::History(args) => history::handle(args.command, &app, cli.output),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
