//! Chain command handlers

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Subcommand};
use serde::de::DeserializeOwned;
use tracing::info;

use opschain_types::{ChainDefinition, ChainDraft, ChainPatch, ChainSummary, GateMode, ResumeAction, builtin_templates};

use crate::app::App;
use crate::commands::run::print_run;
use crate::output::{OutputFormat, format_time, handle_list, parse_params, print_json};

#[derive(Args)]
pub struct ChainArgs {
    #[command(subcommand)]
    pub command: ChainCommand,
}

#[derive(Subcommand)]
pub enum ChainCommand {
    /// List saved chains
    List {},
    /// Show a chain definition
    Show {
        /// Chain ID
        id: String,
    },
    /// Create a chain from a YAML or JSON draft, or from a built-in template
    Create {
        /// Draft file
        #[arg(short, long, conflicts_with = "template", required_unless_present = "template")]
        file: Option<PathBuf>,
        /// Name of a built-in template (see `chain templates`)
        #[arg(short, long)]
        template: Option<String>,
    },
    /// Apply a partial update from a YAML or JSON file
    Update {
        /// Chain ID
        id: String,
        /// Patch file; absent fields are left untouched
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Delete a chain
    Delete {
        /// Chain ID
        id: String,
    },
    /// Copy a chain under a new ID
    Duplicate {
        /// Chain ID
        id: String,
    },
    /// List the built-in chain templates
    Templates {},
    /// Start a run of a chain
    Run {
        /// Chain ID
        id: String,
        /// Chain parameter, repeatable
        #[arg(short = 'p', long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
        /// `pause` stops at approval gates, `auto_approve` runs through them
        #[arg(long, default_value = "pause")]
        gate_mode: GateMode,
    },
    /// Approve or reject a run waiting at an approval gate
    Resume {
        /// Run ID
        run_id: String,
        /// `approve` or `reject`
        #[arg(default_value = "approve")]
        action: ResumeAction,
    },
}

pub async fn handle(command: ChainCommand, app: &App, format: OutputFormat) -> Result<()> {
    match command {
        ChainCommand::List {} => {
            let chains = app.chains.list()?;
            handle_list(format, &chains, "No chains saved", format_chain_list)?;
        }

        ChainCommand::Show { id } => {
            let chain = app.chains.get(&id)?.ok_or_else(|| anyhow!("chain '{id}' not found"))?;
            match format {
                OutputFormat::Json => print_json(&chain)?,
                OutputFormat::Text => format_chain_detail(&chain),
            }
        }

        ChainCommand::Create { file, template } => {
            let draft = match (file, template) {
                (Some(path), _) => read_document::<ChainDraft>(&path).await?,
                (None, Some(name)) => template_draft(&name)?,
                (None, None) => bail!("either --file or --template is required"),
            };
            let chain = app.chains.create(draft)?;
            info!(chain = %chain.id, name = %chain.name, "chain created");
            print_created(&chain, format)?;
        }

        ChainCommand::Update { id, file } => {
            let patch = read_document::<ChainPatch>(&file).await?;
            let chain = app.chains.update(&id, patch)?.ok_or_else(|| anyhow!("chain '{id}' not found"))?;
            info!(chain = %chain.id, "chain updated");
            print_created(&chain, format)?;
        }

        ChainCommand::Delete { id } => {
            if !app.chains.delete(&id)? {
                bail!("chain '{id}' not found");
            }
            info!(chain = %id, "chain deleted");
            println!("Deleted chain {id}");
        }

        ChainCommand::Duplicate { id } => {
            let chain = app.chains.duplicate(&id)?.ok_or_else(|| anyhow!("chain '{id}' not found"))?;
            info!(source = %id, chain = %chain.id, "chain duplicated");
            print_created(&chain, format)?;
        }

        ChainCommand::Templates {} => {
            let templates = builtin_templates();
            handle_list(format, &templates, "No templates available", |items| {
                for template in items {
                    println!("{:<28} {:>2} steps  {}", template.name, template.steps.len(), template.description);
                }
            })?;
        }

        ChainCommand::Run { id, params, gate_mode } => {
            let params = parse_params(&params)?;
            let run = app.orchestrator.execute_chain(&id, params, gate_mode).await?;
            print_run(&run, format)?;
        }

        ChainCommand::Resume { run_id, action } => {
            let run = app.orchestrator.resume_chain_run(&run_id, action).await?;
            print_run(&run, format)?;
        }
    }
    Ok(())
}

async fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("read {}", path.display()))?;
    // YAML is a superset of JSON, so one parser covers both.
    serde_yaml::from_str(&content).with_context(|| format!("parse {}", path.display()))
}

fn template_draft(name: &str) -> Result<ChainDraft> {
    builtin_templates()
        .into_iter()
        .find(|template| template.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| anyhow!("unknown template '{name}'; run `opschain chain templates` to list them"))
}

fn print_created(chain: &ChainDefinition, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(chain),
        OutputFormat::Text => {
            println!("{} {}", chain.id, chain.name);
            Ok(())
        }
    }
}

fn format_chain_list(chains: &[ChainSummary]) {
    println!("{:<10} {:<32} {:>5} {:>6}  UPDATED", "ID", "NAME", "STEPS", "PARAMS");
    for chain in chains {
        println!(
            "{:<10} {:<32} {:>5} {:>6}  {}",
            chain.id,
            chain.name,
            chain.step_count,
            chain.parameter_count,
            format_time(chain.updated_at)
        );
    }
}

fn format_chain_detail(chain: &ChainDefinition) {
    println!("{} ({})", chain.name, chain.id);
    if !chain.description.is_empty() {
        println!("  {}", chain.description);
    }
    if !chain.tags.is_empty() {
        println!("  tags: {}", chain.tags.join(", "));
    }
    if !chain.parameters.is_empty() {
        println!("Parameters:");
        for param in &chain.parameters {
            let required = if param.required { " (required)" } else { "" };
            println!("  {:<20} {}{}", param.name, param.label, required);
        }
    }
    println!("Steps:");
    for (index, step) in chain.steps.iter().enumerate() {
        println!(
            "  {:>2}. {:<8} {:<28} gate={:?} on_failure={:?} device={:?}",
            index + 1,
            chain.step_id(index),
            step.display_label(),
            step.gate,
            step.on_failure,
            step.device_source
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_lookup_ignores_case() {
        let first = builtin_templates().remove(0);
        let found = template_draft(&first.name.to_uppercase()).unwrap();
        assert_eq!(found.name, first.name);
    }

    #[test]
    fn unknown_template_is_an_error() {
        let err = template_draft("does not exist").unwrap_err();
        assert!(err.to_string().contains("unknown template"));
    }

    #[tokio::test]
    async fn drafts_load_from_yaml_and_json() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("chain.yaml");
        std::fs::write(
            &yaml,
            "name: Drain pool\nsteps:\n  - skill_name: pool-member-disable\n    gate: approve\n  - skill_name: pool-status\n",
        )
        .unwrap();
        let draft: ChainDraft = read_document(&yaml).await.unwrap();
        assert_eq!(draft.name, "Drain pool");
        assert_eq!(draft.steps.len(), 2);
        assert_eq!(draft.steps[0].gate, opschain_types::Gate::Approve);

        let json = dir.path().join("patch.json");
        std::fs::write(&json, r#"{"description": "nightly"}"#).unwrap();
        let patch: ChainPatch = read_document(&json).await.unwrap();
        assert_eq!(patch.description.as_deref(), Some("nightly"));
        assert!(patch.steps.is_none());
    }
}
