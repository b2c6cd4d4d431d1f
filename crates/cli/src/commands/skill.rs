//! Skill command handlers

use anyhow::{Context, Result, anyhow};
use clap::{Args, Subcommand};
use tokio::sync::mpsc;

use opschain_types::{ExecutionEvent, ExecutionRequest, ExecutionResult, SkillDefinition, SkillInfo};

use crate::app::App;
use crate::output::{OutputFormat, format_optional_time, format_time, handle_list, parse_params, print_json};

#[derive(Args)]
pub struct SkillArgs {
    #[command(subcommand)]
    pub command: SkillCommand,
}

#[derive(Subcommand)]
pub enum SkillCommand {
    /// List skills in the skills directory
    List {},
    /// Show a skill's parameters and steps
    Show {
        /// Skill name
        name: String,
    },
    /// Execute a skill against one device
    Exec {
        /// Skill name
        name: String,
        /// Target device hostname
        #[arg(short, long)]
        device: String,
        /// Skill parameter, repeatable
        #[arg(short = 'p', long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
        /// Print progress events as the steps run
        #[arg(long)]
        stream: bool,
    },
}

pub async fn handle(command: SkillCommand, app: &App, format: OutputFormat) -> Result<()> {
    match command {
        SkillCommand::List {} => {
            let skills = app.skills.list()?;
            handle_list(format, &skills, "No skills found", format_skill_list)?;
        }

        SkillCommand::Show { name } => {
            let skill = app.skills.get(&name)?.ok_or_else(|| anyhow!("skill '{name}' not found"))?;
            match format {
                OutputFormat::Json => print_json(&skill)?,
                OutputFormat::Text => format_skill_detail(&skill),
            }
        }

        SkillCommand::Exec {
            name,
            device,
            params,
            stream,
        } => {
            let request = ExecutionRequest::new(name, device, parse_params(&params)?);
            let result = if stream {
                let (events, mut receiver) = mpsc::unbounded_channel();
                let executor = app.executor.clone();
                let task = tokio::spawn(async move { executor.execute_skill_streaming(request, events).await });
                while let Some(event) = receiver.recv().await {
                    print_event(&event, format)?;
                }
                task.await.context("skill execution task")?
            } else {
                app.executor.execute_skill(request).await
            };
            // The stream already ends with the full result.
            if !(stream && format == OutputFormat::Json) {
                print_execution(&result, format)?;
            }
        }
    }
    Ok(())
}

pub fn print_execution(result: &ExecutionResult, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(result),
        OutputFormat::Text => {
            format_execution_detail(result);
            Ok(())
        }
    }
}

fn print_event(event: &ExecutionEvent, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }
    match event {
        ExecutionEvent::ExecutionStart {
            execution_id,
            skill_name,
            device_hostname,
            total_steps,
        } => println!("Execution {execution_id}: {skill_name} on {device_hostname} ({total_steps} steps)"),
        ExecutionEvent::StepStart {
            step_index,
            step_label,
            total_steps,
            ..
        } => println!("[{}/{}] {} ...", step_index + 1, total_steps, step_label),
        ExecutionEvent::StepComplete {
            step_index,
            step_name,
            status,
            error,
            duration_ms,
            total_steps,
            ..
        } => {
            println!("[{}/{}] {} {} ({} ms)", step_index + 1, total_steps, step_name, status, duration_ms);
            if let Some(error) = error {
                println!("      {error}");
            }
        }
        ExecutionEvent::Analyzing => println!("Analyzing output ..."),
        ExecutionEvent::ExecutionComplete { execution_id, status, .. } => println!("Execution {execution_id} {status}"),
        ExecutionEvent::Error { error } => println!("Error: {error}"),
    }
    Ok(())
}

fn format_skill_list(skills: &[SkillInfo]) {
    println!("{:<32} {:<10} {:>5}  TRANSPORTS", "NAME", "PRODUCT", "STEPS");
    for skill in skills {
        println!(
            "{:<32} {:<10} {:>5}  {}",
            skill.name,
            skill.product,
            skill.step_count,
            skill.transports.join(",")
        );
    }
}

fn format_skill_detail(skill: &SkillDefinition) {
    println!("{} v{} ({})", skill.name, skill.version, skill.product);
    if !skill.description.is_empty() {
        println!("  {}", skill.description);
    }
    if !skill.parameters.is_empty() {
        println!("Parameters:");
        for param in &skill.parameters {
            let required = if param.required { " (required)" } else { "" };
            println!("  {:<20} {:<8} {}{}", param.name, param.param_type, param.label, required);
        }
    }
    println!("Steps:");
    for (index, step) in skill.steps.iter().enumerate() {
        println!("  {:>2}. {:<28} [{}] {}", index + 1, step.display_label(), step.transport.as_str(), step.command_template);
    }
    if skill.analysis.is_active() {
        println!("Analysis: {}", skill.analysis.model);
    }
}

fn format_execution_detail(result: &ExecutionResult) {
    println!(
        "Execution {}: {} on {} {}",
        result.execution_id, result.skill_name, result.device_hostname, result.status
    );
    println!("  started:   {}", format_time(result.started_at));
    println!("  completed: {}", format_optional_time(result.completed_at));
    for step in &result.steps {
        println!("=== {} [{}] ({} ms) ===", step.step_name, step.status, step.duration_ms);
        if !step.output.is_empty() {
            println!("{}", step.output);
        }
        if let Some(error) = &step.error {
            println!("error: {error}");
        }
    }
    if let Some(error) = &result.error {
        println!("Error: {error}");
    }
    if let Some(analysis) = &result.analysis {
        println!("Analysis:\n{analysis}");
    }
}
