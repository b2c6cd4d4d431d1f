//! Skill execution.
//!
//! [`SkillExecutor`] runs every step of one skill against one device, in
//! order. Steps see a running parameter map: the request parameters plus
//! every JSON object a previous step printed. The streaming entry point runs
//! the same loop and reports progress as [`ExecutionEvent`]s.

mod dispatch;


use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

use opschain_api::{Analyzer, CredentialStore, Transport};
use opschain_types::{
    DeviceCredentials, ExecutionEvent, ExecutionRequest, ExecutionResult, ExecutionStatus, ParamMap, SkillDefinition, StepDefinition,
    StepResult, TransportKind,
};
use opschain_util::{ExecutionHistory, SkillCatalog, new_execution_id, redact_sensitive, truncate_chars};

use crate::templates::resolve_command;
use dispatch::{DeviceTarget, build_request, select_connection};

/// Characters of step output carried by a `step_complete` event.
pub const EVENT_OUTPUT_CHARS: usize = 2000;

/// Runs a skill for the chain orchestrator.
///
/// The executor itself never fails: problems come back inside the result.
/// The `Err` path exists for runners that can lose contact with their
/// backend, and the orchestrator treats it like a failed execution.
#[async_trait]
pub trait SkillRunner: Send + Sync {
    async fn run_skill(&self, request: ExecutionRequest) -> Result<ExecutionResult>;
}

/// Executes skills against devices.
pub struct SkillExecutor {
    catalog: Arc<dyn SkillCatalog>,
    credentials: Arc<dyn CredentialStore>,
    transport: Arc<dyn Transport>,
    analyzer: Arc<dyn Analyzer>,
    history: Arc<dyn ExecutionHistory>,
}

/// What happens after a step.
enum StepFlow {
    Continue,
    Stop(String),
}

impl SkillExecutor {
    pub fn new(
        catalog: Arc<dyn SkillCatalog>,
        credentials: Arc<dyn CredentialStore>,
        transport: Arc<dyn Transport>,
        analyzer: Arc<dyn Analyzer>,
        history: Arc<dyn ExecutionHistory>,
    ) -> Self {
        Self {
            catalog,
            credentials,
            transport,
            analyzer,
            history,
        }
    }

    /// Run `request` to completion and append the result to the history.
    pub async fn execute_skill(&self, request: ExecutionRequest) -> ExecutionResult {
        self.execute(request, None).await
    }

    /// Same as [`execute_skill`](Self::execute_skill), reporting progress on `events`.
    ///
    /// The final event is always `execution_complete`, carrying the returned
    /// result. A closed receiver does not stop the execution.
    pub async fn execute_skill_streaming(&self, request: ExecutionRequest, events: UnboundedSender<ExecutionEvent>) -> ExecutionResult {
        self.execute(request, Some(&events)).await
    }

    async fn execute(&self, request: ExecutionRequest, events: Option<&UnboundedSender<ExecutionEvent>>) -> ExecutionResult {
        let mut result = ExecutionResult::start(new_execution_id(), &request);
        info!(
            execution_id = %result.execution_id,
            skill = %request.skill_name,
            device = %request.device_hostname,
            "starting skill execution"
        );

        let skill = match self.load_skill(&request.skill_name) {
            Ok(skill) => skill,
            Err(message) => return self.abort(result, message, events),
        };
        let credentials = match self.load_credentials(&request.device_hostname).await {
            Ok(credentials) => credentials,
            Err(message) => return self.abort(result, message, events),
        };
        let device = DeviceTarget::new(&credentials, &request.device_hostname);

        let total_steps = skill.steps.len();
        emit(
            events,
            ExecutionEvent::ExecutionStart {
                execution_id: result.execution_id.clone(),
                skill_name: request.skill_name.clone(),
                device_hostname: request.device_hostname.clone(),
                total_steps,
            },
        );

        let mut running = request.parameters.clone();
        let mut output_blocks = Vec::with_capacity(total_steps);
        for (step_index, step) in skill.steps.iter().enumerate() {
            emit(
                events,
                ExecutionEvent::StepStart {
                    step_index,
                    step_name: step.name.clone(),
                    step_label: step.display_label().to_string(),
                    total_steps,
                },
            );

            let (step_result, flow) = self.run_step(step, &device, &mut running, &mut output_blocks).await;
            emit(
                events,
                ExecutionEvent::StepComplete {
                    step_index,
                    step_name: step_result.step_name.clone(),
                    status: step_result.status,
                    output: truncate_chars(&step_result.output, EVENT_OUTPUT_CHARS).to_string(),
                    error: step_result.error.clone(),
                    duration_ms: step_result.duration_ms,
                    total_steps,
                },
            );
            result.steps.push(step_result);

            if let StepFlow::Stop(message) = flow {
                warn!(execution_id = %result.execution_id, step = %step.name, error = %message, "skill execution stopped");
                result.status = ExecutionStatus::Failed;
                result.error = Some(message);
                break;
            }
        }

        if result.status != ExecutionStatus::Failed {
            result.status = ExecutionStatus::Complete;
            if skill.analysis.is_active() {
                result.status = ExecutionStatus::Analyzing;
                emit(events, ExecutionEvent::Analyzing);
                let combined = output_blocks.join("\n\n");
                result.analysis = self.analyzer.analyze(&combined, &request.parameters, &skill.analysis).await;
                result.status = ExecutionStatus::Complete;
            }
        }

        self.finish(result, events)
    }

    fn load_skill(&self, name: &str) -> Result<SkillDefinition, String> {
        match self.catalog.get(name) {
            Ok(Some(skill)) => Ok(skill),
            Ok(None) => Err(format!("Skill '{name}' not found")),
            Err(err) => {
                error!(skill = %name, error = %err, "failed to load skill");
                Err(format!("Skill '{name}' could not be loaded: {err}"))
            }
        }
    }

    async fn load_credentials(&self, hostname: &str) -> Result<DeviceCredentials, String> {
        match self.credentials.get(hostname).await {
            Ok(Some(credentials)) => Ok(credentials),
            Ok(None) => Err(format!("No credentials found for device '{hostname}'")),
            Err(err) => {
                error!(device = %hostname, error = %err, "credential lookup failed");
                Err(format!("No credentials found for device '{hostname}'"))
            }
        }
    }

    /// Resolve, dispatch and record one step.
    async fn run_step(
        &self,
        step: &StepDefinition,
        device: &DeviceTarget<'_>,
        running: &mut ParamMap,
        output_blocks: &mut Vec<String>,
    ) -> (StepResult, StepFlow) {
        if step.transport == TransportKind::Unknown {
            warn!(step = %step.name, "unknown transport, running the step over ssh");
        }
        let command = resolve_command(&step.command_template, running, step.transport);
        let connection = select_connection(step, device, running);
        let request = build_request(step, &command, connection, device, running);
        debug!(step = %step.name, transport = request.kind(), host = request.host(), command = %redact_sensitive(&command), "running step");

        let mut step_result = StepResult {
            step_name: step.name.clone(),
            status: ExecutionStatus::Running,
            command,
            output: String::new(),
            error: None,
            duration_ms: 0,
        };

        let started = Instant::now();
        let outcome = self.transport.run(request).await;
        step_result.duration_ms = started.elapsed().as_millis().try_into().unwrap_or(u64::MAX);

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                step_result.status = ExecutionStatus::Failed;
                step_result.error = Some(err.to_string());
                let message = format!("Step '{}' exception: {err}", step.name);
                return (step_result, StepFlow::Stop(message));
            }
        };

        step_result.output = outcome.output;
        step_result.error = outcome.error;
        step_result.status = if outcome.success { ExecutionStatus::Complete } else { ExecutionStatus::Failed };
        output_blocks.push(format!("=== {} ===\n{}", step.name, step_result.output));

        if outcome.success {
            forward_output(&step_result.output, running);
            return (step_result, StepFlow::Continue);
        }

        let error_text = step_result.error.clone().unwrap_or_else(|| "unknown error".to_string());
        if step.continue_on_fail {
            warn!(step = %step.name, error = %error_text, "step failed, continuing");
            step_result.output.push_str(&format!("\n[Step failed but allowed to continue: {error_text}]"));
            (step_result, StepFlow::Continue)
        } else {
            let message = format!("Step '{}' failed: {error_text}", step.name);
            (step_result, StepFlow::Stop(message))
        }
    }

    /// Fail before any step ran.
    fn abort(&self, mut result: ExecutionResult, message: String, events: Option<&UnboundedSender<ExecutionEvent>>) -> ExecutionResult {
        warn!(execution_id = %result.execution_id, error = %message, "skill execution aborted");
        emit(events, ExecutionEvent::Error { error: message.clone() });
        result.fail(message);
        self.finish(result, events)
    }

    fn finish(&self, mut result: ExecutionResult, events: Option<&UnboundedSender<ExecutionEvent>>) -> ExecutionResult {
        result.completed_at = Some(Utc::now());
        if let Err(err) = self.history.append(&result) {
            error!(execution_id = %result.execution_id, error = %err, "failed to record execution history");
        }
        info!(execution_id = %result.execution_id, status = %result.status, steps = result.steps.len(), "skill execution finished");
        emit(
            events,
            ExecutionEvent::ExecutionComplete {
                execution_id: result.execution_id.clone(),
                status: result.status,
                result: Box::new(result.clone()),
            },
        );
        result
    }
}

#[async_trait]
impl SkillRunner for SkillExecutor {
    async fn run_skill(&self, request: ExecutionRequest) -> Result<ExecutionResult> {
        Ok(self.execute_skill(request).await)
    }
}

fn emit(events: Option<&UnboundedSender<ExecutionEvent>>, event: ExecutionEvent) {
    if let Some(events) = events {
        let _ = events.send(event);
    }
}

/// Merge a JSON-object step output into the running parameters.
///
/// `vmid` is mirrored to `new_vmid` unless that key is already set.
fn forward_output(output: &str, running: &mut ParamMap) {
    let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(output) else {
        return;
    };
    let vmid = fields.get("vmid").cloned();
    running.extend(fields);
    if let Some(vmid) = vmid
        && !running.contains_key("new_vmid")
    {
        running.insert("new_vmid".into(), vmid);
    }
}
