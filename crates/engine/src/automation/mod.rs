//! Automation chain orchestration.
//!
//! A chain run walks the chain's steps in order. Each step resolves its
//! device and parameters from the run context, runs one skill, and records a
//! summary plus a context entry that later steps can template against.
//! Approval gates pause the run durably; [`Orchestrator::resume_chain_run`]
//! picks it up again from the gated step.
//!
//! The run record is saved after every transition, so a crash leaves the
//! last completed step on disk.


use std::sync::Arc;

use serde_json::Value;
use tracing::{error, info, warn};

use opschain_types::chain::DEFAULT_DEVICE_PARAM;
use opschain_types::params::non_empty_text;
use opschain_types::run::output_preview;
use opschain_types::{
    ChainDefinition, ChainStep, ChainStepResult, DeviceSource, ExecutionRequest, ExecutionResult, FailurePolicy, Gate, GateMode, ParamMap,
    ResumeAction, Run, RunContext, RunOutcome, RunStatus, StepContextEntry,
};
use opschain_util::{ChainStore, ClusterPool, RunStore, StoreError, new_run_id};

use crate::error::EngineError;
use crate::executor::SkillRunner;
use crate::resolve::resolve_value;

/// Chain parameter naming a cluster whose settings seed the run context.
pub const CLUSTER_ID_PARAM: &str = "cluster_id";

/// Error text recorded when a step's device cannot be determined.
pub const UNRESOLVED_DEVICE_ERROR: &str = "Could not resolve device";

/// Drives chain runs from start to pause or completion.
pub struct Orchestrator {
    chains: Arc<dyn ChainStore>,
    runs: Arc<dyn RunStore>,
    clusters: Arc<dyn ClusterPool>,
    runner: Arc<dyn SkillRunner>,
}

impl Orchestrator {
    pub fn new(chains: Arc<dyn ChainStore>, runs: Arc<dyn RunStore>, clusters: Arc<dyn ClusterPool>, runner: Arc<dyn SkillRunner>) -> Self {
        Self {
            chains,
            runs,
            clusters,
            runner,
        }
    }

    /// Start a new run of `chain_id`.
    ///
    /// Returns once the run completes, fails, or pauses at an approval gate.
    /// Step failures are recorded on the returned run; `Err` means no run
    /// could be started.
    pub async fn execute_chain(&self, chain_id: &str, chain_params: ParamMap, gate_mode: GateMode) -> Result<Run, EngineError> {
        let chain = self
            .chains
            .get(chain_id)?
            .ok_or_else(|| EngineError::ChainNotFound(chain_id.to_string()))?;

        let context = RunContext::new(self.seed_context(&chain_params)?);
        let mut run = Run::start(new_run_id(), &chain, chain_params, context);
        self.runs.save(&run)?;
        info!(run_id = %run.id, chain = %chain.id, steps = chain.steps.len(), gate_mode = ?gate_mode, "starting chain run");

        self.advance(&chain, &mut run, 0, None, gate_mode).await;
        Ok(run)
    }

    /// Continue or cancel a run paused at an approval gate.
    ///
    /// Approval re-enters the step loop at the gated step in pause mode, so a
    /// later gate pauses the run again. The claim on the run is atomic in the
    /// store: a second concurrent resume fails with
    /// [`EngineError::ResumeConflict`].
    pub async fn resume_chain_run(&self, run_id: &str, action: ResumeAction) -> Result<Run, EngineError> {
        let stored = self.runs.get(run_id)?.ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;
        if stored.status() != RunStatus::WaitingApproval {
            return Err(EngineError::NotWaitingApproval { status: stored.status() });
        }

        // Checked before claiming so a missing chain leaves the run paused.
        let chain = match action {
            ResumeAction::Approve => Some(
                self.chains
                    .get(&stored.automation_id)?
                    .ok_or_else(|| EngineError::ChainNotFound(stored.automation_id.clone()))?,
            ),
            ResumeAction::Reject => None,
        };

        let (mut run, resume_index) = self.runs.claim_for_resume(run_id).map_err(|err| match err {
            StoreError::NotFound(_) => EngineError::RunNotFound(run_id.to_string()),
            StoreError::Conflict { .. } => EngineError::ResumeConflict(run_id.to_string()),
            other => EngineError::Store(other),
        })?;

        let Some(chain) = chain else {
            run.finish(RunOutcome::Cancelled);
            self.persist(&run);
            info!(run_id = %run.id, "run rejected");
            return Ok(run);
        };

        info!(run_id = %run.id, step = resume_index + 1, "run approved, resuming");
        self.advance(&chain, &mut run, resume_index, Some(resume_index), GateMode::Pause).await;
        Ok(run)
    }

    /// Chain parameters over the flattened settings of `cluster_id`, when given.
    fn seed_context(&self, chain_params: &ParamMap) -> Result<ParamMap, EngineError> {
        let Some(cluster_id) = non_empty_text(chain_params, CLUSTER_ID_PARAM) else {
            return Ok(chain_params.clone());
        };
        match self.clusters.flattened_params(&cluster_id) {
            Ok(Some(mut seeded)) => {
                seeded.extend(chain_params.clone());
                Ok(seeded)
            }
            Ok(None) => {
                warn!(%cluster_id, "cluster not found, running without cluster defaults");
                Ok(chain_params.clone())
            }
            Err(err) => Err(EngineError::Collaborator(format!("cluster pool: {err}"))),
        }
    }

    /// The step loop shared by new and resumed runs.
    ///
    /// `resumed_at` is the gated step an operator just approved; its gate is
    /// not checked again.
    async fn advance(&self, chain: &ChainDefinition, run: &mut Run, start: usize, resumed_at: Option<usize>, gate_mode: GateMode) {
        for (index, step) in chain.steps.iter().enumerate().skip(start) {
            if run.is_terminal() {
                warn!(run_id = %run.id, status = %run.status(), "run already finished, not advancing");
                return;
            }
            let step_id = chain.step_id(index);
            run.enter_step(index);
            self.persist(run);

            if step.gate == Gate::Approve && gate_mode == GateMode::Pause && resumed_at != Some(index) {
                run.pause_at(index);
                self.persist(run);
                info!(run_id = %run.id, step = index + 1, skill = %step.skill_name, "run paused for approval");
                return;
            }

            let failed = match resolve_device(step, &run.context) {
                Some(device) => self.run_step(run, step, step_id, device).await,
                None => {
                    warn!(run_id = %run.id, step = %step_id, "could not resolve device");
                    let result = ChainStepResult::failed(step_id, &step.skill_name, step.display_label(), "", UNRESOLVED_DEVICE_ERROR);
                    run.record_step(result, None);
                    true
                }
            };

            if failed {
                match step.on_failure {
                    FailurePolicy::Stop => {
                        run.finish(RunOutcome::Failed);
                        self.persist(run);
                        info!(run_id = %run.id, step = index + 1, "run failed");
                        return;
                    }
                    FailurePolicy::Skip => info!(run_id = %run.id, step = index + 1, "step failed, skipping"),
                }
            }
            self.persist(run);
        }

        if run.finish(RunOutcome::Complete) {
            info!(run_id = %run.id, steps = run.step_results().len(), "run complete");
        }
        self.persist(run);
    }

    /// Run one step's skill and record its outcome. Returns `true` when it failed.
    async fn run_step(&self, run: &mut Run, step: &ChainStep, step_id: String, device: String) -> bool {
        let params = step_params(step, &run.context);
        info!(
            run_id = %run.id,
            step = %step_id,
            skill = %step.skill_name,
            device = %device,
            "running chain step"
        );

        let request = ExecutionRequest::new(step.skill_name.clone(), device.clone(), params);
        match self.runner.run_skill(request).await {
            Ok(result) => {
                let failed = result.status.is_failure();
                let (summary, entry) = summarize(step_id, step, &device, &result);
                run.record_step(summary, Some(entry));
                failed
            }
            Err(err) => {
                error!(run_id = %run.id, step = %step_id, error = %err, "step raised an error");
                let result = ChainStepResult::failed(step_id, &step.skill_name, step.display_label(), &device, err.to_string());
                run.record_step(result, None);
                true
            }
        }
    }

    /// Save the run; failures are logged and the run carries on in memory.
    fn persist(&self, run: &Run) {
        if let Err(err) = self.runs.save(run) {
            error!(run_id = %run.id, status = %run.status(), error = %err, "failed to persist run");
        }
    }
}

/// Device a step runs against, or `None` when it cannot be determined.
pub fn resolve_device(step: &ChainStep, context: &RunContext) -> Option<String> {
    let device = match step.device_source {
        DeviceSource::Fixed => step.device_hostname.clone(),
        DeviceSource::PreviousStep => step
            .device_from_step
            .as_ref()
            .and_then(|step_id| context.steps.get(step_id))
            .map(|entry| entry.device.clone()),
        DeviceSource::Parameter => {
            let key = if step.device_param.is_empty() { DEFAULT_DEVICE_PARAM } else { step.device_param.as_str() };
            non_empty_text(&context.chain, key)
        }
    };
    device.filter(|device| !device.trim().is_empty())
}

/// Every chain parameter, overlaid with the step's resolved `parameters` and
/// then its `parameter_map`.
pub fn step_params(step: &ChainStep, context: &RunContext) -> ParamMap {
    let tree = context.to_value();
    let mut params = context.chain.clone();
    for (key, template) in step.parameters.iter().chain(&step.parameter_map) {
        params.insert(key.clone(), resolve_value(template, &tree));
    }
    params
}

fn summarize(step_id: String, step: &ChainStep, device: &str, result: &ExecutionResult) -> (ChainStepResult, StepContextEntry) {
    let combined = result.combined_output();
    let summary = ChainStepResult {
        step_id,
        skill_name: step.skill_name.clone(),
        label: step.display_label().to_string(),
        status: result.status,
        execution_id: Some(result.execution_id.clone()),
        output_preview: output_preview(&combined),
        analysis: result.analysis.clone(),
        duration_ms: result.total_duration_ms(),
        device: device.to_string(),
        error: result.error.clone(),
    };
    let output = match serde_json::from_str::<Value>(&combined) {
        Ok(parsed @ Value::Object(_)) => parsed,
        _ => Value::String(combined),
    };
    let entry = StepContextEntry {
        output,
        status: result.status,
        execution_id: Some(result.execution_id.clone()),
        device: device.to_string(),
        analysis: result.analysis.clone(),
    };
    (summary, entry)
}
