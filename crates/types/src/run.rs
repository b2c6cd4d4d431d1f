//! Chain run records.
//!
//! A [`Run`] is the durable state of one chain invocation. Its lifecycle
//! fields are private so every transition goes through a method that keeps the
//! record's invariants:
//!
//! - `current_step` never decreases;
//! - `step_results` holds at most one entry per step;
//! - `waiting_approval` implies `waiting_step` is set and that step has no result;
//! - a terminal run has `completed_at` set and is never changed again.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::chain::ChainDefinition;
use crate::execution::ExecutionStatus;
use crate::params::ParamMap;

/// Characters of combined output kept in a chain step result.
pub const OUTPUT_PREVIEW_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    WaitingApproval,
    Failed,
    Cancelled,
    Complete,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::WaitingApproval => "waiting_approval",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Complete => "complete",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Failed | RunStatus::Cancelled | RunStatus::Complete)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal states a run can be finished with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Complete,
    Failed,
    Cancelled,
}

impl From<RunOutcome> for RunStatus {
    fn from(outcome: RunOutcome) -> Self {
        match outcome {
            RunOutcome::Complete => RunStatus::Complete,
            RunOutcome::Failed => RunStatus::Failed,
            RunOutcome::Cancelled => RunStatus::Cancelled,
        }
    }
}

/// How approval gates are handled while a run advances.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum GateMode {
    /// Stop at `approve` gates and wait for an explicit resume.
    #[default]
    Pause,
    /// Treat every gate as approved.
    AutoApprove,
}

impl FromStr for GateMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "pause" => Ok(GateMode::Pause),
            "auto_approve" | "auto-approve" => Ok(GateMode::AutoApprove),
            other => Err(format!("unknown gate mode '{other}' (expected pause or auto_approve)")),
        }
    }
}

/// Operator decision on a paused run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResumeAction {
    #[default]
    Approve,
    Reject,
}

impl FromStr for ResumeAction {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "approve" => Ok(ResumeAction::Approve),
            "reject" => Ok(ResumeAction::Reject),
            other => Err(format!("unknown resume action '{other}' (expected approve or reject)")),
        }
    }
}

/// Context entry recorded for each executed chain step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepContextEntry {
    /// Combined skill output; a JSON object when the output parsed as one.
    pub output: Value,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub execution_id: Option<String>,
    #[serde(default)]
    pub device: String,
    #[serde(default)]
    pub analysis: Option<String>,
}

/// Template context shared by all steps of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RunContext {
    /// Chain parameters merged over cluster defaults.
    #[serde(default)]
    pub chain: ParamMap,
    /// Context entries keyed by step id.
    #[serde(default)]
    pub steps: BTreeMap<String, StepContextEntry>,
}

impl RunContext {
    pub fn new(chain: ParamMap) -> Self {
        Self {
            chain,
            steps: BTreeMap::new(),
        }
    }

    /// JSON tree `{chain, steps}` that template paths are walked against.
    pub fn to_value(&self) -> Value {
        let steps: serde_json::Map<String, Value> = self
            .steps
            .iter()
            .map(|(id, entry)| {
                (
                    id.clone(),
                    json!({
                        "output": entry.output,
                        "status": entry.status,
                        "execution_id": entry.execution_id,
                        "device": entry.device,
                        "analysis": entry.analysis,
                    }),
                )
            })
            .collect();
        json!({ "chain": self.chain, "steps": steps })
    }
}

/// Summarised outcome of one chain step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChainStepResult {
    pub step_id: String,
    pub skill_name: String,
    pub label: String,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub execution_id: Option<String>,
    /// First 500 characters of the combined output.
    #[serde(default)]
    pub output_preview: String,
    #[serde(default)]
    pub analysis: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub device: String,
    #[serde(default)]
    pub error: Option<String>,
}

impl ChainStepResult {
    /// A failed result for a step that never reached the executor.
    pub fn failed(step_id: impl Into<String>, skill_name: &str, label: &str, device: &str, error: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            skill_name: skill_name.to_string(),
            label: label.to_string(),
            status: ExecutionStatus::Failed,
            execution_id: None,
            output_preview: String::new(),
            analysis: None,
            duration_ms: 0,
            device: device.to_string(),
            error: Some(error.into()),
        }
    }
}

/// Truncate `text` to its first `OUTPUT_PREVIEW_CHARS` characters.
pub fn output_preview(text: &str) -> String {
    text.chars().take(OUTPUT_PREVIEW_CHARS).collect()
}

/// Durable state of a chain invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Run {
    pub id: String,
    pub automation_id: String,
    pub automation_name: String,
    status: RunStatus,
    /// Parameters exactly as supplied by the caller.
    pub chain_params: ParamMap,
    current_step: usize,
    pub total_steps: usize,
    step_results: Vec<ChainStepResult>,
    pub started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    waiting_step: Option<usize>,
    pub context: RunContext,
}

impl Run {
    /// Create a new run in the `running` state.
    pub fn start(id: impl Into<String>, chain: &ChainDefinition, chain_params: ParamMap, context: RunContext) -> Self {
        Self {
            id: id.into(),
            automation_id: chain.id.clone(),
            automation_name: chain.name.clone(),
            status: RunStatus::Running,
            chain_params,
            current_step: 0,
            total_steps: chain.steps.len(),
            step_results: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
            waiting_step: None,
            context,
        }
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// One-based index of the step most recently entered.
    pub fn current_step(&self) -> usize {
        self.current_step
    }

    pub fn step_results(&self) -> &[ChainStepResult] {
        &self.step_results
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Zero-based index of the step waiting for approval.
    pub fn waiting_step(&self) -> Option<usize> {
        self.waiting_step
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Record that step `index` (zero-based) is being entered.
    pub fn enter_step(&mut self, index: usize) {
        self.current_step = self.current_step.max(index + 1);
    }

    /// Pause in front of step `index` until an operator resumes the run.
    ///
    /// Returns `false` when the run is not running.
    pub fn pause_at(&mut self, index: usize) -> bool {
        if self.status != RunStatus::Running {
            return false;
        }
        self.status = RunStatus::WaitingApproval;
        self.waiting_step = Some(index);
        true
    }

    /// Leave `waiting_approval` and return the step index to resume from.
    pub fn take_approval(&mut self) -> Option<usize> {
        if self.status != RunStatus::WaitingApproval {
            return None;
        }
        self.status = RunStatus::Running;
        Some(self.waiting_step.take().unwrap_or_default())
    }

    /// Append a step result, and its context entry when the executor ran.
    ///
    /// Returns `false` (recording nothing) once every step has a result.
    pub fn record_step(&mut self, result: ChainStepResult, entry: Option<StepContextEntry>) -> bool {
        if self.step_results.len() >= self.total_steps {
            return false;
        }
        if let Some(entry) = entry {
            self.context.steps.insert(result.step_id.clone(), entry);
        }
        self.step_results.push(result);
        true
    }

    /// Move into a terminal state and stamp `completed_at`.
    ///
    /// Returns `false` when the run is already terminal.
    pub fn finish(&mut self, outcome: RunOutcome) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = outcome.into();
        self.waiting_step = None;
        self.completed_at = Some(Utc::now());
        true
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            id: self.id.clone(),
            automation_id: self.automation_id.clone(),
            automation_name: self.automation_name.clone(),
            status: self.status,
            current_step: self.current_step,
            total_steps: self.total_steps,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

/// Run listing entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunSummary {
    pub id: String,
    pub automation_id: String,
    pub automation_name: String,
    pub status: RunStatus,
    pub current_step: usize,
    pub total_steps: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainDraft, ChainStep};

    fn chain(step_count: usize) -> ChainDefinition {
        let steps = (0..step_count).map(|index| ChainStep::new(format!("skill-{index}"), "")).collect();
        ChainDefinition::from_draft("chain001", ChainDraft::new("demo", steps), Utc::now())
    }

    fn result(step_id: &str) -> ChainStepResult {
        ChainStepResult::failed(step_id, "skill", "label", "bigip01", "boom")
    }

    #[test]
    fn current_step_never_moves_backwards() {
        let mut run = Run::start("run000000001", &chain(3), ParamMap::new(), RunContext::default());
        run.enter_step(2);
        run.enter_step(0);
        assert_eq!(run.current_step(), 3);
    }

    #[test]
    fn finished_runs_are_frozen() {
        let mut run = Run::start("run000000001", &chain(2), ParamMap::new(), RunContext::default());
        assert!(run.finish(RunOutcome::Failed));
        let completed_at = run.completed_at();
        assert!(completed_at.is_some());
        assert!(!run.finish(RunOutcome::Complete));
        assert_eq!(run.status(), RunStatus::Failed);
        assert_eq!(run.completed_at(), completed_at);
        assert!(!run.pause_at(1));
    }

    #[test]
    fn pause_and_approval_round_trip() {
        let mut run = Run::start("run000000001", &chain(2), ParamMap::new(), RunContext::default());
        assert!(run.pause_at(1));
        assert_eq!(run.status(), RunStatus::WaitingApproval);
        assert_eq!(run.waiting_step(), Some(1));
        assert_eq!(run.take_approval(), Some(1));
        assert_eq!(run.status(), RunStatus::Running);
        assert_eq!(run.waiting_step(), None);
        assert_eq!(run.take_approval(), None);
    }

    #[test]
    fn results_are_capped_at_total_steps() {
        let mut run = Run::start("run000000001", &chain(1), ParamMap::new(), RunContext::default());
        assert!(run.record_step(result("step-1"), None));
        assert!(!run.record_step(result("step-2"), None));
        assert_eq!(run.step_results().len(), 1);
    }

    #[test]
    fn serialized_run_uses_stored_field_names() {
        let mut run = Run::start("run000000001", &chain(2), ParamMap::new(), RunContext::default());
        run.pause_at(1);
        let value = serde_json::to_value(&run).unwrap();
        assert_eq!(value["status"], json!("waiting_approval"));
        assert_eq!(value["waiting_step"], json!(1));
        assert_eq!(value["automation_id"], json!("chain001"));
        assert_eq!(value["total_steps"], json!(2));
        assert_eq!(value["completed_at"], Value::Null);
        assert!(value["context"]["steps"].as_object().unwrap().is_empty());

        let restored: Run = serde_json::from_value(value).unwrap();
        assert_eq!(restored, run);
    }

    #[test]
    fn context_value_exposes_step_fields() {
        let mut context = RunContext::new(ParamMap::new());
        context.steps.insert(
            "step-1".into(),
            StepContextEntry {
                output: json!({"mgmt_ip": "10.0.0.5"}),
                status: ExecutionStatus::Complete,
                execution_id: Some("e1".into()),
                device: "bigip01".into(),
                analysis: None,
            },
        );
        let tree = context.to_value();
        assert_eq!(tree["steps"]["step-1"]["output"]["mgmt_ip"], json!("10.0.0.5"));
        assert_eq!(tree["steps"]["step-1"]["device"], json!("bigip01"));
        assert_eq!(tree["steps"]["step-1"]["status"], json!("complete"));
    }

    #[test]
    fn preview_counts_characters_not_bytes() {
        let text = "é".repeat(600);
        assert_eq!(output_preview(&text).chars().count(), OUTPUT_PREVIEW_CHARS);
    }
}
