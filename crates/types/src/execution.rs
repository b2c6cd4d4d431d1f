//! Skill execution records and the progress events of the streaming executor.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::params::ParamMap;

/// Lifecycle state of a skill execution or of one of its steps.
///
/// The executor only produces `running`, `analyzing`, `complete` and
/// `failed`; the other values are accepted for compatibility with stored
/// history records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    #[default]
    Pending,
    AwaitingApproval,
    Running,
    Analyzing,
    Complete,
    Failed,
    Cancelled,
    RolledBack,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::AwaitingApproval => "awaiting_approval",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Analyzing => "analyzing",
            ExecutionStatus::Complete => "complete",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
            ExecutionStatus::RolledBack => "rolled_back",
        }
    }

    /// Terminal states a chain's failure policy reacts to.
    pub fn is_failure(&self) -> bool {
        matches!(self, ExecutionStatus::Failed | ExecutionStatus::RolledBack)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request to run one skill against one device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ExecutionRequest {
    pub skill_name: String,
    pub device_hostname: String,
    #[serde(default)]
    pub parameters: ParamMap,
}

impl ExecutionRequest {
    pub fn new(skill_name: impl Into<String>, device_hostname: impl Into<String>, parameters: ParamMap) -> Self {
        Self {
            skill_name: skill_name.into(),
            device_hostname: device_hostname.into(),
            parameters,
        }
    }
}

/// Outcome of a single skill step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepResult {
    pub step_name: String,
    pub status: ExecutionStatus,
    /// Command text after template resolution.
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
}

/// Full record of one skill execution, persisted to the execution history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionResult {
    pub execution_id: String,
    pub skill_name: String,
    pub device_hostname: String,
    pub status: ExecutionStatus,
    /// Parameters as supplied by the caller, before any step forwarding.
    #[serde(default)]
    pub parameters: ParamMap,
    #[serde(default)]
    pub steps: Vec<StepResult>,
    #[serde(default)]
    pub analysis: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ExecutionResult {
    /// Start a new record in the `running` state.
    pub fn start(execution_id: impl Into<String>, request: &ExecutionRequest) -> Self {
        Self {
            execution_id: execution_id.into(),
            skill_name: request.skill_name.clone(),
            device_hostname: request.device_hostname.clone(),
            status: ExecutionStatus::Running,
            parameters: request.parameters.clone(),
            steps: Vec::new(),
            analysis: None,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
        }
    }

    /// Mark the execution failed with a top-level error and close it.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = ExecutionStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
    }

    /// Non-empty step outputs joined by newlines.
    pub fn combined_output(&self) -> String {
        self.steps
            .iter()
            .map(|step| step.output.as_str())
            .filter(|output| !output.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn total_duration_ms(&self) -> u64 {
        self.steps.iter().map(|step| step.duration_ms).sum()
    }

    pub fn summary(&self) -> ExecutionSummary {
        ExecutionSummary {
            execution_id: self.execution_id.clone(),
            skill_name: self.skill_name.clone(),
            device_hostname: self.device_hostname.clone(),
            status: self.status,
            step_count: self.steps.len(),
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

/// History listing entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionSummary {
    pub execution_id: String,
    pub skill_name: String,
    pub device_hostname: String,
    pub status: ExecutionStatus,
    pub step_count: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Progress events emitted by the streaming executor, in step order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    ExecutionStart {
        execution_id: String,
        skill_name: String,
        device_hostname: String,
        total_steps: usize,
    },
    StepStart {
        step_index: usize,
        step_name: String,
        step_label: String,
        total_steps: usize,
    },
    StepComplete {
        step_index: usize,
        step_name: String,
        status: ExecutionStatus,
        /// Output truncated to the first 2000 characters.
        output: String,
        error: Option<String>,
        duration_ms: u64,
        total_steps: usize,
    },
    Analyzing,
    ExecutionComplete {
        execution_id: String,
        status: ExecutionStatus,
        result: Box<ExecutionResult>,
    },
    Error {
        error: String,
    },
}
