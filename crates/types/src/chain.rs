//! Automation chain definitions.
//!
//! A chain sequences skills, each step carrying an approval gate, a failure
//! policy and a rule for picking the target device. Field names and enum
//! spellings are the stored record format and must not change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::params::ParamMap;

/// Chain parameter that names the target device when a step does not say otherwise.
pub const DEFAULT_DEVICE_PARAM: &str = "device";

/// Approval gate in front of a step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Gate {
    #[default]
    Auto,
    Approve,
}

/// What the orchestrator does when a step's skill fails.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// End the run as failed.
    #[default]
    Stop,
    /// Record the failure and continue with the next step.
    Skip,
}

/// Where a step takes its target device from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeviceSource {
    /// A named key of the chain parameter context.
    #[default]
    Parameter,
    /// A literal hostname on the step.
    Fixed,
    /// The device recorded by an earlier step.
    PreviousStep,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChainTrigger {
    #[default]
    Manual,
    Webhook,
    Alert,
}

/// One skill invocation within a chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChainStep {
    /// Step identifier; defaults to `step-{index+1}` on normalisation.
    #[serde(default)]
    pub id: String,
    pub skill_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,
    #[serde(default)]
    pub gate: Gate,
    #[serde(default)]
    pub on_failure: FailurePolicy,
    #[serde(default)]
    pub device_source: DeviceSource,
    #[serde(default = "default_device_param")]
    pub device_param: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_from_step: Option<String>,
    /// Explicit parameters; values may contain `{{chain.*}}` / `{{steps.*}}` templates.
    #[serde(default)]
    pub parameters: ParamMap,
    /// Additional templated mappings, applied after `parameters`.
    #[serde(default)]
    pub parameter_map: ParamMap,
}

impl ChainStep {
    pub fn new(skill_name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            skill_name: skill_name.into(),
            label: label.into(),
            gate: Gate::Auto,
            on_failure: FailurePolicy::Stop,
            device_source: DeviceSource::Parameter,
            device_param: default_device_param(),
            device_hostname: None,
            device_from_step: None,
            parameters: ParamMap::new(),
            parameter_map: ParamMap::new(),
        }
    }

    pub fn with_gate(mut self, gate: Gate) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_failure_policy(mut self, on_failure: FailurePolicy) -> Self {
        self.on_failure = on_failure;
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), Value::String(value.into()));
        self
    }

    pub fn with_mapping(mut self, key: impl Into<String>, template: impl Into<String>) -> Self {
        self.parameter_map.insert(key.into(), Value::String(template.into()));
        self
    }

    /// Target a literal hostname.
    pub fn on_device(mut self, hostname: impl Into<String>) -> Self {
        self.device_source = DeviceSource::Fixed;
        self.device_hostname = Some(hostname.into());
        self
    }

    /// Target whichever device an earlier step ran against.
    pub fn on_device_of(mut self, step_id: impl Into<String>) -> Self {
        self.device_source = DeviceSource::PreviousStep;
        self.device_from_step = Some(step_id.into());
        self
    }

    pub fn display_label(&self) -> &str {
        if self.label.is_empty() { &self.skill_name } else { &self.label }
    }
}

/// Declared chain input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(rename = "type", default = "default_param_type")]
    pub param_type: String,
    #[serde(default)]
    pub required: bool,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, label: impl Into<String>, param_type: impl Into<String>, required: bool) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            param_type: param_type.into(),
            required,
        }
    }
}

/// Stored chain definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChainDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub trigger: ChainTrigger,
    #[serde(default)]
    pub steps: Vec<ChainStep>,
    #[serde(default)]
    pub parameters: Vec<ParamSpec>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChainDefinition {
    /// Build a stored definition from a draft, normalising its steps.
    pub fn from_draft(id: impl Into<String>, draft: ChainDraft, now: DateTime<Utc>) -> Self {
        let mut steps = draft.steps;
        normalize_steps(&mut steps);
        Self {
            id: id.into(),
            name: draft.name,
            description: draft.description,
            tags: draft.tags,
            trigger: draft.trigger,
            steps,
            parameters: draft.parameters,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a partial update, re-normalise steps and bump `updated_at`.
    pub fn apply_patch(&mut self, patch: ChainPatch, now: DateTime<Utc>) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(tags) = patch.tags {
            self.tags = tags;
        }
        if let Some(trigger) = patch.trigger {
            self.trigger = trigger;
        }
        if let Some(steps) = patch.steps {
            self.steps = steps;
        }
        if let Some(parameters) = patch.parameters {
            self.parameters = parameters;
        }
        normalize_steps(&mut self.steps);
        self.updated_at = now;
    }

    /// Draft for a copy of this chain named `"<name> (Copy)"`.
    pub fn duplicate_draft(&self) -> ChainDraft {
        ChainDraft {
            name: format!("{} (Copy)", self.name),
            description: self.description.clone(),
            tags: self.tags.clone(),
            trigger: self.trigger,
            steps: self.steps.clone(),
            parameters: self.parameters.clone(),
        }
    }

    /// Identifier of the step at `index`.
    pub fn step_id(&self, index: usize) -> String {
        self.steps
            .get(index)
            .map(|step| step.id.clone())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| default_step_id(index))
    }

    pub fn summary(&self) -> ChainSummary {
        ChainSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            tags: self.tags.clone(),
            trigger: self.trigger,
            step_count: self.steps.len(),
            parameter_count: self.parameters.len(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Input for creating a chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChainDraft {
    #[serde(default = "default_chain_name")]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub trigger: ChainTrigger,
    #[serde(default)]
    pub steps: Vec<ChainStep>,
    #[serde(default)]
    pub parameters: Vec<ParamSpec>,
}

impl ChainDraft {
    pub fn new(name: impl Into<String>, steps: Vec<ChainStep>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            tags: Vec::new(),
            trigger: ChainTrigger::Manual,
            steps,
            parameters: Vec::new(),
        }
    }
}

/// Partial update; absent fields are left untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ChainPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub trigger: Option<ChainTrigger>,
    #[serde(default)]
    pub steps: Option<Vec<ChainStep>>,
    #[serde(default)]
    pub parameters: Option<Vec<ParamSpec>>,
}

/// Chain listing entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub trigger: ChainTrigger,
    pub step_count: usize,
    pub parameter_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Assign `step-N` ids to steps without one and restore an empty device parameter name.
pub fn normalize_steps(steps: &mut [ChainStep]) {
    for (index, step) in steps.iter_mut().enumerate() {
        if step.id.trim().is_empty() {
            step.id = default_step_id(index);
        }
        if step.device_param.trim().is_empty() {
            step.device_param = default_device_param();
        }
    }
}

pub fn default_step_id(index: usize) -> String {
    format!("step-{}", index + 1)
}

fn default_device_param() -> String {
    DEFAULT_DEVICE_PARAM.into()
}

fn default_param_type() -> String {
    "string".into()
}

fn default_chain_name() -> String {
    "Untitled".into()
}
