//! Skill definitions as authored in the on-disk catalog.
//!
//! A skill is an ordered list of remote-command steps plus safety and analysis
//! metadata. Definitions are loaded fresh for every execution and never mutated
//! by the engine; the serialized field names match the YAML blocks found in
//! `SKILL.md` files.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Timeout applied to a step that does not declare one.
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 30;

/// Model requested for analysis when a skill does not name one.
pub const DEFAULT_ANALYSIS_MODEL: &str = "claude-sonnet-4-20250514";

/// Transport family a step is dispatched through.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Remote shell over SSH.
    #[default]
    Ssh,
    /// Device REST call parsed as `METHOD /endpoint {json}`.
    IcontrolRest,
    /// Shell command wrapped in the device REST bash endpoint.
    IcontrolBash,
    /// Hypervisor REST call, or the local administrative API for `/api/` endpoints.
    ProxmoxApi,
    /// Any transport name this build does not know; dispatched over SSH.
    #[serde(other)]
    Unknown,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Ssh => "ssh",
            TransportKind::IcontrolRest => "icontrol_rest",
            TransportKind::IcontrolBash => "icontrol_bash",
            TransportKind::ProxmoxApi => "proxmox_api",
            TransportKind::Unknown => "unknown",
        }
    }

    /// True for transports that authenticate with the device REST credential pair.
    pub fn uses_rest_credentials(&self) -> bool {
        matches!(self, TransportKind::IcontrolRest | TransportKind::IcontrolBash)
    }
}

/// Host override applied to a single step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepTarget {
    /// A freshly provisioned replica whose address lives in the running parameters.
    Replica,
    /// The hypervisor host itself (SSH only).
    Proxmox,
    /// The device the skill was invoked against; also any unrecognised target.
    #[default]
    #[serde(other)]
    Device,
}

impl StepTarget {
    pub fn is_device(&self) -> bool {
        matches!(self, StepTarget::Device)
    }
}

/// One remote command within a skill.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepDefinition {
    /// Step identifier, unique within the skill.
    #[serde(default = "default_step_name")]
    pub name: String,
    /// Human-readable label; falls back to `name` when empty.
    #[serde(default, deserialize_with = "null_as_default")]
    pub label: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub transport: TransportKind,
    /// Command text with `{{param}}` placeholders.
    #[serde(default, deserialize_with = "null_as_default")]
    pub command_template: String,
    /// Per-step deadline in seconds.
    #[serde(default = "default_step_timeout", deserialize_with = "timeout_or_default")]
    pub timeout: u64,
    /// Keep executing later steps when this one fails.
    #[serde(default, deserialize_with = "null_as_default")]
    pub continue_on_fail: bool,
    #[serde(default, skip_serializing_if = "StepTarget::is_device", deserialize_with = "null_as_default")]
    pub target: StepTarget,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl StepDefinition {
    pub fn new(name: impl Into<String>, transport: TransportKind, command_template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: String::new(),
            transport,
            command_template: command_template.into(),
            timeout: DEFAULT_STEP_TIMEOUT_SECS,
            continue_on_fail: false,
            target: StepTarget::Device,
            rollback_command: None,
            description: None,
        }
    }

    pub fn display_label(&self) -> &str {
        if self.label.trim().is_empty() { &self.name } else { &self.label }
    }
}

/// Safety metadata declared by a skill.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkillSafety {
    #[serde(default = "default_true")]
    pub requires_approval: bool,
    /// Maximum total execution time in seconds.
    #[serde(default = "default_max_duration")]
    pub max_duration: u64,
    #[serde(default)]
    pub destructive: bool,
    #[serde(default)]
    pub rollback_enabled: bool,
}

impl Default for SkillSafety {
    fn default() -> Self {
        Self {
            requires_approval: true,
            max_duration: default_max_duration(),
            destructive: false,
            rollback_enabled: false,
        }
    }
}

/// Post-execution analysis configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkillAnalysis {
    #[serde(default)]
    pub enabled: bool,
    /// Prompt with `{{output}}` and `{{params}}` placeholders.
    #[serde(default)]
    pub prompt_template: String,
    #[serde(default = "default_analysis_model")]
    pub model: String,
}

impl Default for SkillAnalysis {
    fn default() -> Self {
        Self {
            enabled: false,
            prompt_template: String::new(),
            model: default_analysis_model(),
        }
    }
}

impl SkillAnalysis {
    /// Analysis runs only when enabled with a non-empty prompt.
    pub fn is_active(&self) -> bool {
        self.enabled && !self.prompt_template.is_empty()
    }
}

/// Declared skill input shown to operators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SkillParam {
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(rename = "type", alias = "param_type", default = "default_param_type")]
    pub param_type: String,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_regex: Option<String>,
}

/// Full skill definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SkillDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_product")]
    pub product: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Raw frontmatter `metadata` block, in authoring order.
    #[serde(default)]
    pub metadata: IndexMap<String, Value>,
    #[serde(default)]
    pub parameters: Vec<SkillParam>,
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
    #[serde(default)]
    pub safety: SkillSafety,
    #[serde(default)]
    pub analysis: SkillAnalysis,
}

impl SkillDefinition {
    pub fn new(name: impl Into<String>, steps: Vec<StepDefinition>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            product: default_product(),
            version: default_version(),
            author: None,
            tags: Vec::new(),
            metadata: IndexMap::new(),
            parameters: Vec::new(),
            steps,
            safety: SkillSafety::default(),
            analysis: SkillAnalysis::default(),
        }
    }

    /// Listing summary for this definition.
    pub fn info(&self) -> SkillInfo {
        let transports: BTreeSet<&str> = self.steps.iter().map(|step| step.transport.as_str()).collect();
        SkillInfo {
            name: self.name.clone(),
            description: self.description.clone(),
            product: self.product.clone(),
            version: self.version.clone(),
            author: self.author.clone(),
            tags: self.tags.clone(),
            parameter_count: self.parameters.len(),
            step_count: self.steps.len(),
            requires_approval: self.safety.requires_approval,
            has_analysis: self.analysis.enabled,
            transports: transports.into_iter().map(str::to_string).collect(),
            destructive: self.safety.destructive,
        }
    }
}

/// Catalog listing entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkillInfo {
    pub name: String,
    pub description: String,
    pub product: String,
    pub version: String,
    pub author: Option<String>,
    pub tags: Vec<String>,
    pub parameter_count: usize,
    pub step_count: usize,
    pub requires_approval: bool,
    pub has_analysis: bool,
    pub transports: Vec<String>,
    pub destructive: bool,
}

fn default_step_name() -> String {
    "unknown".into()
}

fn default_step_timeout() -> u64 {
    DEFAULT_STEP_TIMEOUT_SECS
}

/// Blank YAML keys (`label:`) deserialize as `null`; read them as absent.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn timeout_or_default<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    Ok(Option::<u64>::deserialize(deserializer)?.unwrap_or(DEFAULT_STEP_TIMEOUT_SECS))
}

fn default_max_duration() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_analysis_model() -> String {
    DEFAULT_ANALYSIS_MODEL.into()
}

fn default_param_type() -> String {
    "string".into()
}

fn default_product() -> String {
    "unknown".into()
}

fn default_version() -> String {
    "1.0".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_defaults_apply_when_fields_are_missing() {
        let yaml = r#"
- name: show_vs
  command_template: "tmsh list ltm virtual {{virtual_server}}"
- name: bash
  transport: icontrol_bash
  timeout: 90
  continue_on_fail: true
  target: replica
"#;
        let steps: Vec<StepDefinition> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(steps[0].transport, TransportKind::Ssh);
        assert_eq!(steps[0].timeout, DEFAULT_STEP_TIMEOUT_SECS);
        assert_eq!(steps[0].target, StepTarget::Device);
        assert_eq!(steps[0].display_label(), "show_vs");
        assert_eq!(steps[1].transport, TransportKind::IcontrolBash);
        assert_eq!(steps[1].timeout, 90);
        assert!(steps[1].continue_on_fail);
        assert_eq!(steps[1].target, StepTarget::Replica);
    }

    #[test]
    fn unknown_transport_and_target_do_not_reject_the_skill() {
        let yaml = r#"
name: nginx_status
transport: nginx_api
target: ""
command_template: "GET /api/9/nginx"
"#;
        let step: StepDefinition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(step.transport, TransportKind::Unknown);
        assert_eq!(step.target, StepTarget::Device);
    }

    #[test]
    fn blank_and_missing_targets_mean_the_device() {
        let yaml = r#"
- name: replica_check
  command_template: "tmsh show sys failover"
  target: replica
- name: blank_target
  command_template: "uptime"
  target: ""
- name: no_target
  command_template: "uptime"
- name: null_fields
  label:
  description:
  timeout:
  target:
  command_template: "tmsh show sys version"
"#;
        let steps: Vec<StepDefinition> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(steps.len(), 4);
        assert_eq!(steps[0].target, StepTarget::Replica);
        assert_eq!(steps[1].target, StepTarget::Device);
        assert_eq!(steps[2].target, StepTarget::Device);
        assert_eq!(steps[3].target, StepTarget::Device);
        assert_eq!(steps[3].timeout, DEFAULT_STEP_TIMEOUT_SECS);
        assert_eq!(steps[3].display_label(), "null_fields");
        assert_eq!(steps[3].description, None);
    }

    #[test]
    fn non_device_targets_survive_serialization() {
        let mut step = StepDefinition::new("hv", TransportKind::Ssh, "qm list");
        step.target = StepTarget::Proxmox;
        let value = serde_json::to_value(&step).unwrap();
        assert_eq!(value["target"], "proxmox");
        let restored: StepDefinition = serde_json::from_value(value).unwrap();
        assert_eq!(restored, step);

        let device = serde_json::to_value(StepDefinition::new("show", TransportKind::Ssh, "uptime")).unwrap();
        assert!(device.get("target").is_none());
    }

    #[test]
    fn analysis_requires_enabled_flag_and_prompt() {
        let mut analysis = SkillAnalysis::default();
        assert!(!analysis.is_active());
        analysis.enabled = true;
        assert!(!analysis.is_active());
        analysis.prompt_template = "Summarise {{output}}".into();
        assert!(analysis.is_active());
    }

    #[test]
    fn info_collects_sorted_unique_transports() {
        let mut skill = SkillDefinition::new(
            "bigip-ve-provision",
            vec![
                StepDefinition::new("clone", TransportKind::ProxmoxApi, "POST /nodes/pve01/qemu/9000/clone {}"),
                StepDefinition::new("wait", TransportKind::Ssh, "sleep 5"),
                StepDefinition::new("start", TransportKind::ProxmoxApi, "POST /nodes/pve01/qemu/110/status/start"),
            ],
        );
        skill.safety.destructive = true;
        let info = skill.info();
        assert_eq!(info.step_count, 3);
        assert_eq!(info.transports, vec!["proxmox_api".to_string(), "ssh".to_string()]);
        assert!(info.destructive);
        assert!(info.requires_approval);
    }
}
