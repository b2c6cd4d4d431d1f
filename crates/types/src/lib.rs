//! Shared data model for opschain: skill definitions, execution records,
//! automation chains and chain runs.
//!
//! Every record here serializes to the snake_case JSON layout used by the
//! on-disk stores, so files written by earlier deployments load unchanged.

pub mod builtin;
pub mod chain;
pub mod device;
pub mod execution;
pub mod params;
pub mod run;
pub mod skill;

pub use builtin::builtin_templates;
pub use chain::{
    ChainDefinition, ChainDraft, ChainPatch, ChainStep, ChainSummary, ChainTrigger, DeviceSource, FailurePolicy, Gate, ParamSpec,
};
pub use device::DeviceCredentials;
pub use execution::{ExecutionEvent, ExecutionRequest, ExecutionResult, ExecutionStatus, ExecutionSummary, StepResult};
pub use params::{ParamMap, value_to_text};
pub use run::{ChainStepResult, GateMode, ResumeAction, Run, RunContext, RunOutcome, RunStatus, RunSummary, StepContextEntry};
pub use skill::{SkillAnalysis, SkillDefinition, SkillInfo, SkillParam, SkillSafety, StepDefinition, StepTarget, TransportKind};
