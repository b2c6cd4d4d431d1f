//! # Opschain Engine
//!
//! Runs skills against network devices and sequences them into automation
//! chains with approval gates and failure policies.
//!
//! ## Architecture
//!
//! - **`executor`**: runs the steps of one skill, forwarding JSON output
//!   between steps ([`SkillExecutor`])
//! - **`automation`**: the chain step loop, pause at approval gates and
//!   resume ([`Orchestrator`])
//! - **`resolve`**: `{{chain.*}}` / `{{steps.*}}` context templates used by
//!   chain step parameters
//! - **`templates`**: flat `{{param}}` substitution into skill commands
//!
//! Collaborators (skill catalog, credential store, transport, analyzer and
//! the stores) are injected as trait objects, so the engine never reaches a
//! device or the filesystem on its own.

pub mod automation;
mod error;
pub mod executor;
pub mod resolve;
pub mod templates;

pub use automation::Orchestrator;
pub use error::EngineError;
pub use executor::{SkillExecutor, SkillRunner};
pub use resolve::{MAX_EMBEDDED_JSON_DEPTH, resolve};
pub use templates::resolve_command;
