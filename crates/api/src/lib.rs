//! Clients for everything opschain talks to outside the process.
//!
//! - [`transport`]: running a resolved step against a device, a hypervisor or
//!   the local administrative API ([`Transport`], [`DeviceTransport`]).
//! - [`credentials`]: device credential lookup ([`CredentialStore`],
//!   [`VaultCredentialStore`]).
//! - [`analysis`]: post-execution LLM analysis ([`Analyzer`], [`LlmAnalyzer`]).
//!
//! Each concern is a trait so the engine can be driven by in-memory doubles in
//! tests; the concrete clients are built once by the binary and shared behind
//! `Arc<dyn Trait>`.

pub mod analysis;
pub mod credentials;
pub mod transport;

pub use analysis::{Analyzer, LlmAnalyzer, NoopAnalyzer, build_prompt};
pub use credentials::{CredentialStore, InMemoryCredentialStore, VaultCredentialStore};
pub use transport::{
    DeviceTransport, HypervisorCall, LocalApiCall, NoopTransport, RestCall, ShellCommand, Transport, TransportOutcome,
    TransportRequest,
};
