use thiserror::Error;

use opschain_types::RunStatus;
use opschain_util::StoreError;

/// Errors returned by the chain orchestrator.
///
/// Business failures inside a run (a failing skill, an unresolvable device)
/// are recorded on the run itself and never surface here.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Automation '{0}' not found")]
    ChainNotFound(String),
    #[error("Run '{0}' not found")]
    RunNotFound(String),
    #[error("Run not waiting approval (status: {status})")]
    NotWaitingApproval { status: RunStatus },
    /// Another resume claimed the run first.
    #[error("Run '{0}' was resumed concurrently")]
    ResumeConflict(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("collaborator unavailable: {0}")]
    Collaborator(String),
}
