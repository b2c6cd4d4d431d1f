//! Collaborators shared by every command, built once from [`Settings`].

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use opschain_api::{DeviceTransport, LlmAnalyzer, VaultCredentialStore};
use opschain_engine::{Orchestrator, SkillExecutor};
use opschain_util::{
    ChainStore, ExecutionHistory, JsonChainStore, JsonClusterPool, JsonExecutionHistory, JsonRunStore, RunStore, Settings, SkillCatalog,
    SkillDirectoryCatalog,
};

pub struct App {
    pub chains: Arc<dyn ChainStore>,
    pub runs: Arc<dyn RunStore>,
    pub history: Arc<dyn ExecutionHistory>,
    pub skills: Arc<dyn SkillCatalog>,
    pub executor: Arc<SkillExecutor>,
    pub orchestrator: Orchestrator,
}

impl App {
    pub fn from_settings(settings: Settings) -> Result<Self> {
        debug!(data_dir = %settings.data_dir.display(), skills_dir = %settings.skills_dir.display(), "loading opschain settings");

        let chains: Arc<dyn ChainStore> = Arc::new(JsonChainStore::new(settings.chains_dir()));
        let runs: Arc<dyn RunStore> = Arc::new(JsonRunStore::new(settings.runs_dir()));
        let history: Arc<dyn ExecutionHistory> = Arc::new(JsonExecutionHistory::new(settings.history_dir()));
        let skills: Arc<dyn SkillCatalog> = Arc::new(SkillDirectoryCatalog::new(settings.skills_dir.clone()));

        let credentials = VaultCredentialStore::new(&settings.vault).context("build vault client")?;
        let transport = DeviceTransport::new(settings.local_api_base.clone()).context("build device transport")?;
        let analyzer = LlmAnalyzer::new(settings.llm.clone()).context("build analyzer")?;

        let executor = Arc::new(SkillExecutor::new(
            skills.clone(),
            Arc::new(credentials),
            Arc::new(transport),
            Arc::new(analyzer),
            history.clone(),
        ));
        let orchestrator = Orchestrator::new(
            chains.clone(),
            runs.clone(),
            Arc::new(JsonClusterPool::new(settings.clusters_dir())),
            executor.clone(),
        );

        Ok(Self {
            chains,
            runs,
            history,
            skills,
            executor,
            orchestrator,
        })
    }
}
