pub mod chain_store;
pub mod cluster_pool;
pub mod config;
pub mod execution_history;
pub mod ids;
pub mod path_processing;
pub mod run_store;
pub mod skill_catalog;
pub mod store;
pub mod text_processing;

pub use chain_store::{ChainStore, InMemoryChainStore, JsonChainStore};
pub use cluster_pool::{ClusterPool, InMemoryClusterPool, JsonClusterPool, flatten_cluster};
pub use config::{ConfigError, LlmProvider, LlmSettings, Settings, VaultSettings};
pub use execution_history::{ExecutionHistory, InMemoryExecutionHistory, JsonExecutionHistory};
pub use ids::{new_chain_id, new_execution_id, new_run_id};
pub use path_processing::{default_data_dir, expand_tilde};
pub use run_store::{InMemoryRunStore, JsonRunStore, RunStore};
pub use skill_catalog::{InMemorySkillCatalog, SkillCatalog, SkillDirectoryCatalog};
pub use store::{JsonDirectory, StoreError};
pub use text_processing::{redact_sensitive, truncate_chars};
