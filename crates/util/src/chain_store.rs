//! Chain definition CRUD.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Utc;
use opschain_types::{ChainDefinition, ChainDraft, ChainPatch, ChainSummary};
use tracing::info;

use crate::ids::new_chain_id;
use crate::store::{JsonDirectory, StoreError};

/// Shared trait implemented by chain persistence backends.
pub trait ChainStore: Send + Sync {
    fn list(&self) -> Result<Vec<ChainSummary>, StoreError>;

    fn get(&self, chain_id: &str) -> Result<Option<ChainDefinition>, StoreError>;

    /// Store a new chain under a fresh id. Steps are normalised.
    fn create(&self, draft: ChainDraft) -> Result<ChainDefinition, StoreError>;

    /// Apply a partial update. Returns `None` when the chain does not exist.
    fn update(&self, chain_id: &str, patch: ChainPatch) -> Result<Option<ChainDefinition>, StoreError>;

    /// Returns `false` when the chain did not exist.
    fn delete(&self, chain_id: &str) -> Result<bool, StoreError>;

    /// Copy a chain under a new id with `" (Copy)"` appended to its name.
    fn duplicate(&self, chain_id: &str) -> Result<Option<ChainDefinition>, StoreError> {
        match self.get(chain_id)? {
            Some(source) => self.create(source.duplicate_draft()).map(Some),
            None => Ok(None),
        }
    }
}

/// JSON-backed chain store under `<data_dir>/automations`.
pub struct JsonChainStore {
    dir: JsonDirectory,
    lock: Mutex<()>,
}

impl JsonChainStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: JsonDirectory::new(dir),
            lock: Mutex::new(()),
        }
    }
}

impl ChainStore for JsonChainStore {
    fn list(&self) -> Result<Vec<ChainSummary>, StoreError> {
        let _guard = self.lock.lock().expect("chain store lock poisoned");
        let chains: Vec<ChainDefinition> = self.dir.read_all()?;
        Ok(chains.iter().map(ChainDefinition::summary).collect())
    }

    fn get(&self, chain_id: &str) -> Result<Option<ChainDefinition>, StoreError> {
        let _guard = self.lock.lock().expect("chain store lock poisoned");
        self.dir.read(chain_id)
    }

    fn create(&self, draft: ChainDraft) -> Result<ChainDefinition, StoreError> {
        let _guard = self.lock.lock().expect("chain store lock poisoned");
        let chain = ChainDefinition::from_draft(new_chain_id(), draft, Utc::now());
        self.dir.write(&chain.id, &chain)?;
        info!(chain_id = %chain.id, name = %chain.name, steps = chain.steps.len(), "created chain");
        Ok(chain)
    }

    fn update(&self, chain_id: &str, patch: ChainPatch) -> Result<Option<ChainDefinition>, StoreError> {
        let _guard = self.lock.lock().expect("chain store lock poisoned");
        let Some(mut chain) = self.dir.read::<ChainDefinition>(chain_id)? else {
            return Ok(None);
        };
        chain.apply_patch(patch, Utc::now());
        self.dir.write(&chain.id, &chain)?;
        Ok(Some(chain))
    }

    fn delete(&self, chain_id: &str) -> Result<bool, StoreError> {
        let _guard = self.lock.lock().expect("chain store lock poisoned");
        let removed = self.dir.remove(chain_id)?;
        if removed {
            info!(chain_id, "deleted chain");
        }
        Ok(removed)
    }
}

/// In-memory chain store useful for tests.
#[derive(Default)]
pub struct InMemoryChainStore {
    chains: Mutex<BTreeMap<String, ChainDefinition>>,
}

impl InMemoryChainStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully formed definition, keeping its id.
    pub fn insert(&self, chain: ChainDefinition) {
        self.chains.lock().expect("chain store lock poisoned").insert(chain.id.clone(), chain);
    }
}

impl ChainStore for InMemoryChainStore {
    fn list(&self) -> Result<Vec<ChainSummary>, StoreError> {
        let chains = self.chains.lock().expect("chain store lock poisoned");
        Ok(chains.values().map(ChainDefinition::summary).collect())
    }

    fn get(&self, chain_id: &str) -> Result<Option<ChainDefinition>, StoreError> {
        Ok(self.chains.lock().expect("chain store lock poisoned").get(chain_id).cloned())
    }

    fn create(&self, draft: ChainDraft) -> Result<ChainDefinition, StoreError> {
        let chain = ChainDefinition::from_draft(new_chain_id(), draft, Utc::now());
        self.insert(chain.clone());
        Ok(chain)
    }

    fn update(&self, chain_id: &str, patch: ChainPatch) -> Result<Option<ChainDefinition>, StoreError> {
        let mut chains = self.chains.lock().expect("chain store lock poisoned");
        Ok(chains.get_mut(chain_id).map(|chain| {
            chain.apply_patch(patch, Utc::now());
            chain.clone()
        }))
    }

    fn delete(&self, chain_id: &str) -> Result<bool, StoreError> {
        Ok(self.chains.lock().expect("chain store lock poisoned").remove(chain_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opschain_types::{ChainStep, DeviceSource, FailurePolicy, Gate};
    use tempfile::tempdir;

    fn draft() -> ChainDraft {
        ChainDraft::new("Nightly check", vec![ChainStep::new("check-health", "Health"), ChainStep::new("pool-status", "")])
    }

    #[test]
    fn create_assigns_id_and_normalises_steps() {
        let dir = tempdir().unwrap();
        let store = JsonChainStore::new(dir.path());
        let chain = store.create(draft()).unwrap();

        assert_eq!(chain.id.len(), 8);
        assert_eq!(chain.steps[0].id, "step-1");
        assert_eq!(chain.steps[0].gate, Gate::Auto);
        assert_eq!(chain.steps[0].on_failure, FailurePolicy::Stop);
        assert_eq!(chain.steps[0].device_source, DeviceSource::Parameter);
        assert_eq!(chain.steps[0].device_param, "device");
        assert_eq!(store.get(&chain.id).unwrap(), Some(chain.clone()));

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].step_count, 2);
    }

    #[test]
    fn update_is_partial_and_bumps_timestamp() {
        let dir = tempdir().unwrap();
        let store = JsonChainStore::new(dir.path());
        let chain = store.create(draft()).unwrap();

        let patch = ChainPatch {
            description: Some("runs every night".into()),
            ..ChainPatch::default()
        };
        let updated = store.update(&chain.id, patch).unwrap().unwrap();
        assert_eq!(updated.name, "Nightly check");
        assert_eq!(updated.description, "runs every night");
        assert!(updated.updated_at >= chain.updated_at);
        assert!(store.update("missing", ChainPatch::default()).unwrap().is_none());
    }

    #[test]
    fn duplicate_and_delete() {
        let store = InMemoryChainStore::new();
        let chain = store.create(draft()).unwrap();
        let copy = store.duplicate(&chain.id).unwrap().unwrap();

        assert_ne!(copy.id, chain.id);
        assert_eq!(copy.name, "Nightly check (Copy)");
        assert_eq!(copy.steps.len(), chain.steps.len());
        assert!(store.duplicate("missing").unwrap().is_none());

        assert!(store.delete(&chain.id).unwrap());
        assert!(!store.delete(&chain.id).unwrap());
        assert_eq!(store.list().unwrap().len(), 1);
    }
}
