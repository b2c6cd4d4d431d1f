//! Persistence for chain runs.
//!
//! Runs are stored one file per run under `<data_dir>/automation_runs`. The
//! store is the only place a paused run can be claimed for resumption, so
//! two operators approving the same run cannot both advance it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use opschain_types::{Run, RunStatus, RunSummary};
use tracing::debug;

use crate::store::{JsonDirectory, StoreError};

/// Default number of runs returned by [`RunStore::list`].
pub const DEFAULT_RUN_LIST_LIMIT: usize = 50;

/// Shared trait implemented by run persistence backends.
pub trait RunStore: Send + Sync {
    /// Insert or replace a run record.
    fn save(&self, run: &Run) -> Result<(), StoreError>;

    /// Fetch a run by id.
    fn get(&self, run_id: &str) -> Result<Option<Run>, StoreError>;

    /// Summaries ordered newest first, optionally restricted to one chain.
    fn list(&self, chain_id: Option<&str>, limit: usize) -> Result<Vec<RunSummary>, StoreError>;

    /// Atomically move a run from `waiting_approval` to `running`.
    ///
    /// Returns the claimed run together with the step index it paused at.
    /// Fails with [`StoreError::NotFound`] for unknown runs and with
    /// [`StoreError::Conflict`] when the run is no longer waiting.
    fn claim_for_resume(&self, run_id: &str) -> Result<(Run, usize), StoreError>;
}

fn claim(run_id: &str, run: Option<Run>) -> Result<(Run, usize), StoreError> {
    let mut run = run.ok_or_else(|| StoreError::NotFound(run_id.to_string()))?;
    let status = run.status();
    match run.take_approval() {
        Some(step) => Ok((run, step)),
        None => Err(StoreError::Conflict {
            id: run_id.to_string(),
            status: status.to_string(),
        }),
    }
}

fn summarize<'a>(runs: impl Iterator<Item = &'a Run>, chain_id: Option<&str>, limit: usize) -> Vec<RunSummary> {
    let mut summaries: Vec<RunSummary> = runs
        .filter(|run| chain_id.is_none_or(|chain_id| run.automation_id == chain_id))
        .map(Run::summary)
        .collect();
    summaries.sort_by(|left, right| right.started_at.cmp(&left.started_at));
    summaries.truncate(limit);
    summaries
}

/// JSON-backed run store, one file per run.
pub struct JsonRunStore {
    dir: JsonDirectory,
    lock: Mutex<()>,
}

impl JsonRunStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: JsonDirectory::new(dir),
            lock: Mutex::new(()),
        }
    }
}

impl RunStore for JsonRunStore {
    fn save(&self, run: &Run) -> Result<(), StoreError> {
        let _guard = self.lock.lock().expect("run store lock poisoned");
        self.dir.write(&run.id, run)?;
        debug!(run_id = %run.id, status = %run.status(), current_step = run.current_step(), "saved run");
        Ok(())
    }

    fn get(&self, run_id: &str) -> Result<Option<Run>, StoreError> {
        let _guard = self.lock.lock().expect("run store lock poisoned");
        self.dir.read(run_id)
    }

    fn list(&self, chain_id: Option<&str>, limit: usize) -> Result<Vec<RunSummary>, StoreError> {
        let runs: Vec<Run> = {
            let _guard = self.lock.lock().expect("run store lock poisoned");
            self.dir.read_all()?
        };
        Ok(summarize(runs.iter(), chain_id, limit))
    }

    fn claim_for_resume(&self, run_id: &str) -> Result<(Run, usize), StoreError> {
        let _guard = self.lock.lock().expect("run store lock poisoned");
        let (run, step) = claim(run_id, self.dir.read(run_id)?)?;
        self.dir.write(&run.id, &run)?;
        debug!(run_id, step, "claimed run for resume");
        Ok((run, step))
    }
}

/// In-memory run store useful for tests.
#[derive(Default)]
pub struct InMemoryRunStore {
    runs: Mutex<HashMap<String, Run>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status of a stored run, if present.
    pub fn status_of(&self, run_id: &str) -> Option<RunStatus> {
        self.runs.lock().expect("run store lock poisoned").get(run_id).map(Run::status)
    }
}

impl RunStore for InMemoryRunStore {
    fn save(&self, run: &Run) -> Result<(), StoreError> {
        self.runs.lock().expect("run store lock poisoned").insert(run.id.clone(), run.clone());
        Ok(())
    }

    fn get(&self, run_id: &str) -> Result<Option<Run>, StoreError> {
        Ok(self.runs.lock().expect("run store lock poisoned").get(run_id).cloned())
    }

    fn list(&self, chain_id: Option<&str>, limit: usize) -> Result<Vec<RunSummary>, StoreError> {
        let runs = self.runs.lock().expect("run store lock poisoned");
        Ok(summarize(runs.values(), chain_id, limit))
    }

    fn claim_for_resume(&self, run_id: &str) -> Result<(Run, usize), StoreError> {
        let mut runs = self.runs.lock().expect("run store lock poisoned");
        let (run, step) = claim(run_id, runs.get(run_id).cloned())?;
        runs.insert(run.id.clone(), run.clone());
        Ok((run, step))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use opschain_types::{ChainDefinition, ChainDraft, ChainStep, ParamMap, RunContext, RunOutcome};
    use tempfile::tempdir;

    fn chain(id: &str) -> ChainDefinition {
        let steps = vec![ChainStep::new("check-health", ""), ChainStep::new("drain", "")];
        ChainDefinition::from_draft(id, ChainDraft::new("demo", steps), Utc::now())
    }

    fn run(id: &str, chain_id: &str) -> Run {
        Run::start(id, &chain(chain_id), ParamMap::new(), RunContext::default())
    }

    #[test]
    fn json_store_round_trips_runs() {
        let dir = tempdir().unwrap();
        let store = JsonRunStore::new(dir.path());
        let mut paused = run("run-aaaa", "chain001");
        paused.pause_at(1);
        store.save(&paused).unwrap();

        let loaded = store.get("run-aaaa").unwrap().unwrap();
        assert_eq!(loaded, paused);
        assert!(store.get("run-missing").unwrap().is_none());
    }

    #[test]
    fn list_is_newest_first_and_filtered() {
        let store = InMemoryRunStore::new();
        let mut older = run("run-old", "chain001");
        older.started_at = Utc::now() - Duration::minutes(5);
        store.save(&older).unwrap();
        store.save(&run("run-new", "chain001")).unwrap();
        store.save(&run("run-other", "chain002")).unwrap();

        let listed = store.list(Some("chain001"), 10).unwrap();
        let ids: Vec<&str> = listed.iter().map(|summary| summary.id.as_str()).collect();
        assert_eq!(ids, vec!["run-new", "run-old"]);
        assert_eq!(store.list(None, 1).unwrap().len(), 1);
    }

    #[test]
    fn claim_moves_waiting_run_to_running_once() {
        let dir = tempdir().unwrap();
        let store = JsonRunStore::new(dir.path());
        let mut paused = run("run-wait", "chain001");
        paused.pause_at(1);
        store.save(&paused).unwrap();

        let (claimed, step) = store.claim_for_resume("run-wait").unwrap();
        assert_eq!(step, 1);
        assert_eq!(claimed.status(), RunStatus::Running);
        assert_eq!(store.get("run-wait").unwrap().unwrap().status(), RunStatus::Running);

        match store.claim_for_resume("run-wait") {
            Err(StoreError::Conflict { status, .. }) => assert_eq!(status, "running"),
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn claim_rejects_unknown_and_terminal_runs() {
        let store = InMemoryRunStore::new();
        assert!(matches!(store.claim_for_resume("nope"), Err(StoreError::NotFound(_))));

        let mut done = run("run-done", "chain001");
        done.finish(RunOutcome::Complete);
        store.save(&done).unwrap();
        assert!(matches!(store.claim_for_resume("run-done"), Err(StoreError::Conflict { .. })));
        assert_eq!(store.status_of("run-done"), Some(RunStatus::Complete));
    }
}
