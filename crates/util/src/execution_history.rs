//! Append-only record of skill executions.

use std::path::PathBuf;
use std::sync::Mutex;

use opschain_types::{ExecutionResult, ExecutionSummary};

use crate::store::{JsonDirectory, StoreError};

/// Default number of executions returned by [`ExecutionHistory::list`].
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Shared trait implemented by execution history backends.
pub trait ExecutionHistory: Send + Sync {
    fn append(&self, result: &ExecutionResult) -> Result<(), StoreError>;

    fn get(&self, execution_id: &str) -> Result<Option<ExecutionResult>, StoreError>;

    /// Summaries ordered newest first.
    fn list(&self, limit: usize) -> Result<Vec<ExecutionSummary>, StoreError>;
}

fn newest_first(mut results: Vec<ExecutionResult>, limit: usize) -> Vec<ExecutionSummary> {
    results.sort_by(|left, right| right.started_at.cmp(&left.started_at));
    results.iter().take(limit).map(ExecutionResult::summary).collect()
}

/// JSON-backed history, one file per execution under `<data_dir>/history`.
pub struct JsonExecutionHistory {
    dir: JsonDirectory,
    lock: Mutex<()>,
}

impl JsonExecutionHistory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: JsonDirectory::new(dir),
            lock: Mutex::new(()),
        }
    }
}

impl ExecutionHistory for JsonExecutionHistory {
    fn append(&self, result: &ExecutionResult) -> Result<(), StoreError> {
        let _guard = self.lock.lock().expect("history lock poisoned");
        self.dir.write(&result.execution_id, result)
    }

    fn get(&self, execution_id: &str) -> Result<Option<ExecutionResult>, StoreError> {
        let _guard = self.lock.lock().expect("history lock poisoned");
        self.dir.read(execution_id)
    }

    fn list(&self, limit: usize) -> Result<Vec<ExecutionSummary>, StoreError> {
        let results = {
            let _guard = self.lock.lock().expect("history lock poisoned");
            self.dir.read_all()?
        };
        Ok(newest_first(results, limit))
    }
}

/// In-memory history useful for tests.
#[derive(Default)]
pub struct InMemoryExecutionHistory {
    results: Mutex<Vec<ExecutionResult>>,
}

impl InMemoryExecutionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every appended result, in append order.
    pub fn results(&self) -> Vec<ExecutionResult> {
        self.results.lock().expect("history lock poisoned").clone()
    }
}

impl ExecutionHistory for InMemoryExecutionHistory {
    fn append(&self, result: &ExecutionResult) -> Result<(), StoreError> {
        self.results.lock().expect("history lock poisoned").push(result.clone());
        Ok(())
    }

    fn get(&self, execution_id: &str) -> Result<Option<ExecutionResult>, StoreError> {
        let results = self.results.lock().expect("history lock poisoned");
        Ok(results.iter().rev().find(|result| result.execution_id == execution_id).cloned())
    }

    fn list(&self, limit: usize) -> Result<Vec<ExecutionSummary>, StoreError> {
        Ok(newest_first(self.results(), limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use opschain_types::{ExecutionRequest, ExecutionStatus, ParamMap};
    use tempfile::tempdir;

    fn result(id: &str, minutes_ago: i64) -> ExecutionResult {
        let request = ExecutionRequest::new("check-health", "bigip01", ParamMap::new());
        let mut result = ExecutionResult::start(id, &request);
        result.started_at = Utc::now() - Duration::minutes(minutes_ago);
        result.status = ExecutionStatus::Complete;
        result
    }

    #[test]
    fn append_get_and_list_newest_first() {
        let dir = tempdir().unwrap();
        let history = JsonExecutionHistory::new(dir.path().join("history"));
        history.append(&result("aaaa1111", 10)).unwrap();
        history.append(&result("bbbb2222", 1)).unwrap();

        let loaded = history.get("aaaa1111").unwrap().unwrap();
        assert_eq!(loaded.skill_name, "check-health");
        assert!(history.get("zzzz9999").unwrap().is_none());

        let listed = history.list(10).unwrap();
        let ids: Vec<&str> = listed.iter().map(|summary| summary.execution_id.as_str()).collect();
        assert_eq!(ids, vec!["bbbb2222", "aaaa1111"]);
        assert_eq!(history.list(1).unwrap().len(), 1);
    }

    #[test]
    fn in_memory_history_keeps_append_order() {
        let history = InMemoryExecutionHistory::new();
        history.append(&result("first", 0)).unwrap();
        history.append(&result("second", 0)).unwrap();
        let ids: Vec<String> = history.results().into_iter().map(|result| result.execution_id).collect();
        assert_eq!(ids, vec!["first", "second"]);
    }
}
