//! Shared plumbing for the JSON-file stores.
//!
//! Each store keeps one pretty-printed JSON document per record in a flat
//! directory (`<dir>/<id>.json`). Reads tolerate missing and malformed files
//! the same way the history file loader does: missing means absent, malformed
//! records are logged and skipped.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::warn;

/// Errors surfaced by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O failure while reading or writing a record.
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization or deserialization failure.
    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// The record does not exist.
    #[error("record '{0}' not found")]
    NotFound(String),
    /// The record is not in the state the caller expected.
    #[error("record '{id}' changed concurrently (status: {status})")]
    Conflict { id: String, status: String },
    /// A record on disk could not be interpreted.
    #[error("invalid record at {path}: {message}")]
    InvalidRecord { path: PathBuf, message: String },
}

/// A flat directory of `<id>.json` records.
#[derive(Debug, Clone)]
pub struct JsonDirectory {
    root: PathBuf,
}

impl JsonDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path of the record `id`, or `None` when `id` could escape the directory.
    pub fn record_path(&self, id: &str) -> Option<PathBuf> {
        is_safe_id(id).then(|| self.root.join(format!("{id}.json")))
    }

    /// Read one record; a missing file or unsafe id yields `None`.
    pub fn read<T: DeserializeOwned>(&self, id: &str) -> Result<Option<T>, StoreError> {
        let Some(path) = self.record_path(id) else {
            return Ok(None);
        };
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
            Err(error) => Err(StoreError::Io(error)),
        }
    }

    /// Write one record, creating the directory on first use.
    pub fn write<T: Serialize>(&self, id: &str, record: &T) -> Result<(), StoreError> {
        let path = self.record_path(id).ok_or_else(|| StoreError::InvalidRecord {
            path: self.root.join(id),
            message: "record id contains a path separator".into(),
        })?;
        fs::create_dir_all(&self.root)?;
        let content = serde_json::to_string_pretty(record)?;
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, content)?;
        fs::rename(&staging, &path)?;
        Ok(())
    }

    /// Remove one record. Returns `false` when it did not exist.
    pub fn remove(&self, id: &str) -> Result<bool, StoreError> {
        let Some(path) = self.record_path(id) else {
            return Ok(false);
        };
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(false),
            Err(error) => Err(StoreError::Io(error)),
        }
    }

    /// Load every parseable record, in file-name order. Malformed files are skipped.
    pub fn read_all<T: DeserializeOwned>(&self) -> Result<Vec<T>, StoreError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(StoreError::Io(error)),
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.extension().is_some_and(|extension| extension == "json"))
            .collect();
        paths.sort();

        let mut records = Vec::with_capacity(paths.len());
        for path in paths {
            let parsed = fs::read_to_string(&path)
                .map_err(StoreError::from)
                .and_then(|content| serde_json::from_str::<T>(&content).map_err(StoreError::from));
            match parsed {
                Ok(record) => records.push(record),
                Err(error) => warn!(path = %path.display(), %error, "skipping unreadable record"),
            }
        }
        Ok(records)
    }
}

pub(crate) fn is_safe_id(id: &str) -> bool {
    !id.is_empty() && id != "." && id != ".." && !id.contains(['/', '\\'])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use tempfile::tempdir;

    #[test]
    fn write_then_read_record() {
        let dir = tempdir().unwrap();
        let store = JsonDirectory::new(dir.path().join("records"));
        store.write("abc", &json!({"id": "abc"})).unwrap();
        let record: Option<Value> = store.read("abc").unwrap();
        assert_eq!(record, Some(json!({"id": "abc"})));
        assert!(store.read::<Value>("missing").unwrap().is_none());
    }

    #[test]
    fn traversal_ids_are_refused() {
        let dir = tempdir().unwrap();
        let store = JsonDirectory::new(dir.path());
        assert!(store.record_path("../etc/passwd").is_none());
        assert!(store.read::<Value>("..").unwrap().is_none());
        assert!(store.write("a/b", &json!({})).is_err());
    }

    #[test]
    fn read_all_skips_malformed_files() {
        let dir = tempdir().unwrap();
        let store = JsonDirectory::new(dir.path());
        store.write("good", &json!({"ok": true})).unwrap();
        fs::write(dir.path().join("bad.json"), "{ not json").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        let records: Vec<Value> = store.read_all().unwrap();
        assert_eq!(records, vec![json!({"ok": true})]);
    }

    #[test]
    fn remove_reports_whether_record_existed() {
        let dir = tempdir().unwrap();
        let store = JsonDirectory::new(dir.path());
        store.write("gone", &json!({})).unwrap();
        assert!(store.remove("gone").unwrap());
        assert!(!store.remove("gone").unwrap());
    }

    #[test]
    fn missing_directory_lists_nothing() {
        let dir = tempdir().unwrap();
        let store = JsonDirectory::new(dir.path().join("never-created"));
        assert!(store.read_all::<Value>().unwrap().is_empty());
    }
}
