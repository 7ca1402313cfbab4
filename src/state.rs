//! Durable index state: load, atomic commit, and the run lock.
//!
//! The state file is one JSON document mapping `document_id` to its sync
//! record, plus the last run timestamp. Exactly one writer — the active
//! run — may exist at a time, enforced by an advisory lock on a sibling
//! `.lock` file. Readers always see a consistent snapshot because commits
//! replace the whole file atomically: the new state is written to a
//! temporary file in the same directory, fsynced, then renamed over the
//! old one. A crash mid-write leaves the previous valid state intact.
//!
//! A missing state file means "first run" and loads as the empty state. A
//! state file that exists but cannot be parsed is a different situation
//! entirely: all diffing depends on it, and treating it as empty would
//! re-ingest the world and delete nothing it should. That case is
//! [`StateError::Corrupt`] and aborts the run before any network call.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use thiserror::Error;

use crate::models::IndexState;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state file {path} is corrupt: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("state io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("another sync run is already active (lock file {path})")]
    LockHeld { path: String },
}

fn io_err(path: &Path, source: std::io::Error) -> StateError {
    StateError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Load the persisted state. Missing file → empty state (first run);
/// unreadable or malformed content → [`StateError::Corrupt`], fatal.
pub fn load(path: &Path) -> Result<IndexState, StateError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(IndexState::default()),
        Err(e) => return Err(io_err(path, e)),
    };

    serde_json::from_str(&content).map_err(|e| StateError::Corrupt {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Atomically replace the state file with `state`.
///
/// Write-to-temp-then-rename: the temp file lives in the state file's own
/// directory so the rename stays on one filesystem.
pub fn commit(path: &Path, state: &IndexState) -> Result<(), StateError> {
    let parent = path.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;

    let json = serde_json::to_string_pretty(state).map_err(|e| StateError::Corrupt {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|e| io_err(parent, e))?;
    tmp.write_all(json.as_bytes())
        .map_err(|e| io_err(tmp.path(), e))?;
    tmp.as_file().sync_all().map_err(|e| io_err(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| io_err(path, e.error))?;

    Ok(())
}

/// Process-wide run lock held for the duration of one sync run.
///
/// Backed by `flock` on a sibling lock file; released on drop. A second
/// run attempting to start while the lock is held fails fast instead of
/// running concurrently.
pub struct RunLock {
    file: std::fs::File,
    #[allow(dead_code)]
    path: PathBuf,
}

impl RunLock {
    pub fn acquire(state_path: &Path) -> Result<Self, StateError> {
        let path = lock_path(state_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| io_err(&path, e))?;

        file.try_lock_exclusive().map_err(|_| StateError::LockHeld {
            path: path.display().to_string(),
        })?;

        Ok(Self { file, path })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

fn lock_path(state_path: &Path) -> PathBuf {
    let mut name = state_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "index_state".to_string());
    name.push_str(".lock");
    state_path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentRecord;
    use chrono::Utc;

    fn sample_state() -> IndexState {
        let mut state = IndexState::default();
        state.documents.insert(
            "sops/a.md".into(),
            DocumentRecord {
                content_hash: "abc".into(),
                last_modified: Utc::now(),
                version: 3,
                chunk_count: 5,
            },
        );
        state.last_run = Some(Utc::now());
        state
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let tmp = tempfile::TempDir::new().unwrap();
        let state = load(&tmp.path().join("index_state.json")).unwrap();
        assert!(state.documents.is_empty());
        assert!(state.last_run.is_none());
    }

    #[test]
    fn test_commit_load_roundtrip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("index_state.json");
        let state = sample_state();
        commit(&path, &state).unwrap();
        assert_eq!(load(&path).unwrap(), state);
    }

    #[test]
    fn test_malformed_state_is_corrupt_not_empty() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("index_state.json");
        std::fs::write(&path, "{ this is not json").unwrap();
        match load(&path) {
            Err(StateError::Corrupt { .. }) => {}
            other => panic!("expected Corrupt, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_interrupted_write_preserves_previous_state() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("index_state.json");
        let state = sample_state();
        commit(&path, &state).unwrap();

        // Simulate a crash before rename: a half-written temp file next to
        // the state file must not affect what load() sees.
        let stray = tempfile::NamedTempFile::new_in(tmp.path()).unwrap();
        std::fs::write(stray.path(), "{ \"documents\": { garbage").unwrap();

        assert_eq!(load(&path).unwrap(), state);
    }

    #[test]
    fn test_commit_overwrites_atomically() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("index_state.json");
        let first = sample_state();
        commit(&path, &first).unwrap();

        let mut second = first.clone();
        second.documents.remove("sops/a.md");
        commit(&path, &second).unwrap();

        assert_eq!(load(&path).unwrap(), second);
    }

    #[test]
    fn test_run_lock_is_exclusive() {
        let tmp = tempfile::TempDir::new().unwrap();
        let state_path = tmp.path().join("index_state.json");

        let lock = RunLock::acquire(&state_path).unwrap();
        match RunLock::acquire(&state_path) {
            Err(StateError::LockHeld { .. }) => {}
            other => panic!("expected LockHeld, got {:?}", other.map(|_| ())),
        }
        drop(lock);

        // Released on drop; a new run can acquire it again
        RunLock::acquire(&state_path).unwrap();
    }
}
