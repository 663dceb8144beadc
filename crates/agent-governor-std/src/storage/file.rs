// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! File-based JSON snapshot store.
//!
//! [`FileSnapshotStore`] persists a [`LedgerSnapshot`] to a single JSON file
//! on disk.  Every save is atomic (write-rename) so that a crash mid-write
//! does not corrupt the previous snapshot.
//!
//! ## Layout
//!
//! ```json
//! {
//!   "version": 1,
//!   "taken_at_ms": 1712000000000,
//!   "sessions": [
//!     { "principal": "agent-001", "session": "default",
//!       "spent": 1.25, "reserved": 0.0, "cap": 5.0, "alerts_fired": [5000] }
//!   ]
//! }
//! ```
//!
//! ## Caveats
//!
//! * Saves from one process are serialised; concurrent writers in different
//!   processes are not supported.
//! * Snapshots written by a newer format version are refused on load.

use std::io;
use std::path::{Path, PathBuf};

use agent_governor_core::error::{GovernorError, Result};
use agent_governor_core::storage::{LedgerSnapshot, SnapshotStore, SNAPSHOT_VERSION};
use parking_lot::Mutex;

/// A [`SnapshotStore`] backed by one JSON file.
///
/// # Examples
///
/// ```rust,no_run
/// use agent_governor_core::storage::{LedgerSnapshot, SnapshotStore};
/// use agent_governor_std::FileSnapshotStore;
///
/// let store = FileSnapshotStore::new("/tmp/ledger.json");
/// store.save(&LedgerSnapshot::new(0, Vec::new())).unwrap();
/// assert!(store.load().unwrap().is_some());
/// ```
#[derive(Debug)]
pub struct FileSnapshotStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileSnapshotStore {
    /// A store at `path`.  Nothing is touched on disk until the first save.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        self.path.with_extension("tmp")
    }
}

fn storage_error(context: &str, path: &Path, error: impl std::fmt::Display) -> GovernorError {
    GovernorError::Storage(format!("{context} {}: {error}", path.display()))
}

impl SnapshotStore for FileSnapshotStore {
    fn load(&self) -> Result<Option<LedgerSnapshot>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(storage_error("cannot read", &self.path, error)),
        };

        let snapshot: LedgerSnapshot = serde_json::from_str(&raw)
            .map_err(|error| storage_error("malformed ledger snapshot in", &self.path, error))?;

        if snapshot.version > SNAPSHOT_VERSION {
            return Err(GovernorError::Storage(format!(
                "ledger snapshot {} has version {}, newest supported is {SNAPSHOT_VERSION}",
                self.path.display(),
                snapshot.version
            )));
        }

        tracing::debug!(
            path = %self.path.display(),
            sessions = snapshot.sessions.len(),
            "ledger snapshot loaded"
        );
        Ok(Some(snapshot))
    }

    /// Write to `<path>.tmp` first, then rename over the target.
    fn save(&self, snapshot: &LedgerSnapshot) -> Result<()> {
        let json = serde_json::to_string_pretty(snapshot)
            .map_err(|error| storage_error("cannot serialise snapshot for", &self.path, error))?;

        let _guard = self.write_lock.lock();
        let tmp_path = self.tmp_path();
        std::fs::write(&tmp_path, json)
            .map_err(|error| storage_error("cannot write", &tmp_path, error))?;
        std::fs::rename(&tmp_path, &self.path)
            .map_err(|error| storage_error("cannot replace", &self.path, error))?;

        tracing::debug!(
            path = %self.path.display(),
            sessions = snapshot.sessions.len(),
            "ledger snapshot saved"
        );
        Ok(())
    }
}
