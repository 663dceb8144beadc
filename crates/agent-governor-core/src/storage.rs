// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Persistence for budget ledger state.
//!
//! The [`SnapshotStore`] trait is the single interface between the ledger and
//! any persistence layer.  This crate ships [`InMemorySnapshotStore`] for
//! development and testing; the file-backed store lives in
//! `agent-governor-std`.
//!
//! # Implementing `SnapshotStore`
//!
//! ```rust,no_run
//! use agent_governor_core::error::Result;
//! use agent_governor_core::storage::{LedgerSnapshot, SnapshotStore};
//!
//! struct MyStore;
//!
//! impl SnapshotStore for MyStore {
//!     fn load(&self) -> Result<Option<LedgerSnapshot>> {
//!         Ok(None) // read from your backend
//!     }
//!     fn save(&self, _snapshot: &LedgerSnapshot) -> Result<()> {
//!         Ok(())
//!     }
//! }
//! ```

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::budget::SessionBudget;
use crate::error::Result;

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// One `(principal, session)` row of a [`LedgerSnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub principal: String,
    pub session: String,
    #[serde(flatten)]
    pub budget: SessionBudget,
}

/// Point-in-time copy of every session budget the ledger knows about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub version: u32,
    /// Clock reading when the snapshot was taken.
    pub taken_at_ms: u64,
    pub sessions: Vec<SessionRecord>,
}

impl LedgerSnapshot {
    pub fn new(taken_at_ms: u64, mut sessions: Vec<SessionRecord>) -> Self {
        // Stable order so two snapshots of the same state compare equal.
        sessions.sort_by(|a, b| (&a.principal, &a.session).cmp(&(&b.principal, &b.session)));
        Self {
            version: SNAPSHOT_VERSION,
            taken_at_ms,
            sessions,
        }
    }

    pub fn find(&self, principal: &str, session: &str) -> Option<&SessionRecord> {
        self.sessions
            .iter()
            .find(|r| r.principal == principal && r.session == session)
    }
}

/// Pluggable persistence for [`LedgerSnapshot`]s.
///
/// Implementations MUST be `Send + Sync`; they are shared behind an `Arc`
/// and called through `&self`.
pub trait SnapshotStore: Send + Sync {
    /// Most recently saved snapshot, or `None` if nothing was saved yet.
    fn load(&self) -> Result<Option<LedgerSnapshot>>;

    /// Replace the stored snapshot.
    fn save(&self, snapshot: &LedgerSnapshot) -> Result<()>;
}

/// A thread-safe in-memory [`SnapshotStore`].
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    slot: Mutex<Option<LedgerSnapshot>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn load(&self) -> Result<Option<LedgerSnapshot>> {
        Ok(self.slot.lock().clone())
    }

    fn save(&self, snapshot: &LedgerSnapshot) -> Result<()> {
        *self.slot.lock() = Some(snapshot.clone());
        Ok(())
    }
}
