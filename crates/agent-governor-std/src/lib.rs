// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! # agent-governor-std
//!
//! File-backed persistence for `agent-governor-core`.
//!
//! * [`FileSnapshotStore`]: a [`SnapshotStore`] that keeps the budget
//!   ledger in a single JSON file, written atomically.
//! * [`FileAuditSink`]: an [`AuditSink`] that appends one JSON object per
//!   line.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use agent_governor_core::{
//!     budget::TracingAlertSink, clock::MonotonicClock, Governor, GovernorConfig,
//! };
//! use agent_governor_std::{FileAuditSink, FileSnapshotStore};
//!
//! let audit = FileAuditSink::open("/var/lib/agent-governor/audit.jsonl")
//!     .expect("failed to open audit file");
//! let governor = Governor::new(
//!     GovernorConfig::default(),
//!     Arc::new(MonotonicClock::new()),
//!     Arc::new(audit),
//!     Arc::new(TracingAlertSink),
//! )
//! .unwrap();
//!
//! let ledger = FileSnapshotStore::new("/var/lib/agent-governor/ledger.json");
//! governor.load_ledger(&ledger).unwrap();
//! // ... serve requests ...
//! governor.save_ledger(&ledger).unwrap();
//! ```
//!
//! [`SnapshotStore`]: agent_governor_core::storage::SnapshotStore
//! [`AuditSink`]: agent_governor_core::audit::AuditSink

pub mod audit;
pub mod storage;

pub use audit::FileAuditSink;
pub use storage::file::FileSnapshotStore;
