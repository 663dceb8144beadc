// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Audit events and sinks.
//!
//! The governor emits one [`AuditEvent`] after every `authorize` and every
//! `record`, synchronously, to an [`AuditSink`].  A failing sink is logged
//! and otherwise ignored; it never changes a decision.
//!
//! Sinks shipped here:
//!
//! * [`TracingAuditSink`]: structured `tracing` records (target `agent_governor::audit`)
//! * [`MemoryAuditLog`]  : hash-chained in-memory log with [`AuditFilter`] queries
//! * [`NullAuditSink`]   : discards everything
//!
//! The JSON-lines file sink lives in `agent-governor-std`.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::SinkError;
use crate::types::{Action, ActionId, Decision, Operation, Outcome};

/// Hash of the empty chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// What happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditDetail {
    Authorized { decision: Decision },
    Recorded { outcome: Outcome },
}

/// One audit record, as handed to an [`AuditSink`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub principal: String,
    pub action_id: ActionId,
    pub operation: Operation,
    /// The action's target, redacted if the governor has a redactor configured.
    pub target: String,
    pub session: String,
    #[serde(flatten)]
    pub detail: AuditDetail,
    /// Governor clock time of the event.
    pub timestamp_ms: u64,
    /// Timestamp the caller attached with [`Action::at`], if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_timestamp_ms: Option<u64>,
}

impl AuditEvent {
    pub fn authorized(principal: &str, action: &Action, target: String, decision: Decision, now_ms: u64) -> Self {
        Self::build(principal, action, target, AuditDetail::Authorized { decision }, now_ms)
    }

    pub fn recorded(principal: &str, action: &Action, target: String, outcome: Outcome, now_ms: u64) -> Self {
        Self::build(principal, action, target, AuditDetail::Recorded { outcome }, now_ms)
    }

    fn build(principal: &str, action: &Action, target: String, detail: AuditDetail, now_ms: u64) -> Self {
        Self {
            principal: principal.into(),
            action_id: action.id(),
            operation: action.operation(),
            target,
            session: action.session().into(),
            detail,
            timestamp_ms: now_ms,
            action_timestamp_ms: action.timestamp_ms(),
        }
    }

    /// `allow` / `deny` / `requires_approval` for authorizations, the outcome
    /// label for records.
    pub fn label(&self) -> &'static str {
        match &self.detail {
            AuditDetail::Authorized { decision } => decision.label(),
            AuditDetail::Recorded { outcome } => outcome.label(),
        }
    }

    pub fn is_denial(&self) -> bool {
        matches!(&self.detail, AuditDetail::Authorized { decision } if decision.is_denied())
    }
}

/// Destination for [`AuditEvent`]s.  Called synchronously; must not block.
pub trait AuditSink: Send + Sync {
    fn emit(&self, event: &AuditEvent) -> Result<(), SinkError>;
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Emits each event as a structured `tracing` record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: &AuditEvent) -> Result<(), SinkError> {
        tracing::info!(
            target: "agent_governor::audit",
            principal = %event.principal,
            action_id = %event.action_id,
            operation = %event.operation,
            target_path = %event.target,
            session = %event.session,
            result = event.label(),
            timestamp_ms = event.timestamp_ms,
            "audit"
        );
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn emit(&self, _event: &AuditEvent) -> Result<(), SinkError> {
        Ok(())
    }
}

/// A stored event with its chain links.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub event: AuditEvent,
    pub hash: String,
    pub prev_hash: String,
}

/// Query parameters for [`MemoryAuditLog::query`].  Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditFilter {
    pub principal: Option<String>,
    pub session: Option<String>,
    /// Only authorization events whose decision was `Deny`.
    #[serde(default)]
    pub denials_only: bool,
    pub since_ms: Option<u64>,
    pub limit: Option<usize>,
}

impl AuditFilter {
    fn matches(&self, event: &AuditEvent) -> bool {
        self.principal.as_deref().map_or(true, |p| p == event.principal)
            && self.session.as_deref().map_or(true, |s| s == event.session)
            && (!self.denials_only || event.is_denial())
            && self.since_ms.map_or(true, |t| event.timestamp_ms >= t)
    }
}

#[derive(Debug)]
struct Chain {
    records: Vec<AuditRecord>,
    tip: String,
}

/// In-memory, tamper-evident audit log.
///
/// Every record stores the hash of its predecessor, so editing any stored
/// event breaks [`verify`](MemoryAuditLog::verify).
///
/// # Examples
///
/// ```rust
/// use agent_governor_core::audit::{AuditEvent, AuditFilter, AuditSink, MemoryAuditLog};
/// use agent_governor_core::types::{Action, Decision};
///
/// let log = MemoryAuditLog::new();
/// let action = Action::new("read", "README.md", 0.0).unwrap();
/// let event = AuditEvent::authorized("agent-001", &action, action.target().into(), Decision::Allow, 0);
/// log.emit(&event).unwrap();
///
/// assert_eq!(log.query(&AuditFilter::default()).len(), 1);
/// assert!(log.verify());
/// ```
#[derive(Debug)]
pub struct MemoryAuditLog {
    chain: Mutex<Chain>,
}

impl Default for MemoryAuditLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self {
            chain: Mutex::new(Chain {
                records: Vec::new(),
                tip: GENESIS_HASH.into(),
            }),
        }
    }

    /// Matching records, oldest first.
    pub fn query(&self, filter: &AuditFilter) -> Vec<AuditRecord> {
        let chain = self.chain.lock();
        chain
            .records
            .iter()
            .filter(|r| filter.matches(&r.event))
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.chain.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hash of the most recent record ([`GENESIS_HASH`] when empty).
    pub fn chain_tip(&self) -> String {
        self.chain.lock().tip.clone()
    }

    /// Recompute every link.  `false` if any record was altered.
    pub fn verify(&self) -> bool {
        let chain = self.chain.lock();
        let mut prev = GENESIS_HASH.to_string();
        for record in &chain.records {
            if record.prev_hash != prev || chain_hash(&record.event, &prev) != record.hash {
                return false;
            }
            prev = record.hash.clone();
        }
        prev == chain.tip
    }

    #[cfg(test)]
    fn tamper(&self, index: usize, f: impl FnOnce(&mut AuditEvent)) {
        if let Some(record) = self.chain.lock().records.get_mut(index) {
            f(&mut record.event);
        }
    }
}

impl AuditSink for MemoryAuditLog {
    fn emit(&self, event: &AuditEvent) -> Result<(), SinkError> {
        let mut chain = self.chain.lock();
        let hash = chain_hash(event, &chain.tip);
        let prev_hash = std::mem::replace(&mut chain.tip, hash.clone());
        chain.records.push(AuditRecord {
            event: event.clone(),
            hash,
            prev_hash,
        });
        Ok(())
    }
}

/// Structural 64-hex-char link over the serialised event and the previous
/// hash.  Not cryptographic; sign exported logs downstream if that matters.
fn chain_hash(event: &AuditEvent, prev_hash: &str) -> String {
    let payload = serde_json::to_string(event).unwrap_or_default();
    let mut hasher = DefaultHasher::new();
    prev_hash.hash(&mut hasher);
    payload.hash(&mut hasher);
    let digest = hasher.finish();
    let mut second = DefaultHasher::new();
    digest.hash(&mut second);
    payload.len().hash(&mut second);
    format!("{:016x}{:016x}{:016x}{:016x}", digest, second.finish(), !digest, digest.rotate_left(32))
}
