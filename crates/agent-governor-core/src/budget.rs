// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Per-principal, per-session spending ledger.
//!
//! [`BudgetLedger`] tracks cost for every `(principal, session)` pair:
//!
//! * [`check`](BudgetLedger::check): would a reservation fit? (no state change)
//! * [`reserve`](BudgetLedger::reserve): hold estimated cost for an action in flight
//! * [`commit`](BudgetLedger::commit): settle a reservation with the actual cost
//! * [`release`](BudgetLedger::release): settle a cancelled action at zero cost
//!
//! A reservation fits when `spent + reserved + estimated <= cap`.  `spent`
//! only grows until [`reset_session`](BudgetLedger::reset_session).
//!
//! Every configured alert threshold (a fraction of the cap) fires at most once
//! per session.  When a single reservation jumps across several thresholds,
//! all of them fire.

use std::sync::Arc;

use dashmap::DashMap;
use hashbrown::HashSet;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{DenyReason, GovernorError, Result, SinkError};
use crate::storage::{LedgerSnapshot, SessionRecord};
use crate::types::Decision;

/// Alert thresholds used when none are configured.
pub const DEFAULT_ALERT_THRESHOLDS: [f64; 3] = [0.5, 0.75, 0.9];

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

/// A one-shot notification that a session's usage reached `threshold * cap`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetAlert {
    pub principal: String,
    pub session: String,
    /// Fraction of the cap, e.g. `0.75`.
    pub threshold: f64,
    /// `spent + reserved` when the alert fired.
    pub usage: f64,
    pub cap: f64,
}

/// Receives [`BudgetAlert`]s.  Called synchronously; must not block.
pub trait AlertSink: Send + Sync {
    fn notify(&self, alert: &BudgetAlert) -> std::result::Result<(), SinkError>;
}

/// Writes alerts to `tracing` at `info` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn notify(&self, alert: &BudgetAlert) -> std::result::Result<(), SinkError> {
        tracing::info!(
            target: "agent_governor::budget",
            principal = %alert.principal,
            session = %alert.session,
            threshold = alert.threshold,
            usage = alert.usage,
            cap = alert.cap,
            "budget threshold reached"
        );
        Ok(())
    }
}

/// Collects alerts in memory.  Handy in tests and demos.
#[derive(Debug, Default)]
pub struct MemoryAlertSink {
    alerts: Mutex<Vec<BudgetAlert>>,
}

impl MemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<BudgetAlert> {
        self.alerts.lock().clone()
    }

    pub fn thresholds(&self) -> Vec<f64> {
        self.alerts.lock().iter().map(|a| a.threshold).collect()
    }
}

impl AlertSink for MemoryAlertSink {
    fn notify(&self, alert: &BudgetAlert) -> std::result::Result<(), SinkError> {
        self.alerts.lock().push(alert.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Session budget
// ---------------------------------------------------------------------------

/// Ledger state for one `(principal, session)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionBudget {
    spent: f64,
    reserved: f64,
    cap: f64,
    /// Fired thresholds in basis points (`0.75` → `7500`).
    #[serde(default)]
    alerts_fired: HashSet<u32>,
}

impl SessionBudget {
    pub fn new(cap: f64) -> Self {
        Self {
            spent: 0.0,
            reserved: 0.0,
            cap,
            alerts_fired: HashSet::new(),
        }
    }

    /// Seed `spent`, e.g. when building a snapshot by hand.
    pub fn with_spent(mut self, spent: f64) -> Self {
        self.spent = spent.max(0.0);
        self
    }

    pub fn spent(&self) -> f64 {
        self.spent
    }

    pub fn reserved(&self) -> f64 {
        self.reserved
    }

    pub fn cap(&self) -> f64 {
        self.cap
    }

    /// `cap - spent - reserved`, floored at zero.
    pub fn remaining(&self) -> f64 {
        (self.cap - self.spent - self.reserved).max(0.0)
    }

    pub fn has_fired(&self, threshold: f64) -> bool {
        self.alerts_fired.contains(&basis_points(threshold))
    }

    fn usage(&self) -> f64 {
        self.spent + self.reserved
    }

    fn fits(&self, estimated: f64) -> bool {
        self.usage() + estimated <= self.cap
    }

    fn exceeded(&self, requested: f64) -> DenyReason {
        DenyReason::BudgetExceeded {
            spent: self.spent,
            reserved: self.reserved,
            requested,
            cap: self.cap,
        }
    }

    /// Mark every not-yet-fired threshold at or below current usage and
    /// return them in ascending order.
    fn crossed_thresholds(&mut self, thresholds: &[f64]) -> Vec<f64> {
        if self.cap <= 0.0 {
            return Vec::new();
        }
        let usage = self.usage();
        let cap = self.cap;
        thresholds
            .iter()
            .copied()
            .filter(|t| usage >= t * cap)
            .filter(|t| self.alerts_fired.insert(basis_points(*t)))
            .collect()
    }
}

fn basis_points(threshold: f64) -> u32 {
    (threshold * 10_000.0).round() as u32
}

fn validate_amount(what: &str, amount: f64) -> Result<()> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(GovernorError::invalid(format!(
            "{what} must be a finite, non-negative number (got {amount})"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

type SessionKey = (String, String);

/// Spending ledger with one-shot threshold alerts.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use agent_governor_core::budget::{BudgetLedger, MemoryAlertSink};
///
/// let alerts = Arc::new(MemoryAlertSink::new());
/// let ledger = BudgetLedger::new(10.0, vec![0.5, 0.75, 0.9], alerts.clone());
///
/// assert!(ledger.reserve("agent-001", "s-1", 6.0).unwrap().is_allowed());
/// ledger.commit("agent-001", "s-1", 6.0, 6.0).unwrap();
/// assert_eq!(ledger.spent("agent-001", "s-1"), 6.0);
///
/// // 6 + 5 = 11 > 10
/// assert!(ledger.reserve("agent-001", "s-1", 5.0).unwrap().is_denied());
/// assert_eq!(alerts.thresholds(), vec![0.5]);
/// ```
pub struct BudgetLedger {
    default_cap: f64,
    thresholds: Vec<f64>,
    sessions: DashMap<SessionKey, Arc<Mutex<SessionBudget>>>,
    sink: Arc<dyn AlertSink>,
}

impl BudgetLedger {
    /// `thresholds` are fractions of the cap in `(0, 1]`; they are sorted and
    /// de-duplicated here.
    pub fn new(default_cap: f64, mut thresholds: Vec<f64>, sink: Arc<dyn AlertSink>) -> Self {
        thresholds.retain(|t| t.is_finite() && *t > 0.0);
        thresholds.sort_by(|a, b| a.total_cmp(b));
        thresholds.dedup();
        Self {
            default_cap: default_cap.max(0.0),
            thresholds,
            sessions: DashMap::new(),
            sink,
        }
    }

    fn session(&self, principal: &str, session: &str) -> Arc<Mutex<SessionBudget>> {
        self.sessions
            .entry((principal.to_string(), session.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(SessionBudget::new(self.default_cap))))
            .clone()
    }

    /// `None` if `estimated` fits, otherwise the [`DenyReason`].  No state changes.
    pub fn check(&self, principal: &str, session: &str, estimated: f64) -> Result<Option<DenyReason>> {
        validate_amount("estimated cost", estimated)?;
        let entry = self
            .sessions
            .get(&(principal.to_string(), session.to_string()))
            .map(|e| e.value().clone());
        let verdict = match entry {
            Some(budget) => {
                let budget = budget.lock();
                (!budget.fits(estimated)).then(|| budget.exceeded(estimated))
            }
            None => {
                let fresh = SessionBudget::new(self.default_cap);
                (!fresh.fits(estimated)).then(|| fresh.exceeded(estimated))
            }
        };
        Ok(verdict)
    }

    /// Hold `estimated` against the session.  Returns `Allow` or a
    /// `BudgetExceeded` deny; a deny leaves the ledger untouched.
    pub fn reserve(&self, principal: &str, session: &str, estimated: f64) -> Result<Decision> {
        validate_amount("estimated cost", estimated)?;
        let budget = self.session(principal, session);
        let (decision, fired) = {
            let mut budget = budget.lock();
            if !budget.fits(estimated) {
                let reason = budget.exceeded(estimated);
                tracing::debug!(principal, session, %reason, "budget reservation refused");
                (Decision::deny(reason), Vec::new())
            } else {
                budget.reserved += estimated;
                let fired = budget.crossed_thresholds(&self.thresholds);
                (Decision::Allow, self.alerts(principal, session, &budget, fired))
            }
        };
        self.dispatch(fired);
        Ok(decision)
    }

    /// Settle a reservation: `spent += actual`, `reserved -= reserved_amount`.
    ///
    /// `actual` may differ from the reservation in either direction; the cap
    /// is not re-checked because the cost has already been incurred.
    ///
    /// # Errors
    ///
    /// [`GovernorError::InvalidArgument`] for a negative or non-finite amount.
    pub fn commit(&self, principal: &str, session: &str, reserved_amount: f64, actual: f64) -> Result<()> {
        validate_amount("actual cost", actual)?;
        validate_amount("reserved amount", reserved_amount)?;
        let budget = self.session(principal, session);
        let fired = {
            let mut budget = budget.lock();
            budget.reserved = (budget.reserved - reserved_amount).max(0.0);
            budget.spent += actual;
            tracing::debug!(
                principal,
                session,
                actual,
                spent = budget.spent,
                cap = budget.cap,
                "budget committed"
            );
            let fired = budget.crossed_thresholds(&self.thresholds);
            self.alerts(principal, session, &budget, fired)
        };
        self.dispatch(fired);
        Ok(())
    }

    /// Release a reservation without spending anything (a cancelled action).
    pub fn release(&self, principal: &str, session: &str, reserved_amount: f64) -> Result<()> {
        self.commit(principal, session, reserved_amount, 0.0)
    }

    /// Start the session over: `spent` and fired alerts are cleared.
    /// Outstanding reservations are kept so their actions can still settle.
    pub fn reset_session(&self, principal: &str, session: &str) {
        let budget = self.session(principal, session);
        let mut budget = budget.lock();
        budget.spent = 0.0;
        budget.alerts_fired.clear();
        tracing::info!(principal, session, "budget session reset");
    }

    /// Change the cap of one session.
    pub fn set_cap(&self, principal: &str, session: &str, cap: f64) -> Result<()> {
        validate_amount("budget cap", cap)?;
        self.session(principal, session).lock().cap = cap;
        Ok(())
    }

    pub fn spent(&self, principal: &str, session: &str) -> f64 {
        self.get(principal, session).map_or(0.0, |b| b.spent)
    }

    /// Copy of the session's state, if the ledger has seen it.
    pub fn get(&self, principal: &str, session: &str) -> Option<SessionBudget> {
        self.sessions
            .get(&(principal.to_string(), session.to_string()))
            .map(|entry| {
                let budget = entry.value().lock();
                budget.clone()
            })
    }

    /// Copy every session into a [`LedgerSnapshot`].
    pub fn snapshot(&self, taken_at_ms: u64) -> LedgerSnapshot {
        let sessions = self
            .sessions
            .iter()
            .map(|entry| {
                let (principal, session) = entry.key().clone();
                let budget = entry.value().lock().clone();
                SessionRecord {
                    principal,
                    session,
                    budget,
                }
            })
            .collect();
        LedgerSnapshot::new(taken_at_ms, sessions)
    }

    /// Replace ledger state with `snapshot`.
    ///
    /// Reservations recorded in the snapshot belong to actions that can no
    /// longer be settled, so they are charged as spent.
    pub fn restore(&self, snapshot: &LedgerSnapshot) -> Result<()> {
        for record in &snapshot.sessions {
            validate_amount("snapshot spent", record.budget.spent)?;
            validate_amount("snapshot reserved", record.budget.reserved)?;
            validate_amount("snapshot cap", record.budget.cap)?;
        }
        self.sessions.clear();
        for record in &snapshot.sessions {
            let mut budget = record.budget.clone();
            budget.spent += budget.reserved;
            budget.reserved = 0.0;
            self.sessions.insert(
                (record.principal.clone(), record.session.clone()),
                Arc::new(Mutex::new(budget)),
            );
        }
        tracing::info!(sessions = snapshot.sessions.len(), "budget ledger restored");
        Ok(())
    }

    fn alerts(&self, principal: &str, session: &str, budget: &SessionBudget, fired: Vec<f64>) -> Vec<BudgetAlert> {
        fired
            .into_iter()
            .map(|threshold| BudgetAlert {
                principal: principal.into(),
                session: session.into(),
                threshold,
                usage: budget.usage(),
                cap: budget.cap,
            })
            .collect()
    }

    fn dispatch(&self, alerts: Vec<BudgetAlert>) {
        for alert in alerts {
            if let Err(err) = self.sink.notify(&alert) {
                tracing::warn!(
                    principal = %alert.principal,
                    session = %alert.session,
                    threshold = alert.threshold,
                    error = %err,
                    "alert sink failed; continuing"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger(cap: f64) -> (Arc<MemoryAlertSink>, BudgetLedger) {
        let sink = Arc::new(MemoryAlertSink::new());
        let ledger = BudgetLedger::new(cap, DEFAULT_ALERT_THRESHOLDS.to_vec(), sink.clone());
        (sink, ledger)
    }

    struct FailingSink;

    impl AlertSink for FailingSink {
        fn notify(&self, _alert: &BudgetAlert) -> std::result::Result<(), SinkError> {
            Err(SinkError("pager offline".into()))
        }
    }

    #[test]
    fn test_reserve_commit_then_overflow() {
        let (_sink, ledger) = ledger(10.0);
        assert!(ledger.reserve("p", "s", 6.0).unwrap().is_allowed());
        ledger.commit("p", "s", 6.0, 6.0).unwrap();
        assert_eq!(ledger.spent("p", "s"), 6.0);

        let decision = ledger.reserve("p", "s", 5.0).unwrap();
        match decision.deny_reason() {
            Some(DenyReason::BudgetExceeded { spent, requested, cap, .. }) => {
                assert_eq!((*spent, *requested, *cap), (6.0, 5.0, 10.0));
            }
            other => panic!("expected BudgetExceeded, got {other:?}"),
        }
        // The refused reservation left nothing behind.
        assert_eq!(ledger.get("p", "s").unwrap().reserved(), 0.0);
    }

    #[test]
    fn test_reservations_count_against_cap() {
        let (_sink, ledger) = ledger(10.0);
        assert!(ledger.reserve("p", "s", 6.0).unwrap().is_allowed());
        assert!(ledger.reserve("p", "s", 5.0).unwrap().is_denied());
        ledger.release("p", "s", 6.0).unwrap();
        assert!(ledger.reserve("p", "s", 5.0).unwrap().is_allowed());
        assert_eq!(ledger.spent("p", "s"), 0.0);
    }

    #[test]
    fn test_exact_cap_is_allowed() {
        let (_sink, ledger) = ledger(10.0);
        assert!(ledger.reserve("p", "s", 10.0).unwrap().is_allowed());
        assert!(ledger.reserve("p", "s", 0.0).unwrap().is_allowed());
    }

    #[test]
    fn test_each_threshold_fires_once_per_session() {
        let (sink, ledger) = ledger(100.0);
        for _ in 0..3 {
            // Reserve then release around the 50% mark repeatedly.
            assert!(ledger.reserve("p", "s", 55.0).unwrap().is_allowed());
            ledger.release("p", "s", 55.0).unwrap();
        }
        assert_eq!(sink.thresholds(), vec![0.5]);

        for _ in 0..5 {
            ledger.reserve("p", "s", 10.0).unwrap();
            ledger.commit("p", "s", 10.0, 10.0).unwrap();
        }
        assert_eq!(sink.thresholds(), vec![0.5]);
        assert_eq!(ledger.spent("p", "s"), 50.0);

        ledger.reserve("p", "s", 30.0).unwrap();
        ledger.commit("p", "s", 30.0, 30.0).unwrap();
        ledger.reserve("p", "s", 15.0).unwrap();
        assert_eq!(sink.thresholds(), vec![0.5, 0.75, 0.9]);
    }

    #[test]
    fn test_single_jump_fires_every_crossed_threshold() {
        let (sink, ledger) = ledger(10.0);
        ledger.reserve("p", "s", 9.5).unwrap();
        assert_eq!(sink.thresholds(), vec![0.5, 0.75, 0.9]);
    }

    #[test]
    fn test_commit_above_estimate_can_fire_alerts() {
        let (sink, ledger) = ledger(10.0);
        ledger.reserve("p", "s", 1.0).unwrap();
        assert!(sink.alerts().is_empty());
        ledger.commit("p", "s", 1.0, 8.0).unwrap();
        assert_eq!(sink.thresholds(), vec![0.5, 0.75]);
    }

    #[test]
    fn test_reset_session_rearms_alerts() {
        let (sink, ledger) = ledger(10.0);
        ledger.reserve("p", "s", 6.0).unwrap();
        ledger.commit("p", "s", 6.0, 6.0).unwrap();
        ledger.reset_session("p", "s");
        assert_eq!(ledger.spent("p", "s"), 0.0);
        ledger.reserve("p", "s", 6.0).unwrap();
        assert_eq!(sink.thresholds(), vec![0.5, 0.5]);
    }

    #[test]
    fn test_sessions_and_principals_are_independent() {
        let (_sink, ledger) = ledger(10.0);
        ledger.reserve("p", "s1", 10.0).unwrap();
        assert!(ledger.reserve("p", "s2", 10.0).unwrap().is_allowed());
        assert!(ledger.reserve("q", "s1", 10.0).unwrap().is_allowed());
    }

    #[test]
    fn test_invalid_amounts_are_rejected() {
        let (_sink, ledger) = ledger(10.0);
        assert!(ledger.reserve("p", "s", -1.0).is_err());
        assert!(ledger.commit("p", "s", 0.0, f64::NAN).is_err());
        assert!(ledger.set_cap("p", "s", -5.0).is_err());
        assert!(ledger.check("p", "s", f64::INFINITY).is_err());
    }

    #[test]
    fn test_check_does_not_create_state() {
        let (_sink, ledger) = ledger(1.0);
        assert!(ledger.check("p", "s", 0.5).unwrap().is_none());
        assert!(ledger.check("p", "s", 1.5).unwrap().is_some());
        assert!(ledger.get("p", "s").is_none());
    }

    #[test]
    fn test_set_cap_applies_to_session() {
        let (_sink, ledger) = ledger(1.0);
        ledger.set_cap("p", "s", 100.0).unwrap();
        assert!(ledger.reserve("p", "s", 50.0).unwrap().is_allowed());
        assert!(ledger.reserve("p", "other", 50.0).unwrap().is_denied());
    }

    #[test]
    fn test_sink_failure_does_not_change_decision() {
        let ledger = BudgetLedger::new(10.0, vec![0.5], Arc::new(FailingSink));
        assert!(ledger.reserve("p", "s", 9.0).unwrap().is_allowed());
        assert!(ledger.get("p", "s").unwrap().has_fired(0.5));
    }

    #[test]
    fn test_snapshot_restore_charges_outstanding_reservations() {
        let (_sink, ledger) = ledger(10.0);
        ledger.reserve("p", "s", 2.0).unwrap();
        ledger.commit("p", "s", 2.0, 2.0).unwrap();
        ledger.reserve("p", "s", 6.0).unwrap();
        let snapshot = ledger.snapshot(42);

        let (_sink, fresh) = self::ledger(10.0);
        fresh.restore(&snapshot).unwrap();
        let budget = fresh.get("p", "s").unwrap();
        assert_eq!(budget.spent(), 8.0);
        assert_eq!(budget.reserved(), 0.0);
        assert!(budget.has_fired(0.75));
    }
}
