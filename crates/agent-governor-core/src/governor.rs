// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Execution governor: the top-level composition of all components.
//!
//! [`Governor`] exposes one decision call and one settlement call:
//!
//! * [`authorize`](Governor::authorize) : classify an action and admit it or not
//! * [`record`](Governor::record)       : report what happened to an admitted action
//!
//! ## Evaluation order
//!
//! 1. **Policy**: a `Deny` halts immediately; `RequireApproval` is remembered
//!    and evaluation continues.  Permission tiers apply here.
//! 2. **Concurrency**: at most `max_in_flight_per_principal` unrecorded actions.
//! 3. **Token bucket** admission.
//! 4. **Sliding windows**: the first exceeded limit is reported.
//! 5. **Budget** reservation.
//! 6. **Circuit breaker**, only when the action names a protected dependency.
//!
//! The whole sequence runs under the principal's lock, and side effects
//! (token, window entry, reservation, trial slot, in-flight slot) are applied
//! only when the final decision is `Allow`.  A `Deny` or `RequiresApproval`
//! leaves no state behind, so an approved action is simply re-submitted
//! through [`authorize_approved`](Governor::authorize_approved).

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::audit::{AuditEvent, AuditSink, TracingAuditSink};
use crate::budget::{AlertSink, BudgetLedger, TracingAlertSink};
use crate::circuit::{CallPermit, CircuitBreaker};
use crate::clock::{MonotonicClock, SharedClock};
use crate::config::GovernorConfig;
use crate::error::{DenyReason, GovernorError, RateLimitKind, Result};
use crate::guard::{PromptGuard, SecretRedactor};
use crate::policy::PolicyEngine;
use crate::storage::SnapshotStore;
use crate::token_bucket::TokenBucketLimiter;
use crate::types::{
    Action, ActionId, Decision, Effect, Outcome, PermissionTier, Principal, RiskLevel, RuleMatch,
};
use crate::window::SlidingWindowCounter;

/// Tokens taken from the bucket per action.
const TOKENS_PER_ACTION: f64 = 1.0;

// ---------------------------------------------------------------------------
// Per-principal state
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct InFlight {
    session: String,
    reserved: f64,
    dependency: Option<String>,
    /// Holds the dependency breaker's HalfOpen trial.
    holds_trial: bool,
}

#[derive(Debug)]
struct PrincipalState {
    principal: Principal,
    in_flight: HashMap<ActionId, InFlight>,
}

enum Evaluation {
    Admit,
    Decided(Decision),
}

// ---------------------------------------------------------------------------
// Governor
// ---------------------------------------------------------------------------

/// Policy-gated execution governor.
///
/// `Governor` is `Send + Sync`; share it with an `Arc`.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use agent_governor_core::audit::MemoryAuditLog;
/// use agent_governor_core::budget::TracingAlertSink;
/// use agent_governor_core::clock::ManualClock;
/// use agent_governor_core::config::GovernorConfig;
/// use agent_governor_core::governor::Governor;
/// use agent_governor_core::types::{Action, Outcome, PermissionTier};
///
/// let audit = Arc::new(MemoryAuditLog::new());
/// let governor = Governor::new(
///     GovernorConfig::default(),
///     Arc::new(ManualClock::new(0)),
///     audit.clone(),
///     Arc::new(TracingAlertSink),
/// )
/// .unwrap();
/// governor.register_principal("agent-001", PermissionTier::Autonomous).unwrap();
///
/// let action = Action::new("bash", "git status", 0.01).unwrap();
/// let decision = governor.authorize("agent-001", &action).unwrap();
/// assert!(decision.is_allowed());
///
/// governor
///     .record("agent-001", &action, Outcome::Succeeded { actual_cost: 0.01 })
///     .unwrap();
/// assert_eq!(audit.len(), 2);
/// ```
pub struct Governor {
    config: GovernorConfig,
    clock: SharedClock,
    policy: PolicyEngine,
    tokens: TokenBucketLimiter,
    windows: SlidingWindowCounter,
    ledger: BudgetLedger,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    principals: DashMap<String, Arc<Mutex<PrincipalState>>>,
    owners: DashMap<ActionId, String>,
    audit: Arc<dyn AuditSink>,
    guard: PromptGuard,
    redactor: Option<SecretRedactor>,
}

impl Governor {
    /// Build a governor from a validated config and explicit collaborators.
    ///
    /// # Errors
    ///
    /// [`GovernorError::Config`] when `config` fails
    /// [`validate`](GovernorConfig::validate).
    pub fn new(
        config: GovernorConfig,
        clock: SharedClock,
        audit: Arc<dyn AuditSink>,
        alerts: Arc<dyn AlertSink>,
    ) -> Result<Self> {
        config.validate()?;
        let redactor = if config.redact_audit_targets {
            Some(SecretRedactor::new()?)
        } else {
            None
        };
        Ok(Self {
            policy: PolicyEngine::new(config.policy.clone()),
            tokens: TokenBucketLimiter::new(config.token_rate, config.token_capacity, clock.clone()),
            windows: SlidingWindowCounter::new(clock.clone()),
            ledger: BudgetLedger::new(config.budget_cap, config.alert_thresholds.clone(), alerts),
            breakers: DashMap::new(),
            principals: DashMap::new(),
            owners: DashMap::new(),
            guard: PromptGuard::new(config.guard.clone()),
            redactor,
            audit,
            clock,
            config,
        })
    }

    /// A governor on the real clock that audits and alerts through `tracing`.
    pub fn with_config(config: GovernorConfig) -> Result<Self> {
        Self::new(
            config,
            Arc::new(MonotonicClock::new()),
            Arc::new(TracingAuditSink),
            Arc::new(TracingAlertSink),
        )
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    pub fn ledger(&self) -> &BudgetLedger {
        &self.ledger
    }

    // -----------------------------------------------------------------------
    // Principals
    // -----------------------------------------------------------------------

    fn state(&self, id: &str) -> Arc<Mutex<PrincipalState>> {
        self.principals
            .entry(id.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(PrincipalState {
                    principal: Principal {
                        id: id.to_string(),
                        tier: self.config.default_tier,
                        first_seen_ms: self.clock.now_ms(),
                    },
                    in_flight: HashMap::new(),
                }))
            })
            .clone()
    }

    /// Create the principal with `tier`, or change the tier of an existing one.
    pub fn register_principal(&self, id: &str, tier: PermissionTier) -> Result<Principal> {
        validate_principal(id)?;
        let state = self.state(id);
        let mut state = state.lock();
        state.principal.tier = tier;
        tracing::info!(principal = id, %tier, "principal registered");
        Ok(state.principal.clone())
    }

    /// Change the tier of a principal the governor already knows.
    pub fn set_tier(&self, id: &str, tier: PermissionTier) -> Result<()> {
        let state = self
            .principals
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| GovernorError::invalid(format!("unknown principal '{id}'")))?;
        let mut state = state.lock();
        let previous = state.principal.tier;
        state.principal.tier = tier;
        tracing::info!(principal = id, from = %previous, to = %tier, "permission tier changed");
        Ok(())
    }

    pub fn principal(&self, id: &str) -> Option<Principal> {
        self.principals.get(id).map(|entry| {
            let state = entry.value().lock();
            state.principal.clone()
        })
    }

    /// Number of allowed actions the principal has not recorded yet.
    pub fn in_flight(&self, id: &str) -> usize {
        self.principals.get(id).map_or(0, |entry| {
            let state = entry.value().lock();
            state.in_flight.len()
        })
    }

    // -----------------------------------------------------------------------
    // Authorization
    // -----------------------------------------------------------------------

    /// Decide whether `principal` may perform `action`.
    ///
    /// Deny reasons are returned as [`Decision::Deny`], never as errors.
    ///
    /// # Errors
    ///
    /// [`GovernorError::InvalidArgument`] for an empty principal id or an
    /// action that is already in flight.
    pub fn authorize(&self, principal: &str, action: &Action) -> Result<Decision> {
        self.authorize_inner(principal, action, false)
    }

    /// Re-submit an action a human approved after a
    /// [`Decision::RequiresApproval`].
    ///
    /// Approval only lifts `RequireApproval`; every deny still applies, and
    /// limits are re-evaluated against current state.
    pub fn authorize_approved(&self, principal: &str, action: &Action) -> Result<Decision> {
        self.authorize_inner(principal, action, true)
    }

    fn authorize_inner(&self, principal: &str, action: &Action, approved: bool) -> Result<Decision> {
        validate_principal(principal)?;
        let state = self.state(principal);
        let decision = {
            let mut state = state.lock();
            match self.evaluate(&state, principal, action, approved)? {
                Evaluation::Admit => self.admit(&mut state, principal, action)?,
                Evaluation::Decided(decision) => decision,
            }
        };

        match &decision {
            Decision::Allow => {
                tracing::debug!(principal, action = %action.summary(), approved, "action allowed");
            }
            Decision::Deny { reason } => {
                tracing::debug!(principal, action = %action.summary(), %reason, "action denied");
            }
            Decision::RequiresApproval { risk, .. } => {
                tracing::debug!(principal, action = %action.summary(), %risk, "action requires approval");
            }
        }

        self.emit(AuditEvent::authorized(
            principal,
            action,
            self.audit_target(action),
            decision.clone(),
            self.clock.now_ms(),
        ));
        Ok(decision)
    }

    /// Run every check without changing any state.
    fn evaluate(
        &self,
        state: &PrincipalState,
        principal: &str,
        action: &Action,
        approved: bool,
    ) -> Result<Evaluation> {
        if state.in_flight.contains_key(&action.id()) || self.owners.contains_key(&action.id()) {
            return Err(already_authorized(action.id()));
        }

        // 1. Policy and tier.
        let classification = self.policy.classify(action);
        if classification.effect == Effect::Deny {
            return Ok(deny(DenyReason::PolicyDenied { rule: classification.matched }));
        }

        let tier = state.principal.tier;
        let operation = action.operation();
        if tier == PermissionTier::ReadOnly && operation.is_mutating() {
            return Ok(deny(DenyReason::PolicyDenied {
                rule: RuleMatch::Tier { tier, operation },
            }));
        }

        let mut approval: Option<(String, RiskLevel)> = match classification.effect {
            Effect::RequireApproval => Some((classification.reason, classification.risk)),
            _ if tier == PermissionTier::Supervised && operation.is_mutating() => Some((
                format!("{tier} principal requests {}", action.summary()),
                classification.risk,
            )),
            _ => None,
        };
        if approved {
            approval = None;
        }

        // 2. Concurrency.
        let max = self.config.max_in_flight_per_principal;
        if state.in_flight.len() >= max {
            return Ok(deny(DenyReason::ConcurrencyLimited {
                in_flight: state.in_flight.len(),
                max,
            }));
        }

        // 3. Token bucket.
        if !self.tokens.can_consume(principal, TOKENS_PER_ACTION)? {
            return Ok(deny(DenyReason::RateLimited {
                limit: RateLimitKind::TokenBucket,
                retry_after_ms: self.tokens.retry_after_ms(principal, TOKENS_PER_ACTION),
            }));
        }

        // 4. Sliding windows.
        let cost = action.estimated_cost();
        if let Some(trip) = self.windows.check(principal, &self.config.rate_limits, cost) {
            return Ok(deny(DenyReason::RateLimited {
                limit: trip.limit,
                retry_after_ms: trip.retry_after_ms,
            }));
        }

        // 5. Budget.
        if let Some(reason) = self.ledger.check(principal, action.session(), cost)? {
            return Ok(deny(reason));
        }

        // 6. Circuit breaker.
        if let Some(dependency) = action.dependency() {
            if let CallPermit::Reject { retry_after_ms } = self.breaker(dependency).peek() {
                return Ok(deny(DenyReason::CircuitOpen {
                    dependency: dependency.into(),
                    retry_after_ms,
                }));
            }
        }

        Ok(match approval {
            Some((reason, risk)) => Evaluation::Decided(Decision::RequiresApproval { reason, risk }),
            None => Evaluation::Admit,
        })
    }

    /// Apply the side effects of an `Allow`.  Still under the principal lock.
    fn admit(&self, state: &mut PrincipalState, principal: &str, action: &Action) -> Result<Decision> {
        // Principals lock independently, so ownership is claimed atomically
        // here before anything is reserved.
        match self.owners.entry(action.id()) {
            Entry::Occupied(_) => return Err(already_authorized(action.id())),
            Entry::Vacant(slot) => {
                slot.insert(principal.to_string());
            }
        }

        let admitted = self.admit_owned(state, principal, action);
        if !matches!(admitted, Ok(Decision::Allow)) {
            self.owners.remove(&action.id());
        }
        admitted
    }

    fn admit_owned(&self, state: &mut PrincipalState, principal: &str, action: &Action) -> Result<Decision> {
        let session = action.session();
        let cost = action.estimated_cost();

        let reservation = self.ledger.reserve(principal, session, cost)?;
        if !reservation.is_allowed() {
            return Ok(reservation);
        }

        // The breaker is shared across principals, so the trial slot seen by
        // `peek` may have been taken since.
        let mut holds_trial = false;
        if let Some(dependency) = action.dependency() {
            match self.breaker(dependency).before_call() {
                CallPermit::Reject { retry_after_ms } => {
                    self.ledger.release(principal, session, cost)?;
                    return Ok(Decision::deny(DenyReason::CircuitOpen {
                        dependency: dependency.into(),
                        retry_after_ms,
                    }));
                }
                CallPermit::Trial => holds_trial = true,
                CallPermit::Proceed => {}
            }
        }

        if !self.tokens.consume(principal, TOKENS_PER_ACTION)? {
            self.ledger.release(principal, session, cost)?;
            if let (Some(dependency), true) = (action.dependency(), holds_trial) {
                self.breaker(dependency).abandon_call();
            }
            return Ok(Decision::deny(DenyReason::RateLimited {
                limit: RateLimitKind::TokenBucket,
                retry_after_ms: self.tokens.retry_after_ms(principal, TOKENS_PER_ACTION),
            }));
        }

        self.windows.record(principal, cost);
        state.in_flight.insert(
            action.id(),
            InFlight {
                session: session.to_string(),
                reserved: cost,
                dependency: action.dependency().map(str::to_string),
                holds_trial,
            },
        );
        Ok(Decision::Allow)
    }

    // -----------------------------------------------------------------------
    // Settlement
    // -----------------------------------------------------------------------

    /// Report the outcome of an allowed action.
    ///
    /// Forwards success or failure to the dependency's breaker, settles the
    /// budget reservation (at zero cost for [`Outcome::Cancelled`]) and frees
    /// the in-flight slot.
    ///
    /// # Errors
    ///
    /// * [`GovernorError::UnknownAction`] if the action was never allowed or
    ///   was already recorded.
    /// * [`GovernorError::PrincipalMismatch`] if it was allowed for someone else.
    /// * [`GovernorError::InvalidArgument`] for a negative or non-finite cost.
    pub fn record(&self, principal: &str, action: &Action, outcome: Outcome) -> Result<()> {
        let actual = outcome.actual_cost();
        if !actual.is_finite() || actual < 0.0 {
            return Err(GovernorError::invalid(format!(
                "actual cost must be a finite, non-negative number (got {actual})"
            )));
        }

        let id = action.id();
        let owner = self.owners.get(&id).map(|entry| entry.value().clone());
        match owner {
            None => {
                tracing::warn!(principal, action_id = %id, "record for unknown or settled action");
                return Err(GovernorError::UnknownAction(id));
            }
            Some(owner) if owner != principal => {
                tracing::warn!(principal, owner = %owner, action_id = %id, "record from wrong principal");
                return Err(GovernorError::PrincipalMismatch {
                    action: id,
                    expected: owner,
                    actual: principal.to_string(),
                });
            }
            Some(_) => {}
        }

        let state = self
            .principals
            .get(principal)
            .map(|entry| entry.value().clone())
            .ok_or(GovernorError::UnknownAction(id))?;
        {
            let mut state = state.lock();
            let entry = state
                .in_flight
                .remove(&id)
                .ok_or(GovernorError::UnknownAction(id))?;
            self.owners.remove(&id);

            match outcome {
                Outcome::Cancelled => self.ledger.release(principal, &entry.session, entry.reserved)?,
                _ => self.ledger.commit(principal, &entry.session, entry.reserved, actual)?,
            }

            if let Some(dependency) = &entry.dependency {
                let breaker = self.breaker(dependency);
                match (outcome, entry.holds_trial) {
                    (Outcome::Succeeded { .. }, true) => breaker.after_trial(true),
                    (Outcome::Failed { .. }, true) => breaker.after_trial(false),
                    (Outcome::Cancelled, true) => breaker.abandon_call(),
                    (Outcome::Succeeded { .. }, false) => breaker.after_call(true),
                    (Outcome::Failed { .. }, false) => breaker.after_call(false),
                    (Outcome::Cancelled, false) => {}
                }
            }
        }

        tracing::debug!(principal, action = %action.summary(), outcome = outcome.label(), actual, "action recorded");
        self.emit(AuditEvent::recorded(
            principal,
            action,
            self.audit_target(action),
            outcome,
            self.clock.now_ms(),
        ));
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Components
    // -----------------------------------------------------------------------

    /// The breaker guarding `dependency`, created closed on first use.
    pub fn breaker(&self, dependency: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(dependency.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(dependency, self.config.breaker, self.clock.clone()))
            })
            .clone()
    }

    /// Requests the principal was allowed within `window`.
    pub fn requests_since(&self, principal: &str, window: Duration) -> usize {
        self.windows.count_since(principal, window)
    }

    /// Current token balance of the principal's bucket.
    pub fn available_tokens(&self, principal: &str) -> f64 {
        self.tokens.available(principal)
    }

    /// Start a budget session over.  Outstanding reservations survive.
    pub fn reset_session(&self, principal: &str, session: &str) {
        let state = self.state(principal);
        let _guard = state.lock();
        self.ledger.reset_session(principal, session);
    }

    pub fn set_budget_cap(&self, principal: &str, session: &str, cap: f64) -> Result<()> {
        let state = self.state(principal);
        let _guard = state.lock();
        self.ledger.set_cap(principal, session, cap)
    }

    // -----------------------------------------------------------------------
    // Guard
    // -----------------------------------------------------------------------

    /// Screen a prompt with the configured [`PromptGuard`].
    pub fn sanitize_prompt(&self, prompt: &str) -> Result<String> {
        self.guard.sanitize(prompt)
    }

    /// Mask secrets in `text` if redaction is enabled.
    pub fn redact<'a>(&self, text: &'a str) -> Cow<'a, str> {
        match &self.redactor {
            Some(redactor) => redactor.redact(text),
            None => Cow::Borrowed(text),
        }
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Write the budget ledger to `store`.
    pub fn save_ledger(&self, store: &dyn SnapshotStore) -> Result<()> {
        let snapshot = self.ledger.snapshot(self.clock.now_ms());
        store.save(&snapshot)?;
        tracing::info!(sessions = snapshot.sessions.len(), "budget ledger saved");
        Ok(())
    }

    /// Replace the budget ledger with the snapshot in `store`, if any.
    /// Returns whether a snapshot was found.
    pub fn load_ledger(&self, store: &dyn SnapshotStore) -> Result<bool> {
        match store.load()? {
            Some(snapshot) => {
                self.ledger.restore(&snapshot)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn audit_target(&self, action: &Action) -> String {
        self.redact(action.target()).into_owned()
    }

    fn emit(&self, event: AuditEvent) {
        if let Err(err) = self.audit.emit(&event) {
            tracing::warn!(
                principal = %event.principal,
                action_id = %event.action_id,
                error = %err,
                "audit sink failed; continuing"
            );
        }
    }
}

fn deny(reason: DenyReason) -> Evaluation {
    Evaluation::Decided(Decision::deny(reason))
}

fn already_authorized(id: ActionId) -> GovernorError {
    GovernorError::invalid(format!("action {id} is already authorized and not yet recorded"))
}

fn validate_principal(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(GovernorError::invalid("principal id must not be empty"));
    }
    Ok(())
}
