// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Async wrapper around [`Governor`] for Tokio services.
//!
//! This module is only compiled when the `async` feature flag is enabled:
//!
//! ```toml
//! [dependencies]
//! agent-governor-core = { version = "0.1", features = ["async"] }
//! ```
//!
//! # Design
//!
//! The governor never blocks on I/O and holds its locks for bounded time, so
//! [`AsyncGovernor`] calls it inline rather than through `spawn_blocking`.
//! What the wrapper adds is [`run`](AsyncGovernor::run): authorize, await the
//! caller's future, record the outcome.  If the returned future is dropped
//! before the call finishes (timeout, `select!`, task abort) the action is
//! recorded as [`Outcome::Cancelled`], so its reservation is released and
//! any breaker trial slot is handed back.
//!
//! A call that outlives `GovernorConfig::action_timeout` is abandoned and
//! recorded as [`Outcome::Failed`] at its estimated cost, so a hanging
//! dependency counts against its breaker.
//!
//! # Example
//!
//! ```rust,no_run
//! # #[cfg(feature = "async")]
//! # {
//! use agent_governor_core::{
//!     async_governor::{AsyncGovernor, Governed},
//!     config::GovernorConfig,
//!     governor::Governor,
//!     types::{Action, PermissionTier},
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let governor = AsyncGovernor::new(Governor::with_config(GovernorConfig::default()).unwrap());
//!     governor.governor().register_principal("agent-001", PermissionTier::Autonomous).unwrap();
//!
//!     let action = Action::new("bash", "git status", 0.01).unwrap();
//!     let result = governor
//!         .run("agent-001", &action, async { Ok::<_, std::io::Error>("clean") })
//!         .await
//!         .unwrap();
//!     assert!(matches!(result, Governed::Completed(Ok("clean"))));
//! }
//! # }
//! ```

#![cfg(feature = "async")]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{DenyReason, Result};
use crate::governor::Governor;
use crate::types::{Action, Decision, Outcome, RiskLevel};

/// Result of [`AsyncGovernor::run`].
#[derive(Debug, Clone, PartialEq)]
pub enum Governed<T> {
    /// The action was allowed and the call ran to completion.
    Completed(T),
    /// The action was denied; the call never ran.
    Denied(DenyReason),
    /// A human must approve first; the call never ran.
    NeedsApproval { reason: String, risk: RiskLevel },
    /// The call ran past the action timeout and was dropped.
    TimedOut { after: Duration },
}

impl<T> Governed<T> {
    pub fn completed(self) -> Option<T> {
        match self {
            Governed::Completed(value) => Some(value),
            _ => None,
        }
    }
}

/// Records `Cancelled` for an allowed action unless disarmed.
struct Settlement<'a> {
    governor: &'a Governor,
    principal: &'a str,
    action: &'a Action,
    armed: bool,
}

impl Drop for Settlement<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::debug!(
            principal = self.principal,
            action = %self.action.summary(),
            "governed call dropped before completion"
        );
        if let Err(err) = self.governor.record(self.principal, self.action, Outcome::Cancelled) {
            tracing::warn!(principal = self.principal, error = %err, "failed to record cancellation");
        }
    }
}

/// Cloneable async handle to a shared [`Governor`].
#[derive(Clone)]
pub struct AsyncGovernor {
    inner: Arc<Governor>,
}

impl AsyncGovernor {
    pub fn new(governor: Governor) -> Self {
        Self { inner: Arc::new(governor) }
    }

    pub fn from_shared(governor: Arc<Governor>) -> Self {
        Self { inner: governor }
    }

    pub fn governor(&self) -> &Arc<Governor> {
        &self.inner
    }

    pub async fn authorize(&self, principal: &str, action: &Action) -> Result<Decision> {
        self.inner.authorize(principal, action)
    }

    pub async fn authorize_approved(&self, principal: &str, action: &Action) -> Result<Decision> {
        self.inner.authorize_approved(principal, action)
    }

    pub async fn record(&self, principal: &str, action: &Action, outcome: Outcome) -> Result<()> {
        self.inner.record(principal, action, outcome)
    }

    /// Authorize `action`, run `call` if allowed, and record the outcome at
    /// the action's estimated cost.
    ///
    /// `Ok(_)` from `call` is recorded as `Succeeded`, `Err(_)` as `Failed`.
    /// A call still running after `action_timeout` is dropped, recorded as
    /// `Failed` and reported as [`Governed::TimedOut`].
    pub async fn run<F, T, E>(
        &self,
        principal: &str,
        action: &Action,
        call: F,
    ) -> Result<Governed<std::result::Result<T, E>>>
    where
        F: Future<Output = std::result::Result<T, E>>,
    {
        let estimated = action.estimated_cost();
        self.run_metered(principal, action, async move { (call.await, estimated) })
            .await
    }

    /// Like [`run`](Self::run), but `call` reports the actual cost alongside
    /// its result.
    pub async fn run_metered<F, T, E>(
        &self,
        principal: &str,
        action: &Action,
        call: F,
    ) -> Result<Governed<std::result::Result<T, E>>>
    where
        F: Future<Output = (std::result::Result<T, E>, f64)>,
    {
        match self.inner.authorize(principal, action)? {
            Decision::Allow => {}
            Decision::Deny { reason } => return Ok(Governed::Denied(reason)),
            Decision::RequiresApproval { reason, risk } => {
                return Ok(Governed::NeedsApproval { reason, risk })
            }
        }

        let mut settlement = Settlement {
            governor: &self.inner,
            principal,
            action,
            armed: true,
        };
        let limit = self.inner.config().action_timeout;
        let finished = tokio::time::timeout(limit, call).await;
        settlement.armed = false;

        let Ok((result, actual_cost)) = finished else {
            tracing::warn!(
                principal,
                action = %action.summary(),
                timeout_secs = limit.as_secs_f64(),
                "governed call timed out"
            );
            let actual_cost = action.estimated_cost();
            self.inner.record(principal, action, Outcome::Failed { actual_cost })?;
            return Ok(Governed::TimedOut { after: limit });
        };

        let outcome = match &result {
            Ok(_) => Outcome::Succeeded { actual_cost },
            Err(_) => Outcome::Failed { actual_cost },
        };
        self.inner.record(principal, action, outcome)?;
        Ok(Governed::Completed(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::audit::MemoryAuditLog;
    use crate::budget::MemoryAlertSink;
    use crate::circuit::{BreakerSettings, CircuitState};
    use crate::clock::ManualClock;
    use crate::config::GovernorConfig;
    use crate::policy::PolicyRule;
    use crate::types::{Effect, PermissionTier};

    fn config(budget_cap: f64) -> GovernorConfig {
        GovernorConfig {
            budget_cap,
            default_tier: PermissionTier::Autonomous,
            policy: vec![
                PolicyRule::command("deploy", "deploy", Effect::RequireApproval),
                PolicyRule::command("any", "*", Effect::Allow),
            ],
            ..GovernorConfig::default()
        }
    }

    fn governor(budget_cap: f64) -> AsyncGovernor {
        governor_from(config(budget_cap))
    }

    fn governor_from(config: GovernorConfig) -> AsyncGovernor {
        AsyncGovernor::new(
            Governor::new(
                config,
                Arc::new(ManualClock::new(0)),
                Arc::new(MemoryAuditLog::new()),
                Arc::new(MemoryAlertSink::new()),
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_run_records_success_at_actual_cost() {
        let gov = governor(10.0);
        let action = Action::new("bash", "make", 2.0).unwrap();
        let result = gov
            .run_metered("p", &action, async { (Ok::<_, String>(7), 3.5) })
            .await
            .unwrap();
        assert_eq!(result, Governed::Completed(Ok(7)));
        assert_eq!(gov.governor().ledger().spent("p", "default"), 3.5);
        assert_eq!(gov.governor().in_flight("p"), 0);
    }

    #[tokio::test]
    async fn test_run_records_failure() {
        let gov = governor(10.0);
        let action = Action::new("bash", "make", 1.0).unwrap();
        let result = gov
            .run("p", &action, async { Err::<(), _>("boom") })
            .await
            .unwrap();
        assert_eq!(result, Governed::Completed(Err("boom")));
        assert_eq!(gov.governor().ledger().spent("p", "default"), 1.0);
    }

    #[tokio::test]
    async fn test_denied_call_never_runs() {
        let gov = governor(1.0);
        let action = Action::new("bash", "make", 5.0).unwrap();
        let ran = std::sync::atomic::AtomicBool::new(false);
        let result = gov
            .run("p", &action, async {
                ran.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok::<_, String>(())
            })
            .await
            .unwrap();
        assert!(matches!(result, Governed::Denied(DenyReason::BudgetExceeded { .. })));
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_approval_is_surfaced() {
        let gov = governor(10.0);
        let action = Action::new("bash", "deploy prod", 0.0).unwrap();
        let result = gov
            .run("p", &action, async { Ok::<_, String>(()) })
            .await
            .unwrap();
        assert!(matches!(result, Governed::NeedsApproval { .. }));
        assert!(gov.authorize_approved("p", &action).await.unwrap().is_allowed());
        gov.record("p", &action, Outcome::Cancelled).await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_call_is_recorded_as_cancelled() {
        let gov = governor(10.0);
        let action = Action::new("bash", "make", 4.0).unwrap();
        let timed_out = tokio::time::timeout(
            Duration::from_millis(20),
            gov.run("p", &action, std::future::pending::<std::result::Result<(), String>>()),
        )
        .await;
        assert!(timed_out.is_err());

        let budget = gov.governor().ledger().get("p", "default").unwrap();
        assert_eq!((budget.spent(), budget.reserved()), (0.0, 0.0));
        assert_eq!(gov.governor().in_flight("p"), 0);
    }

    #[tokio::test]
    async fn test_hung_call_times_out_as_failure() {
        let gov = governor_from(GovernorConfig {
            action_timeout: Duration::from_millis(20),
            breaker: BreakerSettings { failure_threshold: 1, timeout: Duration::from_secs(60) },
            ..config(10.0)
        });
        let action = Action::new("bash", "curl https://api", 2.0)
            .unwrap()
            .against_dependency("api");
        let result = gov
            .run("p", &action, std::future::pending::<std::result::Result<(), String>>())
            .await
            .unwrap();
        assert_eq!(result, Governed::TimedOut { after: Duration::from_millis(20) });

        let budget = gov.governor().ledger().get("p", "default").unwrap();
        assert_eq!((budget.spent(), budget.reserved()), (2.0, 0.0));
        assert_eq!(gov.governor().in_flight("p"), 0);
        assert_eq!(gov.governor().breaker("api").state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_call_within_timeout_completes() {
        let gov = governor_from(GovernorConfig {
            action_timeout: Duration::from_secs(5),
            ..config(10.0)
        });
        let action = Action::new("bash", "make", 1.0).unwrap();
        let result = gov
            .run("p", &action, async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok::<_, String>("built")
            })
            .await
            .unwrap();
        assert_eq!(result, Governed::Completed(Ok("built")));
    }
}
