// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Circuit breaker protecting a downstream dependency (e.g. a model API).
//!
//! ```text
//!            failures >= threshold
//!   Closed ─────────────────────────▶ Open
//!     ▲                                 │ timeout elapsed since last failure
//!     │ trial succeeds                  ▼ (first caller takes the trial token)
//!     └───────────────────────────── HalfOpen ──trial fails──▶ Open (timer restarts)
//! ```
//!
//! A rejected call never reaches the dependency; that is a cost-saving
//! short-circuit, not a dependency error.  All transitions happen under one
//! mutex, and only one HalfOpen trial is in flight at a time.
//!
//! Only the trial holder resolves `HalfOpen`: its outcome goes to
//! [`after_trial`](CircuitBreaker::after_trial).  Outcomes of calls admitted
//! earlier, while the breaker was still closed, arrive through
//! [`after_call`](CircuitBreaker::after_call) and never move a half-open
//! breaker.

use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::clock::SharedClock;

/// Breaker state.  Owned exclusively by [`CircuitBreaker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Result of [`CircuitBreaker::before_call`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPermit {
    /// Ordinary call; report it with [`CircuitBreaker::after_call`].
    Proceed,
    /// The single HalfOpen trial; report it with [`CircuitBreaker::after_trial`]
    /// or give it back with [`CircuitBreaker::abandon_call`].
    Trial,
    /// `retry_after_ms` is `None` while another caller holds the trial.
    Reject { retry_after_ms: Option<u64> },
}

impl CallPermit {
    pub fn is_proceed(self) -> bool {
        matches!(self, CallPermit::Proceed | CallPermit::Trial)
    }

    pub fn is_trial(self) -> bool {
        matches!(self, CallPermit::Trial)
    }
}

/// Breaker tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,
    /// Cool-down after the last failure before a trial is allowed.
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at_ms: Option<u64>,
    /// Transition token: set while the single HalfOpen trial is in flight.
    trial_in_flight: bool,
}

/// Shared breaker for one protected dependency.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use std::time::Duration;
/// use agent_governor_core::circuit::{BreakerSettings, CallPermit, CircuitBreaker, CircuitState};
/// use agent_governor_core::clock::ManualClock;
///
/// let clock = Arc::new(ManualClock::new(0));
/// let settings = BreakerSettings { failure_threshold: 3, timeout: Duration::from_secs(60) };
/// let breaker = CircuitBreaker::new("model-api", settings, clock.clone());
///
/// for _ in 0..3 {
///     breaker.after_call(false);
/// }
/// assert!(matches!(breaker.before_call(), CallPermit::Reject { .. }));
///
/// clock.advance(Duration::from_secs(61));
/// assert_eq!(breaker.before_call(), CallPermit::Trial);
/// breaker.after_trial(true);
/// assert_eq!(breaker.state(), CircuitState::Closed);
/// ```
pub struct CircuitBreaker {
    name: String,
    settings: BreakerSettings,
    clock: SharedClock,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: &str, settings: BreakerSettings, clock: SharedClock) -> Self {
        Self {
            name: name.into(),
            settings,
            clock,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at_ms: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask to call the dependency.
    ///
    /// In `Open`, the first caller after the timeout moves the breaker to
    /// `HalfOpen` and receives [`CallPermit::Trial`]; nobody else gets through
    /// until the trial is resolved by [`after_trial`](Self::after_trial) or
    /// [`abandon_call`](Self::abandon_call).
    pub fn before_call(&self) -> CallPermit {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => CallPermit::Proceed,
            CircuitState::Open => {
                let remaining = self.remaining_timeout(&inner, now);
                if remaining == 0 {
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    tracing::info!(breaker = %self.name, "circuit half-open, admitting trial call");
                    CallPermit::Trial
                } else {
                    CallPermit::Reject { retry_after_ms: Some(remaining) }
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    CallPermit::Reject { retry_after_ms: None }
                } else {
                    inner.trial_in_flight = true;
                    CallPermit::Trial
                }
            }
        }
    }

    /// Non-mutating version of [`before_call`](Self::before_call).
    pub fn peek(&self) -> CallPermit {
        let now = self.clock.now_ms();
        let inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => CallPermit::Proceed,
            CircuitState::Open => match self.remaining_timeout(&inner, now) {
                0 => CallPermit::Trial,
                remaining => CallPermit::Reject { retry_after_ms: Some(remaining) },
            },
            CircuitState::HalfOpen if inner.trial_in_flight => {
                CallPermit::Reject { retry_after_ms: None }
            }
            CircuitState::HalfOpen => CallPermit::Trial,
        }
    }

    /// Report the result of a call admitted with [`CallPermit::Proceed`].
    ///
    /// Such a call was admitted while the breaker was closed, so once the
    /// breaker has left `Closed` its failure only restarts the open timer and
    /// its success is ignored.
    pub fn after_call(&self, success: bool) {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock();
        match (inner.state, success) {
            (CircuitState::Closed, true) => {
                inner.consecutive_failures = 0;
            }
            (CircuitState::Closed, false) => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                if inner.consecutive_failures >= self.settings.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at_ms = Some(now);
                    tracing::info!(
                        breaker = %self.name,
                        failures = inner.consecutive_failures,
                        "circuit opened"
                    );
                }
            }
            (CircuitState::Open, false) => {
                // A straggler admitted before the breaker opened; restart the timer.
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                inner.opened_at_ms = Some(now);
            }
            (CircuitState::HalfOpen, false) => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                tracing::debug!(breaker = %self.name, "stale failure during trial ignored");
            }
            (CircuitState::Open, true) | (CircuitState::HalfOpen, true) => {}
        }
    }

    /// Report the result of the call admitted with [`CallPermit::Trial`].
    pub fn after_trial(&self, success: bool) {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::HalfOpen || !inner.trial_in_flight {
            tracing::warn!(breaker = %self.name, state = ?inner.state, "trial outcome without a trial in flight");
            return;
        }
        inner.trial_in_flight = false;
        if success {
            inner.state = CircuitState::Closed;
            inner.consecutive_failures = 0;
            inner.opened_at_ms = None;
            tracing::info!(breaker = %self.name, "circuit closed after successful trial");
        } else {
            inner.state = CircuitState::Open;
            inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
            inner.opened_at_ms = Some(now);
            tracing::info!(breaker = %self.name, "trial failed, circuit re-opened");
        }
    }

    /// Give back the trial token without a verdict (the trial was cancelled
    /// before it reached the dependency).  Only the trial holder calls this.
    pub fn abandon_call(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.trial_in_flight = false;
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    pub fn opened_at_ms(&self) -> Option<u64> {
        self.inner.lock().opened_at_ms
    }

    fn remaining_timeout(&self, inner: &Inner, now: u64) -> u64 {
        let timeout_ms = self.settings.timeout.as_millis() as u64;
        let opened = inner.opened_at_ms.unwrap_or(now);
        let elapsed = now.saturating_sub(opened);
        timeout_ms.saturating_sub(elapsed)
    }
}

pub(crate) mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom("timeout must be a non-negative number of seconds"));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    fn breaker(threshold: u32, timeout_secs: u64) -> (Arc<ManualClock>, CircuitBreaker) {
        let clock = Arc::new(ManualClock::new(0));
        let settings = BreakerSettings {
            failure_threshold: threshold,
            timeout: Duration::from_secs(timeout_secs),
        };
        let breaker = CircuitBreaker::new("dep", settings, clock.clone());
        (clock, breaker)
    }

    #[test]
    fn test_trips_after_threshold_and_recovers() {
        let (clock, breaker) = breaker(3, 60);
        for _ in 0..3 {
            assert!(breaker.before_call().is_proceed());
            breaker.after_call(false);
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(
            breaker.before_call(),
            CallPermit::Reject { retry_after_ms: Some(60_000) }
        );

        clock.advance(Duration::from_secs(61));
        assert_eq!(breaker.before_call(), CallPermit::Trial);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.after_trial(true);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[test]
    fn test_only_one_trial_in_half_open() {
        let (clock, breaker) = breaker(1, 10);
        breaker.after_call(false);
        clock.advance(Duration::from_secs(10));

        assert_eq!(breaker.before_call(), CallPermit::Trial);
        for _ in 0..5 {
            assert_eq!(breaker.before_call(), CallPermit::Reject { retry_after_ms: None });
        }
    }

    #[test]
    fn test_failed_trial_reopens_with_fresh_timer() {
        let (clock, breaker) = breaker(1, 30);
        breaker.after_call(false);
        clock.advance(Duration::from_secs(30));
        assert!(breaker.before_call().is_proceed());

        clock.advance(Duration::from_secs(5));
        breaker.after_trial(false);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.opened_at_ms(), Some(35_000));

        clock.advance(Duration::from_secs(29));
        assert!(!breaker.before_call().is_proceed());
        clock.advance(Duration::from_secs(1));
        assert!(breaker.before_call().is_proceed());
    }

    #[test]
    fn test_success_resets_consecutive_count() {
        let (_clock, breaker) = breaker(3, 60);
        breaker.after_call(false);
        breaker.after_call(false);
        breaker.after_call(true);
        breaker.after_call(false);
        breaker.after_call(false);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_abandoned_trial_frees_the_token() {
        let (clock, breaker) = breaker(1, 1);
        breaker.after_call(false);
        clock.advance(Duration::from_secs(1));
        assert!(breaker.before_call().is_proceed());
        assert!(!breaker.before_call().is_proceed());

        breaker.abandon_call();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.before_call().is_proceed());
    }

    #[test]
    fn test_peek_does_not_take_the_trial() {
        let (clock, breaker) = breaker(1, 1);
        breaker.after_call(false);
        clock.advance(Duration::from_secs(2));
        assert!(breaker.peek().is_trial());
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.before_call().is_trial());
    }

    #[test]
    fn test_straggler_outcome_does_not_decide_the_trial() {
        let (clock, breaker) = breaker(1, 10);
        // Admitted while closed, finishes late.
        assert_eq!(breaker.before_call(), CallPermit::Proceed);
        assert_eq!(breaker.before_call(), CallPermit::Proceed);
        breaker.after_call(false);
        assert_eq!(breaker.state(), CircuitState::Open);

        clock.advance(Duration::from_secs(10));
        assert_eq!(breaker.before_call(), CallPermit::Trial);

        breaker.after_call(false);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.after_call(true);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.after_trial(true);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.before_call(), CallPermit::Proceed);
    }

    #[test]
    fn test_trial_outcome_without_trial_is_ignored() {
        let (_clock, breaker) = breaker(1, 10);
        breaker.after_trial(false);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[test]
    fn test_concurrent_callers_get_a_single_trial() {
        let clock = Arc::new(ManualClock::new(0));
        let breaker = Arc::new(CircuitBreaker::new(
            "dep",
            BreakerSettings { failure_threshold: 1, timeout: Duration::from_secs(1) },
            clock.clone(),
        ));
        breaker.after_call(false);
        clock.advance(Duration::from_secs(1));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let breaker = Arc::clone(&breaker);
                std::thread::spawn(move || breaker.before_call().is_proceed())
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().expect("thread panicked"))
            .filter(|proceed| *proceed)
            .count();
        assert_eq!(admitted, 1);
    }
}
