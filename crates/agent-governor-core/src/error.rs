// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Error types for the governor.
//!
//! Two families live here and they are deliberately kept apart:
//!
//! * [`DenyReason`]: why an action was refused.  These are *verdicts*, carried
//!   inside [`Decision::Deny`](crate::types::Decision::Deny), never raised.
//! * [`GovernorError`]: malformed input and caller-contract violations.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ActionId, RuleMatch};

/// Result type alias using the governor's error type.
pub type Result<T> = std::result::Result<T, GovernorError>;

/// Errors surfaced to callers of the governor and its components.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GovernorError {
    /// Malformed action or argument (empty command, negative cost, unknown
    /// operation, zero-token consume).  Never retried.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// `record` was called for an action that was never allowed by
    /// `authorize`, or was already recorded.
    #[error("Contract violation: action {0} has no pending authorization")]
    UnknownAction(ActionId),

    /// `record` was called with a different principal than `authorize`.
    #[error("Contract violation: action {action} was authorized for '{expected}', not '{actual}'")]
    PrincipalMismatch {
        action: ActionId,
        expected: String,
        actual: String,
    },

    /// Configuration failed validation.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The prompt guard refused an input.
    #[error("Prompt rejected: {0}")]
    PromptRejected(String),

    /// A snapshot store could not load or persist state.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl GovernorError {
    /// Shorthand for [`GovernorError::InvalidArgument`].
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

/// Failure reported by an audit or alert sink.
///
/// Sink failures never change a decision; the governor logs them and moves on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Sink error: {0}")]
pub struct SinkError(pub String);

/// The named limit that tripped a [`DenyReason::RateLimited`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitKind {
    TokenBucket,
    RequestsPerMinute,
    RequestsPerHour,
    RequestsPerDay,
    CostPerHour,
    CostPerDay,
}

impl RateLimitKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RateLimitKind::TokenBucket       => "token-bucket",
            RateLimitKind::RequestsPerMinute => "requests/minute",
            RateLimitKind::RequestsPerHour   => "requests/hour",
            RateLimitKind::RequestsPerDay    => "requests/day",
            RateLimitKind::CostPerHour       => "cost/hour",
            RateLimitKind::CostPerDay        => "cost/day",
        }
    }
}

impl std::fmt::Display for RateLimitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the governor refused an action.
///
/// The `Display` output is suitable for direct display to an operator or for
/// a log line.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DenyReason {
    /// A named rate limit was exceeded.  `retry_after_ms` is `None` when the
    /// limit can never recover (e.g. a zero-rate bucket).
    #[error("Rate limited by {limit} limit (retry after {})", fmt_retry(*retry_after_ms))]
    RateLimited {
        limit: RateLimitKind,
        retry_after_ms: Option<u64>,
    },

    /// The reservation would exceed the session cap.
    #[error("Budget exceeded: spent {spent:.4} + reserved {reserved:.4} + requested {requested:.4} > cap {cap:.4}")]
    BudgetExceeded {
        spent: f64,
        reserved: f64,
        requested: f64,
        cap: f64,
    },

    /// The action matched a deny rule, or matched nothing at all.
    #[error("Policy denied: {rule}")]
    PolicyDenied { rule: RuleMatch },

    /// The dependency's circuit breaker is open.  `retry_after_ms` is `None`
    /// while a half-open trial call is still running.
    #[error("Circuit open for '{dependency}' (retry {})", fmt_circuit_retry(*retry_after_ms))]
    CircuitOpen {
        dependency: String,
        retry_after_ms: Option<u64>,
    },

    /// The principal already has the maximum number of actions in flight.
    #[error("Concurrency limited: {in_flight} action(s) in flight, max {max}")]
    ConcurrencyLimited { in_flight: usize, max: usize },
}

fn fmt_retry(retry_after_ms: Option<u64>) -> String {
    match retry_after_ms {
        Some(ms) => format!("{ms} ms"),
        None => "never".into(),
    }
}

fn fmt_circuit_retry(retry_after_ms: Option<u64>) -> String {
    match retry_after_ms {
        Some(ms) => format!("after {ms} ms"),
        None => "once the in-flight trial call completes".into(),
    }
}
