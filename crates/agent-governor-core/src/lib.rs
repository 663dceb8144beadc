// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! # agent-governor-core
//!
//! Policy-gated execution governor for autonomous agent actions.
//!
//! Every action an agent wants to take (a shell command, a file read or write,
//! a network call) is submitted to the [`Governor`] first.  The governor
//! classifies it against an ordered rule set, applies the principal's
//! permission tier, rate limits, budget and circuit breakers, and answers
//! `Allow`, `Deny` or `RequiresApproval`.  Allowed actions are later settled
//! with [`Governor::record`].
//!
//! ## Architecture
//!
//! ```text
//! Governor
//!   ├── PolicyEngine          classify actions against ordered rules
//!   ├── TokenBucketLimiter    per-principal burst admission
//!   ├── SlidingWindowCounter  per-minute / hour / day request and cost limits
//!   ├── BudgetLedger          per-session spend, reservations, threshold alerts
//!   ├── CircuitBreaker        per-dependency failure isolation
//!   ├── AuditSink             one event per decision and per outcome
//!   └── PromptGuard / SecretRedactor
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use agent_governor_core::{
//!     Action, Decision, Governor, GovernorConfig, Outcome, PermissionTier,
//! };
//!
//! let governor = Governor::with_config(GovernorConfig::default()).unwrap();
//! governor.register_principal("agent-001", PermissionTier::Autonomous).unwrap();
//!
//! let action = Action::new("bash", "git status", 0.01).unwrap();
//! let decision = governor.authorize("agent-001", &action).unwrap();
//! assert_eq!(decision, Decision::Allow);
//!
//! governor
//!     .record("agent-001", &action, Outcome::Succeeded { actual_cost: 0.01 })
//!     .unwrap();
//!
//! // Credentials are never readable.
//! let secret = Action::new("read", ".env", 0.0).unwrap();
//! assert!(governor.authorize("agent-001", &secret).unwrap().is_denied());
//! ```

pub mod audit;
pub mod budget;
pub mod circuit;
pub mod clock;
pub mod config;
pub mod error;
pub mod governor;
pub mod guard;
pub mod policy;
pub mod storage;
pub mod token_bucket;
pub mod types;
pub mod window;

#[cfg(feature = "async")]
pub mod async_governor;

#[cfg(feature = "config-loader")]
pub mod config_loader;

// Re-export the most commonly used items at the crate root so consumers can
// write `use agent_governor_core::Governor;` instead of the fully qualified
// path.
pub use audit::{AuditEvent, AuditSink, MemoryAuditLog};
pub use budget::{AlertSink, BudgetAlert, BudgetLedger};
pub use circuit::{BreakerSettings, CircuitState};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::GovernorConfig;
pub use error::{DenyReason, GovernorError, RateLimitKind, Result};
pub use governor::Governor;
pub use policy::{PolicyEngine, PolicyRule};
pub use storage::{InMemorySnapshotStore, LedgerSnapshot, SnapshotStore};
pub use types::{
    Action, ActionId, Decision, Effect, Operation, Outcome, PermissionTier, Principal, RiskLevel,
};
pub use window::RateLimits;

#[cfg(feature = "async")]
pub use async_governor::AsyncGovernor;
