// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Shared data types used across all governor components.
//!
//! All public value types implement [`Clone`], [`Debug`], [`serde::Serialize`],
//! and [`serde::Deserialize`] so they can be written to audit sinks and
//! snapshot stores without additional conversion steps.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DenyReason, GovernorError, Result};

// ---------------------------------------------------------------------------
// Principal
// ---------------------------------------------------------------------------

/// Three-level permission tier for a principal.
///
/// Higher tiers grant broader autonomy.  Tiers are assigned explicitly through
/// [`Governor::register_principal`](crate::governor::Governor::register_principal)
/// or fall back to `GovernorConfig::default_tier` on first sight.
///
/// # Examples
///
/// ```rust
/// use agent_governor_core::types::PermissionTier;
///
/// assert!(PermissionTier::Autonomous > PermissionTier::Supervised);
/// assert_eq!("read-only".parse::<PermissionTier>().unwrap(), PermissionTier::ReadOnly);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionTier {
    /// Only `Read` operations may be allowed.
    ReadOnly,
    /// Mutating operations that the policy allows still need human approval.
    Supervised,
    /// The policy classification is applied as-is.
    Autonomous,
}

impl PermissionTier {
    pub fn display_name(self) -> &'static str {
        match self {
            PermissionTier::ReadOnly   => "read-only",
            PermissionTier::Supervised => "supervised",
            PermissionTier::Autonomous => "autonomous",
        }
    }
}

impl fmt::Display for PermissionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for PermissionTier {
    type Err = GovernorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "read-only" | "readonly" => Ok(PermissionTier::ReadOnly),
            "supervised"             => Ok(PermissionTier::Supervised),
            "autonomous" | "full"    => Ok(PermissionTier::Autonomous),
            other => Err(GovernorError::invalid(format!(
                "unknown permission tier '{other}' (expected read-only, supervised or autonomous)"
            ))),
        }
    }
}

/// An identity against which limits and budgets are tracked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Stable identifier for the user or agent.
    pub id: String,
    /// Current permission tier.
    pub tier: PermissionTier,
    /// Monotonic milliseconds at which the governor first saw this principal.
    pub first_seen_ms: u64,
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// Kind of operation an agent requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Shell command execution; the target is the command line.
    Bash,
    /// Read a file; the target is a path.
    Read,
    /// Create or modify a file; the target is a path.
    Write,
    /// Remove a file; the target is a path.
    Delete,
    /// Outbound network access; the target is a URL or host.
    Network,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Bash    => "bash",
            Operation::Read    => "read",
            Operation::Write   => "write",
            Operation::Delete  => "delete",
            Operation::Network => "network",
        }
    }

    /// Whether the operation can change state outside the agent.
    pub fn is_mutating(self) -> bool {
        !matches!(self, Operation::Read)
    }

    /// Whether the target is a shell command line rather than a path.
    pub fn targets_command(self) -> bool {
        matches!(self, Operation::Bash)
    }

    /// Baseline risk when no rule says otherwise.
    pub fn default_risk(self) -> RiskLevel {
        match self {
            Operation::Read    => RiskLevel::Low,
            Operation::Write   => RiskLevel::Medium,
            Operation::Network => RiskLevel::Medium,
            Operation::Bash    => RiskLevel::High,
            Operation::Delete  => RiskLevel::High,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = GovernorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bash" | "shell"          => Ok(Operation::Bash),
            "read" | "grep" | "glob"  => Ok(Operation::Read),
            "write" | "edit"          => Ok(Operation::Write),
            "delete"                  => Ok(Operation::Delete),
            "network" | "fetch"       => Ok(Operation::Network),
            other => Err(GovernorError::invalid(format!("unknown operation '{other}'"))),
        }
    }
}

/// Unique identifier assigned to every [`Action`] at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionId(pub Uuid);

impl ActionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Session used when an action does not name one.
pub const DEFAULT_SESSION: &str = "default";

/// A requested operation subject to authorization.
///
/// Fields are private: an `Action` is validated once at construction and is
/// immutable afterwards.  The `with_*` builders consume and return `self`.
///
/// # Examples
///
/// ```rust
/// use agent_governor_core::types::{Action, Operation};
///
/// let action = Action::new("bash", "git status", 0.02)
///     .unwrap()
///     .in_session("s-1")
///     .against_dependency("model-api");
///
/// assert_eq!(action.operation(), Operation::Bash);
/// assert_eq!(action.session(), "s-1");
/// assert!(Action::new("bash", "   ", 0.0).is_err());
/// assert!(Action::new("teleport", "x", 0.0).is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    id: ActionId,
    operation: Operation,
    target: String,
    estimated_cost: f64,
    timestamp_ms: Option<u64>,
    session: String,
    dependency: Option<String>,
}

impl Action {
    /// Parse `kind` and validate the action.
    ///
    /// # Errors
    ///
    /// [`GovernorError::InvalidArgument`] for an unknown operation, an empty
    /// target, or a negative / non-finite cost.
    pub fn new(kind: &str, target: &str, estimated_cost: f64) -> Result<Self> {
        Self::with_operation(kind.parse()?, target, estimated_cost)
    }

    /// Like [`Action::new`] for an already-typed [`Operation`].
    pub fn with_operation(operation: Operation, target: &str, estimated_cost: f64) -> Result<Self> {
        let target = target.trim();
        if target.is_empty() {
            return Err(GovernorError::invalid(format!("empty target for {operation} action")));
        }
        if !estimated_cost.is_finite() || estimated_cost < 0.0 {
            return Err(GovernorError::invalid(format!(
                "estimated cost must be a finite, non-negative number (got {estimated_cost})"
            )));
        }
        Ok(Self {
            id: ActionId::new(),
            operation,
            target: target.into(),
            estimated_cost,
            timestamp_ms: None,
            session: DEFAULT_SESSION.into(),
            dependency: None,
        })
    }

    /// Attach the caller's timestamp.  It is copied into audit events as
    /// `action_timestamp_ms`; limits always run on the governor's clock.
    pub fn at(mut self, timestamp_ms: u64) -> Self {
        self.timestamp_ms = Some(timestamp_ms);
        self
    }

    /// Charge the action to a named budget session.
    pub fn in_session(mut self, session: &str) -> Self {
        self.session = session.into();
        self
    }

    /// Mark the action as invoking a protected dependency guarded by a breaker.
    pub fn against_dependency(mut self, dependency: &str) -> Self {
        self.dependency = Some(dependency.into());
        self
    }

    pub fn id(&self) -> ActionId {
        self.id
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn estimated_cost(&self) -> f64 {
        self.estimated_cost
    }

    pub fn timestamp_ms(&self) -> Option<u64> {
        self.timestamp_ms
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn dependency(&self) -> Option<&str> {
        self.dependency.as_deref()
    }

    /// Short `"<operation> <target>"` label for logs and audit records.
    pub fn summary(&self) -> String {
        format!("{} {}", self.operation, self.target)
    }
}

// ---------------------------------------------------------------------------
// Policy vocabulary
// ---------------------------------------------------------------------------

/// Effect attached to a policy rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    Allow,
    RequireApproval,
    Deny,
}

impl Effect {
    /// The more restrictive of two effects (`Deny` > `RequireApproval` > `Allow`).
    pub fn most_restrictive(self, other: Effect) -> Effect {
        self.max(other)
    }
}

/// Risk summary shown to a human approver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RiskLevel::Low      => "low",
            RiskLevel::Medium   => "medium",
            RiskLevel::High     => "high",
            RiskLevel::Critical => "critical",
        })
    }
}

/// What a classification was based on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleMatch {
    /// A configured rule matched.
    Rule { id: String },
    /// Nothing matched; the terminal default-deny applied.
    NoMatch,
    /// The command could not be analysed safely (e.g. command substitution).
    Unanalysable { detail: String },
    /// The principal's tier forbids the operation.
    Tier { tier: PermissionTier, operation: Operation },
}

impl fmt::Display for RuleMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleMatch::Rule { id } => write!(f, "rule '{id}'"),
            RuleMatch::NoMatch => f.write_str("no rule matched (default deny)"),
            RuleMatch::Unanalysable { detail } => write!(f, "command cannot be analysed: {detail}"),
            RuleMatch::Tier { tier, operation } => {
                write!(f, "{tier} principals may not perform {operation} actions")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Decision / outcome
// ---------------------------------------------------------------------------

/// The governor's verdict on an [`Action`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Deny { reason: DenyReason },
    RequiresApproval { reason: String, risk: RiskLevel },
}

impl Decision {
    pub fn deny(reason: DenyReason) -> Self {
        Decision::Deny { reason }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, Decision::Deny { .. })
    }

    pub fn requires_approval(&self) -> bool {
        matches!(self, Decision::RequiresApproval { .. })
    }

    pub fn deny_reason(&self) -> Option<&DenyReason> {
        match self {
            Decision::Deny { reason } => Some(reason),
            _ => None,
        }
    }

    /// Stable label for audit records and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Decision::Allow                    => "allow",
            Decision::Deny { .. }              => "deny",
            Decision::RequiresApproval { .. }  => "requires_approval",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Allow => f.write_str("Allowed"),
            Decision::Deny { reason } => write!(f, "Denied: {reason}"),
            Decision::RequiresApproval { reason, risk } => {
                write!(f, "Requires approval ({risk} risk): {reason}")
            }
        }
    }
}

/// What happened to an allowed action, reported back through `record`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Succeeded { actual_cost: f64 },
    Failed { actual_cost: f64 },
    /// Abandoned before completion; the reservation is released at zero cost.
    Cancelled,
}

impl Outcome {
    pub fn actual_cost(self) -> f64 {
        match self {
            Outcome::Succeeded { actual_cost } | Outcome::Failed { actual_cost } => actual_cost,
            Outcome::Cancelled => 0.0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Outcome::Succeeded { .. } => "succeeded",
            Outcome::Failed { .. }    => "failed",
            Outcome::Cancelled        => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_rejects_negative_and_nan_cost() {
        assert!(Action::new("read", "/tmp/x", -1.0).is_err());
        assert!(Action::new("read", "/tmp/x", f64::NAN).is_err());
        assert!(Action::new("read", "/tmp/x", f64::INFINITY).is_err());
        assert!(Action::new("read", "/tmp/x", 0.0).is_ok());
    }

    #[test]
    fn test_action_ids_are_unique() {
        let a = Action::new("read", "a", 0.0).unwrap();
        let b = Action::new("read", "a", 0.0).unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_operation_aliases() {
        assert_eq!("Edit".parse::<Operation>().unwrap(), Operation::Write);
        assert_eq!("GREP".parse::<Operation>().unwrap(), Operation::Read);
        assert!(matches!(
            "launch".parse::<Operation>(),
            Err(GovernorError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_effect_ordering_is_restrictiveness() {
        assert_eq!(Effect::Allow.most_restrictive(Effect::Deny), Effect::Deny);
        assert_eq!(
            Effect::RequireApproval.most_restrictive(Effect::Allow),
            Effect::RequireApproval
        );
    }

    #[test]
    fn test_decision_display_is_human_readable() {
        let decision = Decision::RequiresApproval {
            reason: "write to src/main.rs".into(),
            risk: RiskLevel::Medium,
        };
        assert_eq!(
            decision.to_string(),
            "Requires approval (medium risk): write to src/main.rs"
        );
    }
}
