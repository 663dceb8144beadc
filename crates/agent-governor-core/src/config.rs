// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Governor configuration.
//!
//! [`GovernorConfig`] is the single entry point for tuning the governor at
//! construction time.  Every field has a default, so `GovernorConfig::default()`
//! is always valid; [`validate`](GovernorConfig::validate) is run by
//! `Governor::new` and rejects nonsensical values up front.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::budget::DEFAULT_ALERT_THRESHOLDS;
use crate::circuit::{duration_secs, BreakerSettings};
use crate::error::{GovernorError, Result};
use crate::guard::GuardSettings;
use crate::policy::{PolicyEngine, PolicyRule};
use crate::types::PermissionTier;
use crate::window::RateLimits;

/// Wall-clock limit for one governed execution.
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(1800);

/// Top-level configuration for [`Governor`](crate::governor::Governor).
///
/// # Examples
///
/// ```rust
/// use agent_governor_core::config::GovernorConfig;
/// use agent_governor_core::types::PermissionTier;
///
/// let config = GovernorConfig {
///     budget_cap: 25.0,
///     default_tier: PermissionTier::Autonomous,
///     ..GovernorConfig::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// Token bucket refill rate, tokens per second.
    pub token_rate: f64,
    /// Token bucket burst size.
    pub token_capacity: f64,
    pub rate_limits: RateLimits,
    /// Cap applied to every new `(principal, session)` budget.
    pub budget_cap: f64,
    /// Fractions of the cap that trigger a one-shot alert.
    pub alert_thresholds: Vec<f64>,
    pub breaker: BreakerSettings,
    /// Tier given to principals seen for the first time.
    pub default_tier: PermissionTier,
    /// Allowed-but-unrecorded actions a principal may hold at once.
    pub max_in_flight_per_principal: usize,
    /// Longest a call run through `AsyncGovernor::run` may take before it is
    /// abandoned and recorded as failed.  Seconds in TOML and JSON.
    #[serde(with = "duration_secs")]
    pub action_timeout: Duration,
    pub guard: GuardSettings,
    /// Mask secrets in targets before they reach the audit sink.
    pub redact_audit_targets: bool,
    /// Ordered policy rules.  Defaults to [`PolicyEngine::recommended`].
    pub policy: Vec<PolicyRule>,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            token_rate: 1.0,
            token_capacity: 10.0,
            rate_limits: RateLimits {
                max_requests_per_minute: Some(10),
                ..RateLimits::default()
            },
            budget_cap: 5.0,
            alert_thresholds: DEFAULT_ALERT_THRESHOLDS.to_vec(),
            breaker: BreakerSettings::default(),
            default_tier: PermissionTier::Supervised,
            max_in_flight_per_principal: 1,
            action_timeout: DEFAULT_ACTION_TIMEOUT,
            guard: GuardSettings::default(),
            redact_audit_targets: true,
            policy: PolicyEngine::recommended().rules().to_vec(),
        }
    }
}

impl GovernorConfig {
    /// Reject negative or non-finite numbers, thresholds outside `(0, 1]`,
    /// zero limits and a zero action timeout.
    pub fn validate(&self) -> Result<()> {
        non_negative("token_rate", self.token_rate)?;
        non_negative("token_capacity", self.token_capacity)?;
        non_negative("budget_cap", self.budget_cap)?;
        if let Some(max) = self.rate_limits.max_cost_per_hour {
            non_negative("rate_limits.max_cost_per_hour", max)?;
        }
        if let Some(max) = self.rate_limits.max_cost_per_day {
            non_negative("rate_limits.max_cost_per_day", max)?;
        }
        for threshold in &self.alert_thresholds {
            if !threshold.is_finite() || *threshold <= 0.0 || *threshold > 1.0 {
                return Err(GovernorError::Config(format!(
                    "alert threshold {threshold} must be in (0, 1]"
                )));
            }
        }
        if self.breaker.failure_threshold == 0 {
            return Err(GovernorError::Config(
                "breaker.failure_threshold must be at least 1".into(),
            ));
        }
        if self.max_in_flight_per_principal == 0 {
            return Err(GovernorError::Config(
                "max_in_flight_per_principal must be at least 1".into(),
            ));
        }
        if self.action_timeout.is_zero() {
            return Err(GovernorError::Config("action_timeout must be greater than zero".into()));
        }
        if self.guard.max_prompt_chars == 0 {
            return Err(GovernorError::Config("guard.max_prompt_chars must be at least 1".into()));
        }
        if let Some(rule) = self.policy.iter().find(|r| r.id.trim().is_empty()) {
            return Err(GovernorError::Config(format!("policy rule with empty id: {}", rule.target)));
        }
        Ok(())
    }
}

fn non_negative(field: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(GovernorError::Config(format!(
            "{field} must be a finite, non-negative number (got {value})"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Effect;

    #[test]
    fn test_default_is_valid() {
        assert!(GovernorConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_numbers() {
        let nan_rate = GovernorConfig { token_rate: f64::NAN, ..GovernorConfig::default() };
        assert!(nan_rate.validate().is_err());

        let negative_cap = GovernorConfig { budget_cap: -1.0, ..GovernorConfig::default() };
        assert!(negative_cap.validate().is_err());

        let no_slots = GovernorConfig { max_in_flight_per_principal: 0, ..GovernorConfig::default() };
        assert!(no_slots.validate().is_err());

        let no_time = GovernorConfig { action_timeout: Duration::ZERO, ..GovernorConfig::default() };
        assert!(no_time.validate().is_err());
    }

    #[test]
    fn test_rejects_thresholds_outside_unit_interval() {
        for bad in [0.0, -0.5, 1.5, f64::NAN] {
            let config = GovernorConfig { alert_thresholds: vec![0.5, bad], ..GovernorConfig::default() };
            assert!(
                matches!(config.validate(), Err(GovernorError::Config(_))),
                "threshold {bad} should be rejected"
            );
        }
        let full = GovernorConfig { alert_thresholds: vec![1.0], ..GovernorConfig::default() };
        assert!(full.validate().is_ok());
    }

    #[test]
    fn test_rejects_empty_rule_id() {
        let config = GovernorConfig {
            policy: vec![PolicyRule::command(" ", "ls", Effect::Allow)],
            ..GovernorConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: GovernorConfig =
            serde_json::from_str(r#"{ "budget_cap": 2.5, "default_tier": "autonomous" }"#).unwrap();
        assert_eq!(config.budget_cap, 2.5);
        assert_eq!(config.default_tier, PermissionTier::Autonomous);
        assert_eq!(config.max_in_flight_per_principal, 1);
        assert_eq!(config.rate_limits.max_requests_per_minute, Some(10));
        assert_eq!(config.action_timeout, Duration::from_secs(1800));
        assert!(!config.policy.is_empty());
    }

    #[test]
    fn test_action_timeout_is_seconds() {
        let config: GovernorConfig = serde_json::from_str(r#"{ "action_timeout": 90 }"#).unwrap();
        assert_eq!(config.action_timeout, Duration::from_secs(90));
        assert!(serde_json::from_str::<GovernorConfig>(r#"{ "action_timeout": -1 }"#).is_err());
    }
}
