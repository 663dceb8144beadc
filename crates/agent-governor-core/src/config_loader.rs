// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Configuration loader for [`Governor`](crate::governor::Governor).
//!
//! Supports two load strategies:
//!
//! 1. **TOML file**: [`load_config`] reads and deserialises a TOML file into
//!    a [`GovernorConfig`].  Missing keys keep their defaults.
//! 2. **Environment variables**: [`load_config_from_env`] starts from
//!    `GovernorConfig::default()` and overrides fields from `GOVERNOR_`-prefixed
//!    variables.
//!
//! Both loaders validate the result before returning it.
//!
//! # File format
//!
//! ```toml
//! token_rate   = 1.0
//! budget_cap   = 5.0
//! default_tier = "supervised"
//! max_in_flight_per_principal = 1
//! action_timeout = 1800   # seconds
//!
//! [rate_limits]
//! max_requests_per_minute = 10
//!
//! [breaker]
//! failure_threshold = 5
//! timeout = 60            # seconds
//!
//! [[policy]]
//! id     = "block-rm"
//! effect = "deny"
//! target = { type = "command", program = "rm" }
//! ```
//!
//! # Environment variables
//!
//! | Variable                        | Type            | Default      |
//! |---------------------------------|-----------------|--------------|
//! | `GOVERNOR_TOKEN_RATE`           | float ≥ 0       | 1.0          |
//! | `GOVERNOR_TOKEN_CAPACITY`       | float ≥ 0       | 10.0         |
//! | `GOVERNOR_MAX_PER_MINUTE`       | integer         | 10           |
//! | `GOVERNOR_MAX_PER_HOUR`         | integer         | unset        |
//! | `GOVERNOR_MAX_PER_DAY`          | integer         | unset        |
//! | `GOVERNOR_BUDGET_CAP`           | float ≥ 0       | 5.0          |
//! | `GOVERNOR_BREAKER_THRESHOLD`    | integer ≥ 1     | 5            |
//! | `GOVERNOR_BREAKER_TIMEOUT_SECS` | float ≥ 0       | 60           |
//! | `GOVERNOR_DEFAULT_TIER`         | string          | "supervised" |
//! | `GOVERNOR_MAX_IN_FLIGHT`        | integer ≥ 1     | 1            |
//! | `GOVERNOR_ACTION_TIMEOUT_SECS`  | float > 0       | 1800         |

#![cfg(feature = "config-loader")]

use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::config::GovernorConfig;

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Errors that can occur while loading or parsing governor configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required file could not be opened.
    #[error("Failed to read config file \"{path}\": {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// The TOML content could not be deserialised.
    #[error("Failed to parse TOML config: {source}")]
    TomlParse {
        #[from]
        source: toml::de::Error,
    },
    /// A variable could not be parsed to its expected type.
    #[error("Field \"{field}\": cannot parse \"{value}\" ({reason})")]
    ParseField { field: String, value: String, reason: String },
    /// The assembled configuration failed validation.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<crate::error::GovernorError> for ConfigError {
    fn from(err: crate::error::GovernorError) -> Self {
        match err {
            crate::error::GovernorError::Config(msg) => ConfigError::Invalid(msg),
            other => ConfigError::Invalid(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// TOML loader
// ---------------------------------------------------------------------------

/// Load a [`GovernorConfig`] from a TOML file.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file cannot be read, the TOML does not
/// match the schema, or the values fail validation.
///
/// # Example
///
/// ```rust,no_run
/// use agent_governor_core::config_loader::load_config;
///
/// let config = load_config("/etc/agent-governor/governor.toml").unwrap();
/// println!("Budget cap: {}", config.budget_cap);
/// ```
pub fn load_config(path: impl AsRef<Path>) -> Result<GovernorConfig, ConfigError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
        path: path.display().to_string(),
        source,
    })?;
    parse_config(&content)
}

/// Parse and validate TOML configuration text.
pub fn parse_config(content: &str) -> Result<GovernorConfig, ConfigError> {
    let config: GovernorConfig = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Environment variable loader
// ---------------------------------------------------------------------------

/// Load a [`GovernorConfig`] from `GOVERNOR_`-prefixed environment variables.
///
/// Unset variables keep their defaults; the policy is always the default
/// recommended rule set.
///
/// # Errors
///
/// [`ConfigError::ParseField`] for a value that does not parse,
/// [`ConfigError::Invalid`] when the result fails validation.
pub fn load_config_from_env() -> Result<GovernorConfig, ConfigError> {
    load_config_from_lookup(|key| std::env::var(key).ok())
}

/// [`load_config_from_env`] over an arbitrary variable source.
fn load_config_from_lookup<F>(lookup: F) -> Result<GovernorConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = GovernorConfig::default();

    if let Some(v) = read_var(&lookup, "GOVERNOR_TOKEN_RATE")? {
        config.token_rate = v;
    }
    if let Some(v) = read_var(&lookup, "GOVERNOR_TOKEN_CAPACITY")? {
        config.token_capacity = v;
    }
    if let Some(v) = read_var(&lookup, "GOVERNOR_MAX_PER_MINUTE")? {
        config.rate_limits.max_requests_per_minute = Some(v);
    }
    if let Some(v) = read_var(&lookup, "GOVERNOR_MAX_PER_HOUR")? {
        config.rate_limits.max_requests_per_hour = Some(v);
    }
    if let Some(v) = read_var(&lookup, "GOVERNOR_MAX_PER_DAY")? {
        config.rate_limits.max_requests_per_day = Some(v);
    }
    if let Some(v) = read_var(&lookup, "GOVERNOR_BUDGET_CAP")? {
        config.budget_cap = v;
    }
    if let Some(v) = read_var(&lookup, "GOVERNOR_BREAKER_THRESHOLD")? {
        config.breaker.failure_threshold = v;
    }
    if let Some(timeout) = read_secs(&lookup, "GOVERNOR_BREAKER_TIMEOUT_SECS")? {
        config.breaker.timeout = timeout;
    }
    if let Some(v) = read_var(&lookup, "GOVERNOR_DEFAULT_TIER")? {
        config.default_tier = v;
    }
    if let Some(v) = read_var(&lookup, "GOVERNOR_MAX_IN_FLIGHT")? {
        config.max_in_flight_per_principal = v;
    }
    if let Some(timeout) = read_secs(&lookup, "GOVERNOR_ACTION_TIMEOUT_SECS")? {
        config.action_timeout = timeout;
    }

    config.validate()?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn read_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(val) => val
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|source| ConfigError::ParseField {
                field: key.to_owned(),
                value: val.clone(),
                reason: source.to_string(),
            }),
        None => Ok(None),
    }
}

fn read_secs<F>(lookup: &F, key: &str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match read_var::<f64, _>(lookup, key)? {
        Some(secs) if !secs.is_finite() || secs < 0.0 => Err(ConfigError::ParseField {
            field: key.to_owned(),
            value: secs.to_string(),
            reason: "must be a non-negative number of seconds".into(),
        }),
        Some(secs) => Ok(Some(Duration::from_secs_f64(secs))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Effect, PermissionTier};
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_env_overrides_defaults() {
        let config = load_config_from_lookup(env(&[
            ("GOVERNOR_BUDGET_CAP", "12.5"),
            ("GOVERNOR_MAX_PER_HOUR", "100"),
            ("GOVERNOR_DEFAULT_TIER", "read_only"),
            ("GOVERNOR_BREAKER_TIMEOUT_SECS", "1.5"),
        ]))
        .unwrap();
        assert_eq!(config.budget_cap, 12.5);
        assert_eq!(config.rate_limits.max_requests_per_hour, Some(100));
        assert_eq!(config.rate_limits.max_requests_per_minute, Some(10));
        assert_eq!(config.default_tier, PermissionTier::ReadOnly);
        assert_eq!(config.breaker.timeout, Duration::from_millis(1500));
        assert_eq!(config.action_timeout, Duration::from_secs(1800));
    }

    #[test]
    fn test_env_action_timeout() {
        let config = load_config_from_lookup(env(&[("GOVERNOR_ACTION_TIMEOUT_SECS", "120")])).unwrap();
        assert_eq!(config.action_timeout, Duration::from_secs(120));

        let err = load_config_from_lookup(env(&[("GOVERNOR_ACTION_TIMEOUT_SECS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        let err = load_config_from_lookup(env(&[("GOVERNOR_ACTION_TIMEOUT_SECS", "-5")])).unwrap_err();
        assert!(matches!(err, ConfigError::ParseField { .. }));
    }

    #[test]
    fn test_env_parse_errors_name_the_variable() {
        let err = load_config_from_lookup(env(&[("GOVERNOR_MAX_IN_FLIGHT", "many")])).unwrap_err();
        match err {
            ConfigError::ParseField { field, value, .. } => {
                assert_eq!(field, "GOVERNOR_MAX_IN_FLIGHT");
                assert_eq!(value, "many");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_env_values_are_validated() {
        let err = load_config_from_lookup(env(&[("GOVERNOR_BUDGET_CAP", "-3")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        let err = load_config_from_lookup(env(&[("GOVERNOR_MAX_IN_FLIGHT", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_parse_toml_with_policy() {
        let config = parse_config(
            r#"
            budget_cap = 2.0
            default_tier = "autonomous"

            [rate_limits]
            max_requests_per_minute = 3
            max_cost_per_day = 20.0

            [breaker]
            timeout = 5

            [[policy]]
            id = "block-rm"
            effect = "deny"
            target = { type = "command", program = "rm" }

            [[policy]]
            id = "git-read"
            effect = "allow"
            target = { type = "command", program = "git", subcommands = ["status"] }
            "#,
        )
        .unwrap();
        assert_eq!(config.budget_cap, 2.0);
        assert_eq!(config.rate_limits.max_requests_per_minute, Some(3));
        assert_eq!(config.rate_limits.max_cost_per_day, Some(20.0));
        assert_eq!(config.breaker.timeout, Duration::from_secs(5));
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.policy.len(), 2);
        assert_eq!(config.policy[1].effect, Effect::Allow);
    }

    #[test]
    fn test_invalid_toml_is_reported() {
        assert!(matches!(parse_config("budget_cap = ["), Err(ConfigError::TomlParse { .. })));
        assert!(matches!(
            parse_config("alert_thresholds = [2.0]"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            load_config("/definitely/not/here.toml"),
            Err(ConfigError::FileRead { .. })
        ));
    }
}
