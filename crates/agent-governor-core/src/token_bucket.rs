// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Continuous-refill token bucket.
//!
//! [`TokenBucket`] is the bare algorithm over an explicit timestamp.
//! [`TokenBucketLimiter`] keys one bucket per principal and reads time from
//! the injected [`Clock`].
//!
//! Invariant: `0 <= tokens <= capacity` after every operation.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::clock::SharedClock;
use crate::error::{GovernorError, Result};

/// Snapshot-able bucket state.
///
/// # Examples
///
/// ```rust
/// use agent_governor_core::token_bucket::TokenBucket;
///
/// let mut bucket = TokenBucket::new(1.0, 10.0, 0);
/// for _ in 0..10 {
///     assert!(bucket.consume(0, 1.0).unwrap());
/// }
/// assert!(!bucket.consume(0, 1.0).unwrap());
///
/// // Five seconds later five tokens are back.
/// assert!(bucket.consume(5_000, 1.0).unwrap());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBucket {
    /// Tokens added per second.
    rate: f64,
    /// Maximum tokens the bucket can hold.
    capacity: f64,
    tokens: f64,
    last_refill_ms: u64,
}

impl TokenBucket {
    /// Create a full bucket.  Negative or non-finite parameters are clamped
    /// to zero; validate them upstream (see `GovernorConfig::validate`).
    pub fn new(rate: f64, capacity: f64, now_ms: u64) -> Self {
        let rate = sanitize(rate);
        let capacity = sanitize(capacity);
        Self {
            rate,
            capacity,
            tokens: capacity,
            last_refill_ms: now_ms,
        }
    }

    /// Add `elapsed * rate` tokens, capped at `capacity`.
    ///
    /// A `now_ms` earlier than the last refill counts as zero elapsed time
    /// and leaves `last_refill_ms` untouched.
    pub fn refill(&mut self, now_ms: u64) {
        if now_ms <= self.last_refill_ms {
            return;
        }
        let elapsed_secs = (now_ms - self.last_refill_ms) as f64 / 1000.0;
        self.tokens = (self.tokens + elapsed_secs * self.rate).min(self.capacity);
        self.last_refill_ms = now_ms;
    }

    /// Refill, then take `tokens` if available.
    ///
    /// Returns `Ok(false)` without touching the balance (beyond the refill)
    /// when there are not enough tokens.
    ///
    /// # Errors
    ///
    /// [`GovernorError::InvalidArgument`] when `tokens` is zero, negative or
    /// not finite.
    pub fn consume(&mut self, now_ms: u64, tokens: f64) -> Result<bool> {
        validate_request(tokens)?;
        self.refill(now_ms);
        if self.tokens >= tokens {
            self.tokens = (self.tokens - tokens).max(0.0);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Refill and report whether `tokens` could be taken, without taking them.
    pub fn can_consume(&mut self, now_ms: u64, tokens: f64) -> Result<bool> {
        validate_request(tokens)?;
        self.refill(now_ms);
        Ok(self.tokens >= tokens)
    }

    /// Milliseconds until `tokens` will be available, or `None` when the
    /// bucket can never hold that many (zero rate, or request above capacity).
    pub fn retry_after_ms(&self, tokens: f64) -> Option<u64> {
        if tokens > self.capacity || self.rate <= 0.0 {
            return if self.tokens >= tokens { Some(0) } else { None };
        }
        let deficit = tokens - self.tokens;
        if deficit <= 0.0 {
            return Some(0);
        }
        Some((deficit / self.rate * 1000.0).ceil() as u64)
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }
}

fn sanitize(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

fn validate_request(tokens: f64) -> Result<()> {
    if !tokens.is_finite() || tokens <= 0.0 {
        return Err(GovernorError::invalid(format!(
            "token request must be a positive finite number (got {tokens})"
        )));
    }
    Ok(())
}

/// One [`TokenBucket`] per principal.
///
/// Buckets are created full on first use.  Each bucket has its own lock, so
/// contention is per principal rather than global.
pub struct TokenBucketLimiter {
    rate: f64,
    capacity: f64,
    clock: SharedClock,
    buckets: DashMap<String, Arc<Mutex<TokenBucket>>>,
}

impl TokenBucketLimiter {
    pub fn new(rate: f64, capacity: f64, clock: SharedClock) -> Self {
        Self {
            rate,
            capacity,
            clock,
            buckets: DashMap::new(),
        }
    }

    fn bucket(&self, principal: &str) -> Arc<Mutex<TokenBucket>> {
        self.buckets
            .entry(principal.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(TokenBucket::new(
                    self.rate,
                    self.capacity,
                    self.clock.now_ms(),
                )))
            })
            .clone()
    }

    /// Take `tokens` from the principal's bucket.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::sync::Arc;
    /// use agent_governor_core::clock::ManualClock;
    /// use agent_governor_core::token_bucket::TokenBucketLimiter;
    ///
    /// let limiter = TokenBucketLimiter::new(0.0, 0.0, Arc::new(ManualClock::new(0)));
    /// assert!(!limiter.consume("agent-001", 1.0).unwrap());
    /// assert!(limiter.consume("agent-001", 0.0).is_err());
    /// ```
    pub fn consume(&self, principal: &str, tokens: f64) -> Result<bool> {
        let bucket = self.bucket(principal);
        let now = self.clock.now_ms();
        let consumed = bucket.lock().consume(now, tokens)?;
        if !consumed {
            tracing::debug!(principal, tokens, "token bucket empty");
        }
        Ok(consumed)
    }

    /// Non-consuming admission check.
    pub fn can_consume(&self, principal: &str, tokens: f64) -> Result<bool> {
        let bucket = self.bucket(principal);
        let now = self.clock.now_ms();
        let admissible = bucket.lock().can_consume(now, tokens);
        admissible
    }

    /// Current (refilled) balance for the principal.
    pub fn available(&self, principal: &str) -> f64 {
        let bucket = self.bucket(principal);
        let now = self.clock.now_ms();
        let mut guard = bucket.lock();
        guard.refill(now);
        guard.tokens()
    }

    pub fn retry_after_ms(&self, principal: &str, tokens: f64) -> Option<u64> {
        let bucket = self.bucket(principal);
        let now = self.clock.now_ms();
        let mut guard = bucket.lock();
        guard.refill(now);
        guard.retry_after_ms(tokens)
    }
}
