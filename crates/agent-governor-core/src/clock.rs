// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Injectable monotonic time source.
//!
//! Every time-dependent component reads time through [`Clock`] so tests can
//! drive refills, window expiry and breaker timeouts deterministically with
//! [`ManualClock`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A monotonic millisecond clock.
///
/// The origin is arbitrary; only differences between readings are meaningful.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }
}

/// Real clock backed by [`Instant`], with its origin at construction.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        // Truncation is fine: u64 milliseconds outlast any process.
        self.origin.elapsed().as_millis() as u64
    }
}

/// Hand-driven clock for tests and simulations.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use agent_governor_core::clock::{Clock, ManualClock};
///
/// let clock = ManualClock::new(1_000);
/// clock.advance(Duration::from_secs(5));
/// assert_eq!(clock.now_ms(), 6_000);
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self { now_ms: AtomicU64::new(start_ms) }
    }

    pub fn advance(&self, by: Duration) {
        self.now_ms.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    /// Set an absolute reading.  Moving backwards is allowed so tests can
    /// exercise out-of-order handling; components must treat it as zero
    /// elapsed time.
    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Shared handle used by components that need a clock.
pub type SharedClock = Arc<dyn Clock>;
