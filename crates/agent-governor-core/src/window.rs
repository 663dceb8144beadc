// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Sliding-window request and cost counters.
//!
//! Each principal owns an arrival-ordered log of `(timestamp_ms, cost)`
//! entries.  Entries older than [`RETENTION`] are evicted lazily on every
//! [`record`](SlidingWindowCounter::record); there is no background sweep.
//! Counts are always derived by filtering the retained log.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::clock::SharedClock;
use crate::error::RateLimitKind;

/// How long entries are retained.  Also the longest window that can be queried.
pub const RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(60 * 60);

/// Request and cost ceilings checked by [`SlidingWindowCounter::check`].
///
/// `None` disables a limit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateLimits {
    #[serde(default)]
    pub max_requests_per_minute: Option<u32>,
    #[serde(default)]
    pub max_requests_per_hour: Option<u32>,
    #[serde(default)]
    pub max_requests_per_day: Option<u32>,
    #[serde(default)]
    pub max_cost_per_hour: Option<f64>,
    #[serde(default)]
    pub max_cost_per_day: Option<f64>,
}

/// Which limit tripped and when the window frees up again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitTrip {
    pub limit: RateLimitKind,
    /// Milliseconds until the oldest counted entry leaves the window.
    pub retry_after_ms: Option<u64>,
}

#[derive(Debug, Default)]
struct RateLog {
    entries: VecDeque<(u64, f64)>,
}

impl RateLog {
    fn prune(&mut self, now_ms: u64) {
        let retention_ms = RETENTION.as_millis() as u64;
        // retain rather than pop_front: out-of-order timestamps mean the
        // front is not guaranteed to be the oldest.
        self.entries
            .retain(|(ts, _)| now_ms.saturating_sub(*ts) < retention_ms);
    }

    /// Entries with `ts > now - window`.  Written as `now - ts < window` with
    /// saturation so early readings and future timestamps never underflow.
    fn in_window(&self, now_ms: u64, window: Duration) -> impl Iterator<Item = &(u64, f64)> {
        let window_ms = window.as_millis() as u64;
        self.entries
            .iter()
            .filter(move |(ts, _)| now_ms.saturating_sub(*ts) < window_ms)
    }

    fn count_since(&self, now_ms: u64, window: Duration) -> usize {
        self.in_window(now_ms, window).count()
    }

    fn cost_since(&self, now_ms: u64, window: Duration) -> f64 {
        self.in_window(now_ms, window).map(|(_, cost)| cost).sum()
    }

    /// When the oldest entry of `window` expires, relative to `now_ms`.
    fn reset_after(&self, now_ms: u64, window: Duration) -> Option<u64> {
        let window_ms = window.as_millis() as u64;
        self.in_window(now_ms, window)
            .map(|(ts, _)| *ts)
            .min()
            .map(|oldest| (oldest + window_ms).saturating_sub(now_ms))
    }
}

/// Per-principal minute/hour/day counters.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use std::time::Duration;
/// use agent_governor_core::clock::ManualClock;
/// use agent_governor_core::window::SlidingWindowCounter;
///
/// let clock = Arc::new(ManualClock::new(0));
/// let counter = SlidingWindowCounter::new(clock.clone());
///
/// counter.record("agent-001", 0.25);
/// clock.advance(Duration::from_secs(90));
/// counter.record("agent-001", 0.50);
///
/// assert_eq!(counter.count_since("agent-001", Duration::from_secs(60)), 1);
/// assert_eq!(counter.count_since("agent-001", Duration::from_secs(3600)), 2);
/// assert!((counter.cost_since("agent-001", Duration::from_secs(3600)) - 0.75).abs() < 1e-9);
/// ```
pub struct SlidingWindowCounter {
    clock: SharedClock,
    logs: DashMap<String, Arc<Mutex<RateLog>>>,
}

impl SlidingWindowCounter {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            logs: DashMap::new(),
        }
    }

    fn log(&self, principal: &str) -> Arc<Mutex<RateLog>> {
        self.logs
            .entry(principal.to_string())
            .or_default()
            .clone()
    }

    /// Append an entry stamped with the current clock reading.
    pub fn record(&self, principal: &str, cost: f64) {
        let now = self.clock.now_ms();
        self.record_at(principal, cost, now);
    }

    /// Append an entry with an explicit timestamp.  Timestamps earlier than
    /// existing entries are accepted as-is.
    pub fn record_at(&self, principal: &str, cost: f64, timestamp_ms: u64) {
        let log = self.log(principal);
        let mut log = log.lock();
        // Prune against the later of the two readings so a stale timestamp
        // cannot resurrect expired entries.
        log.prune(self.clock.now_ms().max(timestamp_ms));
        log.entries.push_back((timestamp_ms, cost.max(0.0)));
    }

    /// Number of entries with `timestamp > now - window`.
    pub fn count_since(&self, principal: &str, window: Duration) -> usize {
        let now = self.clock.now_ms();
        self.logs
            .get(principal)
            .map(|log| {
                let guard = log.lock();
                guard.count_since(now, window)
            })
            .unwrap_or(0)
    }

    /// Sum of costs with `timestamp > now - window`.
    pub fn cost_since(&self, principal: &str, window: Duration) -> f64 {
        let now = self.clock.now_ms();
        self.logs
            .get(principal)
            .map(|log| {
                let guard = log.lock();
                guard.cost_since(now, window)
            })
            .unwrap_or(0.0)
    }

    /// Check whether one more request of `cost` would exceed any limit.
    ///
    /// Request limits are checked minute → hour → day, then cost limits
    /// hour → day; the first one exceeded is reported.
    pub fn check(&self, principal: &str, limits: &RateLimits, cost: f64) -> Option<RateLimitTrip> {
        let now = self.clock.now_ms();
        let empty = RateLog::default();
        let handle = self.logs.get(principal).map(|entry| entry.value().clone());
        let guard = handle.as_ref().map(|log| log.lock());
        let log: &RateLog = guard.as_deref().unwrap_or(&empty);

        let request_limits = [
            (limits.max_requests_per_minute, MINUTE, RateLimitKind::RequestsPerMinute),
            (limits.max_requests_per_hour, HOUR, RateLimitKind::RequestsPerHour),
            (limits.max_requests_per_day, RETENTION, RateLimitKind::RequestsPerDay),
        ];
        for (max, window, kind) in request_limits {
            if let Some(max) = max {
                if log.count_since(now, window) >= max as usize {
                    return Some(RateLimitTrip {
                        limit: kind,
                        retry_after_ms: log.reset_after(now, window),
                    });
                }
            }
        }

        let cost_limits = [
            (limits.max_cost_per_hour, HOUR, RateLimitKind::CostPerHour),
            (limits.max_cost_per_day, RETENTION, RateLimitKind::CostPerDay),
        ];
        for (max, window, kind) in cost_limits {
            if let Some(max) = max {
                if log.cost_since(now, window) + cost > max {
                    return Some(RateLimitTrip {
                        limit: kind,
                        retry_after_ms: log.reset_after(now, window),
                    });
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn counter() -> (Arc<ManualClock>, SlidingWindowCounter) {
        let clock = Arc::new(ManualClock::new(0));
        let counter = SlidingWindowCounter::new(clock.clone());
        (clock, counter)
    }

    #[test]
    fn test_count_matches_entries_strictly_inside_window() {
        let (clock, counter) = counter();
        clock.set(100_000);
        for ts in [10_000, 40_000, 40_001, 70_000, 99_999] {
            counter.record_at("p", 1.0, ts);
        }
        // now - 60s = 40_000; the entry exactly at the boundary is excluded.
        assert_eq!(counter.count_since("p", Duration::from_secs(60)), 3);
        assert_eq!(counter.count_since("p", Duration::from_secs(3600)), 5);
    }

    #[test]
    fn test_entries_older_than_a_day_are_never_counted() {
        let (clock, counter) = counter();
        counter.record("p", 2.0);
        clock.advance(RETENTION + Duration::from_millis(1));
        assert_eq!(counter.count_since("p", RETENTION), 0);
        assert_eq!(counter.cost_since("p", RETENTION), 0.0);

        // The next record evicts the stale entry physically.
        counter.record("p", 1.0);
        let log = counter.log("p");
        assert_eq!(log.lock().entries.len(), 1);
    }

    #[test]
    fn test_out_of_order_timestamps_are_tolerated() {
        let (clock, counter) = counter();
        clock.set(50_000);
        counter.record_at("p", 1.0, 49_000);
        counter.record_at("p", 1.0, 20_000);
        counter.record_at("p", 1.0, 60_000); // ahead of the clock
        assert_eq!(counter.count_since("p", Duration::from_secs(60)), 3);
        assert_eq!(counter.count_since("p", Duration::from_secs(10)), 2);
    }

    #[test]
    fn test_check_reports_first_tripped_limit() {
        let (clock, counter) = counter();
        let limits = RateLimits {
            max_requests_per_minute: Some(2),
            max_requests_per_hour: Some(1),
            ..RateLimits::default()
        };
        counter.record("p", 0.0);
        clock.advance(Duration::from_secs(10));
        counter.record("p", 0.0);

        let trip = counter.check("p", &limits, 0.0).expect("limit should trip");
        assert_eq!(trip.limit, RateLimitKind::RequestsPerMinute);
        assert_eq!(trip.retry_after_ms, Some(50_000));
    }

    #[test]
    fn test_cost_limit_includes_pending_request() {
        let (_clock, counter) = counter();
        let limits = RateLimits {
            max_cost_per_hour: Some(1.0),
            ..RateLimits::default()
        };
        counter.record("p", 0.6);
        assert!(counter.check("p", &limits, 0.3).is_none());
        let trip = counter.check("p", &limits, 0.5).expect("cost limit should trip");
        assert_eq!(trip.limit, RateLimitKind::CostPerHour);
    }

    #[test]
    fn test_unknown_principal_has_no_history() {
        let (_clock, counter) = counter();
        assert_eq!(counter.count_since("ghost", RETENTION), 0);
        let limits = RateLimits {
            max_requests_per_minute: Some(1),
            ..RateLimits::default()
        };
        assert!(counter.check("ghost", &limits, 0.0).is_none());

        let closed = RateLimits {
            max_requests_per_minute: Some(0),
            ..RateLimits::default()
        };
        let trip = counter.check("ghost", &closed, 0.0).expect("zero limit always trips");
        assert_eq!(trip.retry_after_ms, None);
    }
}
