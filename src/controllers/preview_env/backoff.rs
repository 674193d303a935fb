/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/controllers/preview_env/backoff.rs
*
* Retry delays for failed reconciliations. Each PreviewEnv has its own failure
* counter, keyed by object uid so a recreated object starts from the base
* delay. The delay doubles with every consecutive failure up to a cap and the
* counter is cleared by the next successful reconciliation.
*
* The controller never reconciles an object after it is deleted, so counters
* for objects that disappear while failing are never reset. Any counter whose
* last failure is older than twice the cap is dropped instead; a still-failing
* object is retried well within that window.
*
* SPDX-License-Identifier: Apache-2.0
*/

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub max: Duration,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before retry number `attempt` (1-based): `min(base * 2^(attempt-1), max)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .map_or(self.max, |d| d.min(self.max))
    }
}

#[derive(Debug, Clone, Copy)]
struct FailureRecord {
    count: u32,
    last_failure: Instant,
}

/// Consecutive failure counts keyed by object uid.
#[derive(Debug)]
pub struct BackoffTracker {
    policy: ExponentialBackoff,
    failures: Mutex<HashMap<String, FailureRecord>>,
}

impl BackoffTracker {
    pub fn new(policy: ExponentialBackoff) -> Self {
        Self {
            policy,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Records a failure and returns how long to wait before retrying.
    pub fn next_delay(&self, key: &str) -> Duration {
        self.next_delay_at(key, Instant::now())
    }

    fn next_delay_at(&self, key: &str, now: Instant) -> Duration {
        let retention = self.policy.max.saturating_mul(2);
        let mut failures = self.failures.lock().unwrap_or_else(|p| p.into_inner());
        failures.retain(|_, r| now.saturating_duration_since(r.last_failure) <= retention);

        let record = failures.entry(key.to_string()).or_insert(FailureRecord {
            count: 0,
            last_failure: now,
        });
        record.count = record.count.saturating_add(1);
        record.last_failure = now;
        self.policy.delay(record.count)
    }

    pub fn reset(&self, key: &str) {
        let mut failures = self.failures.lock().unwrap_or_else(|p| p.into_inner());
        failures.remove(key);
    }

    pub fn failures(&self, key: &str) -> u32 {
        let failures = self.failures.lock().unwrap_or_else(|p| p.into_inner());
        failures.get(key).map_or(0, |r| r.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ExponentialBackoff {
        ExponentialBackoff::new(Duration::from_secs(5), Duration::from_secs(300))
    }

    #[test]
    fn test_delay_doubles_until_cap() {
        let p = policy();
        assert_eq!(p.delay(1), Duration::from_secs(5));
        assert_eq!(p.delay(2), Duration::from_secs(10));
        assert_eq!(p.delay(3), Duration::from_secs(20));
        assert_eq!(p.delay(7), Duration::from_secs(300));
        assert_eq!(p.delay(u32::MAX), Duration::from_secs(300));
    }

    #[test]
    fn test_tracker_counts_per_object_and_resets() {
        let tracker = BackoffTracker::new(policy());
        assert_eq!(tracker.next_delay("uid-1"), Duration::from_secs(5));
        assert_eq!(tracker.next_delay("uid-1"), Duration::from_secs(10));
        assert_eq!(tracker.next_delay("uid-2"), Duration::from_secs(5));
        assert_eq!(tracker.failures("uid-1"), 2);

        tracker.reset("uid-1");
        assert_eq!(tracker.failures("uid-1"), 0);
        assert_eq!(tracker.next_delay("uid-1"), Duration::from_secs(5));
    }

    #[test]
    fn test_stale_counters_are_evicted() {
        let tracker = BackoffTracker::new(policy());
        let start = Instant::now();
        for _ in 0..4 {
            tracker.next_delay_at("uid-gone", start);
        }
        assert_eq!(tracker.failures("uid-gone"), 4);

        let later = start + Duration::from_secs(601);
        assert_eq!(tracker.next_delay_at("uid-other", later), Duration::from_secs(5));
        assert_eq!(tracker.failures("uid-gone"), 0);
        assert_eq!(tracker.failures.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_counter_survives_retries_within_cap() {
        let tracker = BackoffTracker::new(policy());
        let mut now = Instant::now();
        for _ in 0..8 {
            tracker.next_delay_at("uid-1", now);
            now += Duration::from_secs(300);
        }
        assert_eq!(tracker.failures("uid-1"), 8);
        assert_eq!(tracker.next_delay_at("uid-1", now), Duration::from_secs(300));
    }
}
