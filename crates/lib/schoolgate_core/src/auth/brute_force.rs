//! Sliding-window login throttle keyed by client address.
//!
//! Process-local and best effort: state resets on restart and is not shared
//! between server processes. It complements per-account lockout, it does
//! not replace it.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::debug;

use super::to_std;
use crate::clock::Clock;

/// Window length and per-window ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BruteForcePolicy {
    pub window: Duration,
    pub max_per_window: usize,
}

impl Default for BruteForcePolicy {
    fn default() -> Self {
        Self {
            window: Duration::minutes(15),
            max_per_window: 20,
        }
    }
}

/// Attempt timestamps per client address.
#[derive(Debug)]
pub struct BruteForceCounter {
    attempts: DashMap<String, VecDeque<DateTime<Utc>>>,
    policy: BruteForcePolicy,
    clock: Arc<dyn Clock>,
}

impl BruteForceCounter {
    pub fn new(policy: BruteForcePolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            attempts: DashMap::new(),
            policy,
            clock,
        }
    }

    pub fn policy(&self) -> &BruteForcePolicy {
        &self.policy
    }

    /// Record an attempt from `address` and report whether the address has
    /// exceeded the ceiling within the window.
    pub fn record_and_check(&self, address: &str) -> bool {
        let now = self.clock.now();
        let cutoff = now - self.policy.window;
        let mut entry = self.attempts.entry(address.to_string()).or_default();
        prune(&mut entry, cutoff);
        entry.push_back(now);
        // Only the newest `max + 1` stamps can affect the verdict.
        while entry.len() > self.policy.max_per_window + 1 {
            entry.pop_front();
        }
        let suspected = entry.len() > self.policy.max_per_window;
        if suspected {
            debug!(address, in_window = entry.len(), "brute-force threshold exceeded");
        }
        suspected
    }

    /// Time until `address` drops back under the ceiling, if it is over.
    pub fn retry_after(&self, address: &str) -> Option<StdDuration> {
        let now = self.clock.now();
        let entry = self.attempts.get(address)?;
        let in_window: Vec<&DateTime<Utc>> = entry
            .iter()
            .filter(|t| **t > now - self.policy.window)
            .collect();
        if in_window.len() <= self.policy.max_per_window {
            return None;
        }
        let pivot = in_window[in_window.len() - self.policy.max_per_window - 1];
        Some(to_std(*pivot + self.policy.window - now))
    }

    /// Evict addresses with no attempts inside the window.
    pub fn cleanup(&self) {
        let cutoff = self.clock.now() - self.policy.window;
        self.attempts.retain(|_, stamps| {
            prune(stamps, cutoff);
            !stamps.is_empty()
        });
    }

    /// Spawn a periodic cleanup task.
    pub fn spawn_cleanup_task(self: &Arc<Self>, every: StdDuration) -> tokio::task::JoinHandle<()> {
        let counter = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                counter.cleanup();
            }
        })
    }
}

fn prune(stamps: &mut VecDeque<DateTime<Utc>>, cutoff: DateTime<Utc>) {
    while stamps.front().is_some_and(|t| *t <= cutoff) {
        stamps.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::testing;
    use crate::clock::ManualClock;

    fn counter(clock: Arc<ManualClock>) -> BruteForceCounter {
        BruteForceCounter::new(BruteForcePolicy::default(), clock)
    }

    #[test]
    fn twenty_first_attempt_in_window_is_suspected() {
        let clock = testing::clock();
        let counter = counter(clock.clone());
        for _ in 0..20 {
            assert!(!counter.record_and_check("10.0.0.1"));
            clock.advance(Duration::seconds(10));
        }
        assert!(counter.record_and_check("10.0.0.1"));
    }

    #[test]
    fn addresses_are_independent() {
        let clock = testing::clock();
        let counter = counter(clock);
        for _ in 0..21 {
            counter.record_and_check("10.0.0.1");
        }
        assert!(!counter.record_and_check("10.0.0.2"));
    }

    #[test]
    fn attempts_spaced_beyond_window_do_not_accumulate() {
        let clock = testing::clock();
        let counter = counter(clock.clone());
        for _ in 0..50 {
            assert!(!counter.record_and_check("10.0.0.1"));
            clock.advance(Duration::minutes(16));
        }
    }

    #[test]
    fn retry_after_counts_down_to_oldest_expiry() {
        let clock = testing::clock();
        let counter = counter(clock.clone());
        for _ in 0..21 {
            counter.record_and_check("10.0.0.1");
        }
        clock.advance(Duration::minutes(5));
        let wait = counter.retry_after("10.0.0.1").unwrap();
        assert_eq!(wait, StdDuration::from_secs(10 * 60));

        clock.advance(Duration::minutes(10));
        assert!(counter.retry_after("10.0.0.1").is_none());
        assert!(!counter.record_and_check("10.0.0.1"));
    }

    #[test]
    fn cleanup_evicts_idle_addresses() {
        let clock = testing::clock();
        let counter = counter(clock.clone());
        counter.record_and_check("10.0.0.1");
        counter.record_and_check("10.0.0.2");
        clock.advance(Duration::minutes(16));
        counter.record_and_check("10.0.0.2");
        counter.cleanup();
        assert_eq!(counter.attempts.len(), 1);
        assert!(counter.attempts.contains_key("10.0.0.2"));
    }

    #[test]
    fn concurrent_recording_is_counted() {
        let clock = testing::clock();
        let counter = Arc::new(counter(clock));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let counter = counter.clone();
                std::thread::spawn(move || {
                    for _ in 0..5 {
                        counter.record_and_check("10.0.0.9");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(counter.record_and_check("10.0.0.9"));
    }
}
