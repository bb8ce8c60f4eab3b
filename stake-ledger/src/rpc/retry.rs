// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Retry delays for daemon requests.
//!
//! Two mechanisms cooperate:
//! - [`RetryPolicy`] spaces out the attempts of a single request through `backoff`
//! - [`AdaptiveBackoff`] is shared by all requests of one client and slows the whole client down
//!   while the daemon keeps failing

use backoff::ExponentialBackoff;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per request, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Randomization factor applied to every delay (0.0 disables jitter)
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    250
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.1
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay schedule for one request. Attempts are capped by the caller through
    /// `max_attempts`, so the schedule itself never expires.
    pub fn exponential_backoff(&self) -> ExponentialBackoff {
        let initial_interval = Duration::from_millis(self.base_delay_ms);
        ExponentialBackoff {
            current_interval: initial_interval,
            initial_interval,
            randomization_factor: self.jitter.clamp(0.0, 1.0),
            multiplier: self.multiplier.max(1.0),
            max_interval: Duration::from_millis(self.max_delay_ms.max(self.base_delay_ms)),
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

/// Client-wide pacing delay.
///
/// Every failure multiplies the delay (starting from `floor`) up to `ceiling`; the first success
/// resets it to zero.
#[derive(Debug)]
pub struct AdaptiveBackoff {
    current_ms: AtomicU64,
    floor_ms: u64,
    ceiling_ms: u64,
    factor: u64,
}

impl AdaptiveBackoff {
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        Self {
            current_ms: AtomicU64::new(0),
            floor_ms: floor.as_millis().max(1) as u64,
            ceiling_ms: ceiling.as_millis() as u64,
            factor: 2,
        }
    }

    pub fn current(&self) -> Duration {
        Duration::from_millis(self.current_ms.load(Ordering::Relaxed))
    }

    pub fn on_failure(&self) {
        let _ = self
            .current_ms
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                let next = if current == 0 {
                    self.floor_ms
                } else {
                    current.saturating_mul(self.factor)
                };
                Some(next.min(self.ceiling_ms))
            });
    }

    pub fn on_success(&self) {
        self.current_ms.store(0, Ordering::Relaxed);
    }

    /// Sleep for the current pacing delay, if any
    pub async fn pace(&self) {
        let delay = self.current();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for AdaptiveBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_secs(5))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule_follows_policy() {
        use backoff::backoff::Backoff;

        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            multiplier: 2.0,
            jitter: 0.0,
        };
        let mut schedule = policy.exponential_backoff();
        let delays: Vec<u128> = (0..6)
            .filter_map(|_| schedule.next_backoff())
            .map(|delay| delay.as_millis())
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000]);
    }

    #[test]
    fn test_backoff_jitter_stays_within_factor() {
        use backoff::backoff::Backoff;

        let policy = RetryPolicy {
            base_delay_ms: 1_000,
            max_delay_ms: 1_000,
            jitter: 0.5,
            ..RetryPolicy::default()
        };
        let mut schedule = policy.exponential_backoff();
        for _ in 0..5 {
            let delay = schedule.next_backoff().unwrap();
            assert!(delay >= Duration::from_millis(500), "{delay:?}");
            assert!(delay <= Duration::from_millis(1_500), "{delay:?}");
        }
    }

    #[test]
    fn test_adaptive_backoff_grows_and_resets() {
        let backoff = AdaptiveBackoff::new(Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(backoff.current(), Duration::ZERO);

        backoff.on_failure();
        assert_eq!(backoff.current(), Duration::from_millis(100));
        backoff.on_failure();
        assert_eq!(backoff.current(), Duration::from_millis(200));
        backoff.on_failure();
        assert_eq!(backoff.current(), Duration::from_millis(350));
        backoff.on_failure();
        assert_eq!(backoff.current(), Duration::from_millis(350));

        backoff.on_success();
        assert_eq!(backoff.current(), Duration::ZERO);
    }

    #[test]
    fn test_policy_defaults_from_partial_yaml_like_json() {
        let policy: RetryPolicy = serde_json::from_str(r#"{"max_attempts": 2}"#).unwrap();
        assert_eq!(policy.max_attempts, 2);
        assert_eq!(policy.base_delay_ms, 250);
        assert_eq!(RetryPolicy::no_retry().max_attempts, 1);
    }
}
