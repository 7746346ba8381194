//! Polling cadence for job monitoring.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Capped exponential backoff between status polls.
///
/// The n-th delay (0-indexed) is `initial_delay_ms * multiplier^n`, capped at
/// `max_delay_ms`. No jitter is applied, so successive delays never shrink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollConfig {
    /// Delay before the second poll, in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Growth factor applied after each poll.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_initial_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    5_000
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl PollConfig {
    /// Creates the default configuration (200 ms, doubling, capped at 5 s).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the initial delay.
    #[must_use]
    pub fn with_initial_delay_ms(mut self, delay: u64) -> Self {
        self.initial_delay_ms = delay;
        self
    }

    /// Sets the delay cap.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the growth factor. Values below 1.0 are treated as 1.0.
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Returns the delay to wait after the given 0-indexed poll.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let cap = self.max_delay_ms;
        let multiplier = if self.multiplier.is_finite() {
            self.multiplier.max(1.0)
        } else {
            1.0
        };
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.initial_delay_ms as f64 * multiplier.powi(exponent);
        let millis = if raw.is_finite() && raw < cap as f64 {
            raw as u64
        } else {
            cap
        };
        Duration::from_millis(millis.min(cap))
    }

    /// Returns an iterator-like backoff cursor.
    #[must_use]
    pub fn backoff(&self) -> Backoff<'_> {
        Backoff {
            config: self,
            attempt: 0,
        }
    }
}

/// Yields successive poll delays for one wait loop.
#[derive(Debug)]
pub struct Backoff<'a> {
    config: &'a PollConfig,
    attempt: u32,
}

impl Backoff<'_> {
    /// Returns the next delay, clamped to `remaining`.
    pub fn next_delay(&mut self, remaining: Duration) -> Duration {
        let delay = self.config.delay_for(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay.min(remaining)
    }

    /// Number of delays handed out so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule() {
        let config = PollConfig::default();
        let delays: Vec<u64> = (0..7)
            .map(|n| u64::try_from(config.delay_for(n).as_millis()).unwrap())
            .collect();
        assert_eq!(delays, vec![200, 400, 800, 1600, 3200, 5000, 5000]);
    }

    #[test]
    fn test_delays_never_shrink() {
        let config = PollConfig::new().with_initial_delay_ms(3).with_multiplier(1.7);
        let mut previous = Duration::ZERO;
        for n in 0..200 {
            let delay = config.delay_for(n);
            assert!(delay >= previous);
            assert!(delay <= Duration::from_millis(config.max_delay_ms));
            previous = delay;
        }
    }

    #[test]
    fn test_multiplier_below_one_is_constant() {
        let config = PollConfig::new().with_multiplier(0.5);
        assert_eq!(config.delay_for(5), Duration::from_millis(200));
    }

    #[test]
    fn test_backoff_clamps_to_remaining() {
        let config = PollConfig::default();
        let mut backoff = config.backoff();

        assert_eq!(backoff.next_delay(Duration::from_secs(10)), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(Duration::from_millis(50)), Duration::from_millis(50));
        assert_eq!(backoff.attempts(), 2);
    }

    #[test]
    fn test_serde_defaults() {
        let config: PollConfig = serde_json::from_str(r#"{"max_delay_ms": 1000}"#).unwrap();
        assert_eq!(config.initial_delay_ms, 200);
        assert_eq!(config.max_delay_ms, 1000);
    }
}
