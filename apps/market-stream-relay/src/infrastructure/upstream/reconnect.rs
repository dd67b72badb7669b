//! Reconnection Policy
//!
//! Capped exponential backoff with full reset on success. Optional jitter
//! and attempt limit are off by default.

use std::time::Duration;

use rand::Rng;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Ceiling for the delay between attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (2.0 doubles the delay).
    pub multiplier: f64,
    /// Jitter factor as a fraction (e.g., 0.1 = ±10% randomization).
    pub jitter_factor: f64,
    /// Maximum number of reconnection attempts (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts: 0, // Unlimited
        }
    }
}

impl ReconnectConfig {
    /// Create configuration from `WebSocketSettings`.
    #[must_use]
    pub const fn from_websocket_settings(settings: &crate::WebSocketSettings) -> Self {
        Self {
            initial_delay: settings.reconnect_delay_initial,
            max_delay: settings.reconnect_delay_max,
            multiplier: settings.reconnect_delay_multiplier,
            jitter_factor: 0.0,
            max_attempts: settings.max_reconnect_attempts,
        }
    }
}

/// Reconnection policy.
///
/// The delay returned for attempt *k* (1-based) is
/// `min(initial * multiplier^(k-1), max_delay)`.
///
/// # Example
///
/// ```rust
/// use market_stream_relay::infrastructure::upstream::reconnect::{ReconnectConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
///
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(2)));
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(4)));
///
/// // Successful reconnect
/// policy.reset();
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(2)));
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    current_delay: Duration,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub fn new(config: ReconnectConfig) -> Self {
        let current_delay = config.initial_delay.min(config.max_delay);
        Self {
            config,
            current_delay,
            attempt_count: 0,
        }
    }

    /// Get the next delay duration and advance the backoff.
    ///
    /// Returns `None` if max attempts have been exceeded.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.config.max_attempts > 0 && self.attempt_count >= self.config.max_attempts {
            return None;
        }

        self.attempt_count += 1;

        let delay = self.current_delay.min(self.config.max_delay);
        let delay_with_jitter = self.apply_jitter(delay);

        #[allow(clippy::cast_precision_loss)]
        let scaled = (self.current_delay.as_millis() as f64 * self.config.multiplier).round();
        let next_millis = if scaled.is_finite() && scaled > 0.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                scaled as u128
            }
        } else {
            0
        };
        let capped = next_millis.min(self.config.max_delay.as_millis());
        self.current_delay = Duration::from_millis(u64::try_from(capped).unwrap_or(u64::MAX));

        Some(delay_with_jitter)
    }

    /// Reset the policy after a successful connection.
    pub fn reset(&mut self) {
        self.current_delay = self.config.initial_delay.min(self.config.max_delay);
        self.attempt_count = 0;
    }

    /// The delay the next attempt will wait, before jitter.
    #[must_use]
    pub const fn current_delay(&self) -> Duration {
        self.current_delay
    }

    /// Attempts since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn no_jitter(initial_ms: u64, max_ms: u64, max_attempts: u32) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_millis(max_ms),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts,
        }
    }

    #[test]
    fn default_config_values() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(2));
        assert_eq!(config.max_delay, Duration::from_secs(10));
        assert!((config.multiplier - 2.0).abs() < f64::EPSILON);
        assert!(config.jitter_factor.abs() < f64::EPSILON);
        assert_eq!(config.max_attempts, 0);
    }

    #[test]
    fn default_sequence_caps_at_ten_seconds() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
        let delays: Vec<u64> = (0..5)
            .map(|_| policy.next_delay().unwrap().as_secs())
            .collect();
        assert_eq!(delays, [2, 4, 8, 10, 10]);
    }

    #[test]
    fn policy_reset() {
        let mut policy = ReconnectPolicy::new(no_jitter(100, 10_000, 3));

        let _ = policy.next_delay();
        let _ = policy.next_delay();
        assert_eq!(policy.attempt_count(), 2);
        assert_eq!(policy.current_delay(), Duration::from_millis(400));

        policy.reset();

        assert_eq!(policy.attempt_count(), 0);
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn policy_max_attempts() {
        let mut policy = ReconnectPolicy::new(no_jitter(100, 1_000, 3));

        for expected in 1..=3 {
            assert!(policy.next_delay().is_some());
            assert_eq!(policy.attempt_count(), expected);
        }

        assert!(policy.next_delay().is_none());
    }

    #[test]
    fn initial_delay_above_ceiling_is_capped() {
        let mut policy = ReconnectPolicy::new(no_jitter(20_000, 10_000, 0));
        assert_eq!(policy.current_delay(), Duration::from_secs(10));
        assert_eq!(policy.next_delay(), Some(Duration::from_secs(10)));
        assert_eq!(policy.next_delay(), Some(Duration::from_secs(10)));

        policy.reset();
        assert_eq!(policy.next_delay(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn policy_jitter_bounds() {
        for _ in 0..100 {
            let mut policy = ReconnectPolicy::new(ReconnectConfig {
                jitter_factor: 0.1,
                ..no_jitter(1_000, 10_000, 0)
            });

            let millis = policy.next_delay().unwrap().as_millis();
            assert!(millis >= 900, "delay {millis}ms is below minimum 900ms");
            assert!(millis <= 1100, "delay {millis}ms is above maximum 1100ms");
        }
    }

    #[test]
    fn unlimited_attempts() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
        for _ in 0..1000 {
            assert!(policy.next_delay().is_some());
        }
    }

    proptest! {
        #[test]
        fn delay_after_attempt_k_is_capped_doubling(
            initial_ms in 1_u64..5_000,
            ceiling_factor in 1_u64..64,
            attempts in 1_u32..40,
        ) {
            let max_ms = initial_ms * ceiling_factor;
            let mut policy = ReconnectPolicy::new(no_jitter(initial_ms, max_ms, 0));

            for k in 1..=attempts {
                let expected = initial_ms
                    .saturating_mul(1_u64 << (k - 1).min(62))
                    .min(max_ms);
                prop_assert_eq!(policy.next_delay(), Some(Duration::from_millis(expected)));
            }
        }

        #[test]
        fn reset_always_returns_to_initial(
            initial_ms in 1_u64..5_000,
            attempts in 0_u32..20,
        ) {
            let mut policy = ReconnectPolicy::new(no_jitter(initial_ms, initial_ms * 8, 0));
            for _ in 0..attempts {
                let _ = policy.next_delay();
            }
            policy.reset();
            prop_assert_eq!(policy.next_delay(), Some(Duration::from_millis(initial_ms)));
        }
    }
}
