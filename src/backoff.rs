//! Delay computation between attempts.

use std::time::Duration;

use rand::Rng;

use crate::ClientOptions;

/// Capped exponential backoff with jitter and server-hint precedence.
#[derive(Clone, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the second attempt, before jitter.
    pub base_delay: Duration,
    /// Ceiling for computed delays.
    pub max_delay: Duration,
    /// Largest fraction shaved off a computed delay at random, in `[0, 1]`.
    pub jitter_ratio: f64,
    /// Longest server hint that is honored; longer hints are ignored.
    pub max_retry_after: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_options(&ClientOptions::default())
    }
}

impl BackoffPolicy {
    pub fn from_options(options: &ClientOptions) -> Self {
        Self {
            base_delay: Duration::from_millis(options.initial_backoff_ms),
            max_delay: Duration::from_millis(options.max_backoff_ms),
            jitter_ratio: options.jitter_ratio,
            max_retry_after: Duration::from_millis(options.max_retry_after_ms),
        }
    }

    /// Delay to wait after attempt `attempt` (1-based) failed.
    ///
    /// A server hint within `max_retry_after` is used as-is, even above
    /// `max_delay`; only the computed backoff is capped by `max_delay`.
    pub fn delay(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let sample = rand::thread_rng().gen_range(0.0..1.0);
        self.delay_with_sample(attempt, hint, sample)
    }

    /// Same as [`BackoffPolicy::delay`] with the jitter sample supplied.
    ///
    /// `sample` is a uniform value in `[0, 1)`; `0.0` means no jitter.
    pub fn delay_with_sample(&self, attempt: u32, hint: Option<Duration>, sample: f64) -> Duration {
        if let Some(hint) = hint.filter(|hint| *hint <= self.max_retry_after) {
            return hint;
        }

        let computed = self.exponential(attempt);
        let ratio = if self.jitter_ratio.is_finite() {
            self.jitter_ratio.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let sample = if sample.is_finite() {
            sample.clamp(0.0, 1.0)
        } else {
            0.0
        };
        computed
            .mul_f64(1.0 - ratio * sample)
            .min(self.max_delay)
    }

    /// `base_delay * 2^(attempt - 1)`, capped at `max_delay`.
    fn exponential(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::BackoffPolicy;

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter_ratio: 0.25,
            max_retry_after: Duration::from_secs(60),
        }
    }

    #[test]
    fn doubles_per_attempt_without_jitter() {
        let policy = policy();
        assert_eq!(policy.delay_with_sample(1, None, 0.0), Duration::from_millis(500));
        assert_eq!(policy.delay_with_sample(2, None, 0.0), Duration::from_secs(1));
        assert_eq!(policy.delay_with_sample(3, None, 0.0), Duration::from_secs(2));
        assert_eq!(policy.delay_with_sample(4, None, 0.0), Duration::from_secs(4));
    }

    #[test]
    fn caps_at_max_delay() {
        let policy = policy();
        assert_eq!(policy.delay_with_sample(5, None, 0.0), Duration::from_secs(8));
        assert_eq!(policy.delay_with_sample(40, None, 0.0), Duration::from_secs(8));
        assert_eq!(policy.delay_with_sample(u32::MAX, None, 0.0), Duration::from_secs(8));
    }

    #[test]
    fn attempt_zero_is_treated_as_first() {
        assert_eq!(policy().delay_with_sample(0, None, 0.0), Duration::from_millis(500));
    }

    #[test]
    fn jitter_stays_within_ratio() {
        let policy = policy();
        for _ in 0..200 {
            let delay = policy.delay(2, None);
            assert!(delay <= Duration::from_secs(1), "delay too large: {delay:?}");
            assert!(delay >= Duration::from_millis(750), "delay too small: {delay:?}");
        }
    }

    #[test]
    fn hint_takes_precedence() {
        let policy = policy();
        assert_eq!(
            policy.delay_with_sample(3, Some(Duration::from_millis(100)), 0.9),
            Duration::from_millis(100)
        );
        assert_eq!(policy.delay(1, Some(Duration::ZERO)), Duration::ZERO);
        assert_eq!(
            policy.delay(1, Some(Duration::from_secs(30))),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn unreasonable_hint_falls_back_to_backoff() {
        let policy = policy();
        assert_eq!(
            policy.delay_with_sample(1, Some(Duration::from_secs(3600)), 0.0),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn out_of_range_jitter_is_clamped() {
        let policy = BackoffPolicy {
            jitter_ratio: 7.5,
            ..policy()
        };
        assert_eq!(
            policy.delay_with_sample(1, None, 0.999),
            Duration::from_millis(500).mul_f64(1.0 - 0.999)
        );
        let policy = BackoffPolicy {
            jitter_ratio: f64::NAN,
            ..policy
        };
        assert_eq!(policy.delay_with_sample(1, None, 0.5), Duration::from_millis(500));
    }
}
