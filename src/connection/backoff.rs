//! Exponential backoff policy
//!
//! Pure delay arithmetic shared by the connection manager: each failure
//! multiplies the previous delay and clamps at the configured maximum; a
//! success resets to the initial delay.

use std::time::Duration;

/// Geometric retry-delay policy with a cap
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f32,
}

impl BackoffPolicy {
    pub fn new(initial_delay: Duration, max_delay: Duration, multiplier: f32) -> Self {
        debug_assert!(multiplier > 1.0, "backoff multiplier must grow the delay");
        Self {
            initial_delay,
            max_delay,
            multiplier,
        }
    }

    /// Delay to use before the very first retry
    pub fn first(&self) -> Duration {
        self.initial_delay
    }

    /// Delay to use after a failure, given the delay that was just waited.
    /// The multiplier applies to the previous delay, not the initial one,
    /// so consecutive failures grow the delay geometrically.
    pub fn next(&self, previous: Duration) -> Duration {
        let scaled = previous.mul_f32(self.multiplier);
        scaled.min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(60), 2.0)
    }

    #[test]
    fn test_geometric_growth_with_cap() {
        let policy = policy();
        let mut delay = policy.first();
        let mut observed = vec![delay.as_secs()];
        for _ in 0..7 {
            delay = policy.next(delay);
            observed.push(delay.as_secs());
        }
        assert_eq!(observed, vec![1, 2, 4, 8, 16, 32, 60, 60]);
    }

    #[test]
    fn test_reset_starts_over() {
        let policy = policy();
        let mut delay = policy.first();
        for _ in 0..10 {
            delay = policy.next(delay);
        }
        assert_eq!(delay, Duration::from_secs(60));
        // A successful connection restarts the sequence from the beginning
        assert_eq!(policy.first(), Duration::from_secs(1));
    }

    #[test]
    fn test_fractional_multiplier() {
        let policy = BackoffPolicy::new(Duration::from_millis(500), Duration::from_secs(10), 1.5);
        assert_eq!(policy.next(Duration::from_millis(500)), Duration::from_millis(750));
    }
}
