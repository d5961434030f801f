//! Transport reconnection policy
//!
//! Linear backoff: attempt `n` is scheduled `n × base_delay` after the
//! failure, up to `max_attempts`. Attempts are counted per call.
//!
//! ```rust
//! use callrelay_session::reconnect::ReconnectPolicy;
//! use std::time::Duration;
//!
//! let mut policy = ReconnectPolicy::new(3, Duration::from_secs(2));
//! assert_eq!(policy.next_attempt().unwrap().delay, Duration::from_secs(2));
//! assert_eq!(policy.next_attempt().unwrap().delay, Duration::from_secs(4));
//! assert_eq!(policy.next_attempt().unwrap().delay, Duration::from_secs(6));
//! assert!(policy.next_attempt().is_none());
//! ```

use std::time::Duration;

/// One scheduled reconnect attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledAttempt {
    /// 1-based attempt number
    pub attempt: u32,
    pub delay: Duration,
}

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    max_attempts: u32,
    base_delay: Duration,
    attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            attempts: 0,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Attempts scheduled so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Delay before attempt `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    /// Schedule the next attempt, or `None` once the cap is reached
    pub fn next_attempt(&mut self) -> Option<ScheduledAttempt> {
        if self.is_exhausted() {
            return None;
        }
        self.attempts += 1;
        Some(ScheduledAttempt {
            attempt: self.attempts,
            delay: self.delay_for(self.attempts),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn zero_attempts_never_schedules() {
        let mut policy = ReconnectPolicy::new(0, Duration::from_secs(2));
        assert!(policy.is_exhausted());
        assert!(policy.next_attempt().is_none());
    }

    proptest! {
        #[test]
        fn never_exceeds_cap_and_delay_is_linear(max in 0u32..10, base_ms in 1u64..10_000, calls in 0usize..20) {
            let base = Duration::from_millis(base_ms);
            let mut policy = ReconnectPolicy::new(max, base);
            let mut scheduled = 0u32;
            for _ in 0..calls {
                if let Some(next) = policy.next_attempt() {
                    scheduled += 1;
                    prop_assert_eq!(next.attempt, scheduled);
                    prop_assert_eq!(next.delay, base * next.attempt);
                }
            }
            prop_assert!(scheduled <= max);
            prop_assert_eq!(policy.attempts(), scheduled);
        }
    }
}
