//! Exponential backoff computation.
//!
//! Two users: the executor's in-run batch retries, and the scheduler's
//! rescheduling of a source after failed runs. Both are pure functions of
//! their inputs so tests never sleep.

use std::time::Duration;

/// Exponent cap; beyond this the ceiling always wins anyway.
const MAX_SHIFT: u32 = 16;

/// Delay before retry `attempt` (1-based): `base * 2^(attempt-1)`,
/// bounded by `ceiling`.
pub fn retry_delay(base: Duration, ceiling: Duration, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(MAX_SHIFT);
    base.saturating_mul(1u32 << shift).min(ceiling)
}

/// Delay before the next scheduled run after `consecutive_failures` failed
/// runs: `min(interval, base * 2^consecutive_failures)`, bounded by
/// `ceiling`. Backing off instead of blindly rescheduling at the interval
/// keeps a degraded source from being hammered.
pub fn reschedule_delay(
    interval: Duration,
    base: Duration,
    ceiling: Duration,
    consecutive_failures: u32,
) -> Duration {
    let shift = consecutive_failures.min(MAX_SHIFT);
    let backoff = base.saturating_mul(1u32 << shift).min(ceiling);
    backoff.min(interval)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEC: Duration = Duration::from_secs(1);

    #[test]
    fn test_retry_delay_doubles() {
        let base = Duration::from_millis(500);
        let ceiling = Duration::from_secs(60);
        assert_eq!(retry_delay(base, ceiling, 1), Duration::from_millis(500));
        assert_eq!(retry_delay(base, ceiling, 2), Duration::from_millis(1000));
        assert_eq!(retry_delay(base, ceiling, 3), Duration::from_millis(2000));
    }

    #[test]
    fn test_retry_delay_respects_ceiling() {
        let base = Duration::from_secs(10);
        let ceiling = Duration::from_secs(30);
        assert_eq!(retry_delay(base, ceiling, 5), ceiling);
    }

    #[test]
    fn test_reschedule_single_failure_doubles_base() {
        // interval 60m, base 60s, one failure: next delay is 2m, not 60m
        let delay = reschedule_delay(Duration::from_secs(3600), SEC * 60, SEC * 7200, 1);
        assert_eq!(delay, SEC * 120);
    }

    #[test]
    fn test_reschedule_bounded_by_interval() {
        let delay = reschedule_delay(SEC * 300, SEC * 60, SEC * 7200, 10);
        assert_eq!(delay, SEC * 300);
    }

    #[test]
    fn test_reschedule_bounded_by_ceiling() {
        let delay = reschedule_delay(SEC * 100_000, SEC * 60, SEC * 3600, 12);
        assert_eq!(delay, SEC * 3600);
    }

    #[test]
    fn test_reschedule_monotonic_in_failures() {
        let mut last = Duration::ZERO;
        for n in 0..40 {
            let d = reschedule_delay(SEC * 100_000, SEC * 60, SEC * 3600, n);
            assert!(d >= last, "delay decreased at n={}", n);
            last = d;
        }
    }

    #[test]
    fn test_large_failure_count_does_not_overflow() {
        let d = reschedule_delay(SEC * 100_000, SEC * 60, SEC * 3600, u32::MAX);
        assert_eq!(d, SEC * 3600);
    }
}
