//! Exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

/// Fraction of the delay added as random jitter (up to 10%).
pub const JITTER_RATIO: f64 = 0.10;

/// Computes the backoff delay for a retry attempt, without jitter.
///
/// `base × 2^(retry_count − 1)`, capped at `max`. A retry count of zero is
/// treated as the first attempt.
pub fn retry_delay(retry_count: u32, base: Duration, max: Duration) -> Duration {
    let attempt = retry_count.max(1);
    let shift = (attempt - 1).min(32);
    let millis = (base.as_millis() as u64).saturating_mul(1u64 << shift);
    Duration::from_millis(millis).min(max)
}

/// Adds up to [`JITTER_RATIO`] of random jitter to a delay, still capped at
/// `max`.
///
/// Jitter spreads retries from jobs that failed together (one dead worker
/// fails its whole assignment list at once).
pub fn jittered(delay: Duration, max: Duration) -> Duration {
    let ratio = rand::thread_rng().gen_range(0.0..=JITTER_RATIO);
    let with_jitter = delay + delay.mul_f64(ratio);
    with_jitter.min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_millis(100);
    const MAX: Duration = Duration::from_secs(60);

    #[test]
    fn test_delay_doubles_per_attempt() {
        assert_eq!(retry_delay(1, BASE, MAX), Duration::from_millis(100));
        assert_eq!(retry_delay(2, BASE, MAX), Duration::from_millis(200));
        assert_eq!(retry_delay(3, BASE, MAX), Duration::from_millis(400));
        assert_eq!(retry_delay(4, BASE, MAX), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_is_monotonic() {
        let mut previous = Duration::ZERO;
        for attempt in 1..=20 {
            let delay = retry_delay(attempt, BASE, MAX);
            assert!(delay >= previous, "attempt {} regressed", attempt);
            previous = delay;
        }
    }

    #[test]
    fn test_delay_caps_at_max() {
        assert_eq!(retry_delay(30, BASE, MAX), MAX);
        // Large retry counts must not overflow.
        assert_eq!(retry_delay(u32::MAX, BASE, MAX), MAX);
    }

    #[test]
    fn test_zero_retry_count_behaves_like_first() {
        assert_eq!(retry_delay(0, BASE, MAX), retry_delay(1, BASE, MAX));
    }

    #[test]
    fn test_jitter_bounded() {
        let delay = Duration::from_millis(1_000);
        for _ in 0..100 {
            let jittered = jittered(delay, MAX);
            assert!(jittered >= delay);
            assert!(jittered <= delay + delay.mul_f64(JITTER_RATIO));
        }
    }

    #[test]
    fn test_jitter_respects_max() {
        let delay = Duration::from_secs(60);
        for _ in 0..10 {
            assert!(jittered(delay, MAX) <= MAX);
        }
    }
}
