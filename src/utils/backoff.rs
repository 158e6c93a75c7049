//! Retry pacing for TriggerClaw.
//!
//! One [`Backoff`] policy drives every bounded-retry path in the crate:
//! the subscriber's reconnect loop, session creation and tool execution
//! retries. Delays follow equal-jitter exponential backoff: half of the
//! capped exponential delay is kept, the other half is randomized, so
//! concurrent retries spread apart instead of thundering together.

use std::time::Duration;

/// Exponential backoff policy with equal jitter.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base_delay_ms: u64,
    max_delay_ms: u64,
}

impl Backoff {
    pub fn new(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
        }
    }

    /// The capped exponential delay for a 0-indexed attempt, before jitter.
    fn exponential_ms(&self, attempt: u32) -> u64 {
        self.base_delay_ms
            .saturating_mul(1u64 << attempt.min(16))
            .min(self.max_delay_ms)
    }

    /// The jittered delay for an attempt. Deterministic given the seed:
    /// the result lands in `[exponential/2, exponential)`.
    pub fn delay_for(&self, attempt: u32, jitter_seed: u64) -> Duration {
        let exponential = self.exponential_ms(attempt);
        let kept = exponential / 2;
        let jitter_span = (exponential - kept).max(1);
        Duration::from_millis(kept + jitter_seed % jitter_span)
    }

    /// Sleep for the attempt's jittered delay. The jitter seed comes from
    /// the clock's nanosecond component, which decorrelates concurrent
    /// retries well enough without pulling in a `rand` dependency.
    pub async fn sleep(&self, attempt: u32) {
        let seed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.subsec_nanos() as u64)
            .unwrap_or(0);
        tokio::time::sleep(self.delay_for(attempt, seed)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unjittered_delay_doubles_per_attempt() {
        let backoff = Backoff::new(1000, 60_000);
        // Seed 0 leaves only the kept half of the exponential delay
        assert_eq!(backoff.delay_for(0, 0), Duration::from_millis(500));
        assert_eq!(backoff.delay_for(1, 0), Duration::from_millis(1000));
        assert_eq!(backoff.delay_for(2, 0), Duration::from_millis(2000));
        assert_eq!(backoff.delay_for(3, 0), Duration::from_millis(4000));
    }

    #[test]
    fn test_jitter_stays_below_exponential() {
        let backoff = Backoff::new(1000, 60_000);
        // attempt 1: exponential 2000, kept 1000, jitter span 1000
        assert_eq!(backoff.delay_for(1, 999), Duration::from_millis(1999));
        // The seed wraps at the span, never reaching the full exponential
        assert_eq!(backoff.delay_for(1, 1000), Duration::from_millis(1000));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let backoff = Backoff::new(1000, 30_000);
        // attempt 10 would be 1_024_000 uncapped
        assert_eq!(backoff.delay_for(10, 0), Duration::from_millis(15_000));
        assert!(backoff.delay_for(10, u64::MAX) < Duration::from_millis(30_000));
    }

    #[test]
    fn test_huge_attempt_saturates_shift() {
        let backoff = Backoff::new(1000, u64::MAX);
        // The shift clamps at 16, so large attempts cannot overflow
        let expected = (1000u64 << 16) / 2;
        assert_eq!(backoff.delay_for(60, 0), Duration::from_millis(expected));
    }

    #[test]
    fn test_zero_base_yields_zero_delay() {
        let backoff = Backoff::new(0, 10);
        assert_eq!(backoff.delay_for(0, 12345), Duration::from_millis(0));
    }

    #[tokio::test]
    async fn test_sleep_waits_at_least_kept_half() {
        let backoff = Backoff::new(10, 20);
        let start = std::time::Instant::now();
        backoff.sleep(0).await;
        assert!(start.elapsed() >= Duration::from_millis(5));
    }
}
