//! Retry backoff: exponential with jitter, capped (§4.4.1).

use std::time::Duration;

use rand::Rng;

/// `min(cap, base * 2^attempts) * U(0.5, 1.5)`. `attempts` is the job's
/// `run_attempts` *before* the attempt about to be scheduled, so the first
/// retry (attempts = 1) backs off by roughly `base`.
pub fn exponential_backoff_with_jitter(attempts: u32, base: Duration, cap: Duration) -> Duration {
    let scaled = base.as_millis().saturating_mul(1u128 << attempts.min(32));
    let capped = scaled.min(cap.as_millis());
    let jitter = rand::thread_rng().gen_range(0.5..1.5);
    Duration::from_millis((capped as f64 * jitter) as u64)
}

/// The policy used by default: base 100ms, capped at 30s.
pub fn default_backoff(attempts: u32) -> Duration {
    exponential_backoff_with_jitter(attempts, Duration::from_millis(100), Duration::from_secs(30))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stays_within_jittered_bounds() {
        for attempts in 0..10 {
            let d = default_backoff(attempts);
            assert!(d <= Duration::from_millis((30_000_f64 * 1.5) as u64));
        }
    }

    #[test]
    fn grows_then_caps() {
        let small = exponential_backoff_with_jitter(1, Duration::from_millis(100), Duration::from_secs(30));
        let huge = exponential_backoff_with_jitter(20, Duration::from_millis(100), Duration::from_secs(30));
        assert!(small < Duration::from_secs(1));
        assert!(huge <= Duration::from_millis(45_000));
    }
}
