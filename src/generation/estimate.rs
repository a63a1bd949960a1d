/// Progress estimation for in-flight generations
///
/// Estimates only drive progress bars; nothing waits on them.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Extra time each additional concurrent job adds, as a fraction of base
pub const CONCURRENCY_PENALTY: f64 = 0.3;

/// Progress never reaches 100% until the job actually completes
pub const MAX_PENDING_PROGRESS: f32 = 0.99;

/// `base * (1 + 0.3 * (concurrent - 1))`, where `concurrent` includes the
/// job being estimated. Zero is treated as one.
pub fn estimate_duration(base: Duration, concurrent: usize) -> Duration {
    let others = concurrent.max(1) - 1;
    base.mul_f64(1.0 + CONCURRENCY_PENALTY * others as f64)
}

/// Fraction of the estimate elapsed since `started_at`
pub fn progress(started_at: DateTime<Utc>, estimate: Duration, now: DateTime<Utc>) -> f32 {
    let elapsed = (now - started_at).num_milliseconds().max(0) as f64;
    let total = estimate.as_millis().max(1) as f64;
    ((elapsed / total) as f32).clamp(0.0, MAX_PENDING_PROGRESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_job_uses_base_duration() {
        let base = Duration::from_secs(40);
        assert_eq!(estimate_duration(base, 1), base);
        assert_eq!(estimate_duration(base, 0), base);
    }

    #[test]
    fn test_concurrency_penalty() {
        let base = Duration::from_secs(10);
        let estimate = estimate_duration(base, 3);
        assert!((estimate.as_secs_f64() - 16.0).abs() < 1e-6);
    }

    #[test]
    fn test_estimate_is_monotonic_in_concurrency() {
        let base = Duration::from_secs(90);
        let mut previous = Duration::ZERO;
        for concurrent in 0..20 {
            let estimate = estimate_duration(base, concurrent);
            assert!(estimate >= previous);
            previous = estimate;
        }
    }

    #[test]
    fn test_progress_caps_below_one() {
        let start = Utc::now();
        let estimate = Duration::from_secs(10);
        assert_eq!(progress(start, estimate, start), 0.0);
        let halfway = progress(start, estimate, start + chrono::Duration::seconds(5));
        assert!((halfway - 0.5).abs() < 1e-6);
        assert_eq!(progress(start, estimate, start + chrono::Duration::seconds(60)), MAX_PENDING_PROGRESS);
    }
}
