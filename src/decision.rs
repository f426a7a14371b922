//! Pure admit/reject policy. No I/O, no clock: everything comes in as arguments.

use std::time::Duration;

/// Outcome of comparing a window count against a limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub admitted: bool,
    pub limit: u64,
    /// Requests left in the window after this one. Zero once the limit is reached.
    pub remaining: u64,
    /// Epoch millis at which the caller's budget is fully restored.
    ///
    /// Approximate: a sliding window has no single reset instant, so this is
    /// `now + window`.
    pub reset_at_millis: u64,
    /// Set only on rejection.
    pub retry_after_seconds: Option<u64>,
}

impl RateDecision {
    pub fn is_admitted(&self) -> bool {
        self.admitted
    }
}

/// Decide whether the request that brought the window to `count` is admitted.
///
/// `count` includes the current request.
pub fn decide(count: u64, limit: u64, window: Duration, now_millis: u64) -> RateDecision {
    let admitted = count <= limit;
    let window_millis = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
    RateDecision {
        admitted,
        limit,
        remaining: limit.saturating_sub(count),
        reset_at_millis: now_millis.saturating_add(window_millis),
        retry_after_seconds: (!admitted).then(|| retry_after_secs(window)),
    }
}

// Whole seconds, rounded up so a sub-second remainder never advertises an early retry.
fn retry_after_secs(window: Duration) -> u64 {
    let secs = window.as_secs();
    if window.subsec_nanos() > 0 {
        secs.saturating_add(1)
    } else {
        secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);

    #[test]
    fn admitted_iff_count_within_limit() {
        for limit in [1u64, 5, 30, 100] {
            for count in 0..=limit * 2 + 1 {
                let d = decide(count, limit, WINDOW, 0);
                assert_eq!(d.admitted, count <= limit, "count={count} limit={limit}");
            }
        }
    }

    #[test]
    fn remaining_is_zero_past_limit() {
        for count in 6..50 {
            assert_eq!(decide(count, 5, WINDOW, 0).remaining, 0);
        }
        assert_eq!(decide(1, 5, WINDOW, 0).remaining, 4);
        assert_eq!(decide(5, 5, WINDOW, 0).remaining, 0);
    }

    #[test]
    fn retry_after_only_on_rejection() {
        let ok = decide(30, 30, WINDOW, 1_000);
        assert!(ok.is_admitted());
        assert_eq!(ok.retry_after_seconds, None);

        let denied = decide(31, 30, WINDOW, 1_000);
        assert!(!denied.is_admitted());
        assert_eq!(denied.retry_after_seconds, Some(60));
        assert_eq!(denied.reset_at_millis, 61_000);
    }

    #[test]
    fn fractional_window_rounds_retry_up() {
        let denied = decide(2, 1, Duration::from_millis(1_500), 0);
        assert_eq!(denied.retry_after_seconds, Some(2));
    }
}
