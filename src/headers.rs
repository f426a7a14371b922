//! Rate-limit response headers.

use crate::decision::RateDecision;
use http::header::{HeaderName, RETRY_AFTER};
use http::{HeaderMap, HeaderValue};

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Write the headers for `decision`.
///
/// Limit and remaining always; reset (epoch millis) and `Retry-After` (seconds) only when
/// the request was rejected.
pub fn apply(decision: &RateDecision, headers: &mut HeaderMap) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    if let Some(retry_after) = decision.retry_after_seconds {
        headers.insert(X_RATELIMIT_RESET, HeaderValue::from(decision.reset_at_millis));
        headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));
    }
}
