//! Error types for admission control
use std::time::Duration;
use thiserror::Error;

/// Closed set of failure kinds the shared counter store can report.
///
/// The admission filter branches on this, never on error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreErrorKind {
    /// Connection refused, dropped, or otherwise unreachable.
    Unavailable,
    /// The call did not complete within the configured bound.
    Timeout,
    /// The store answered with something we could not interpret.
    Protocol,
}

impl std::fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Unavailable => "unavailable",
            Self::Timeout => "timeout",
            Self::Protocol => "protocol",
        };
        f.write_str(name)
    }
}

/// Failure talking to the shared counter store.
///
/// Any partially applied prune/insert/count is reported as a whole failure; callers never
/// receive a count they cannot trust.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("counter store {kind}: {message}")]
pub struct StoreError {
    kind: StoreErrorKind,
    message: String,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Unavailable, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Protocol, message)
    }

    /// Build the error reported when a store call exceeds its bound.
    pub fn timeout(elapsed: Duration, limit: Duration) -> Self {
        Self::new(
            StoreErrorKind::Timeout,
            format!("no reply after {:?} (limit: {:?})", elapsed, limit),
        )
    }

    pub fn kind(&self) -> StoreErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Check if this error is due to timeout
    pub fn is_timeout(&self) -> bool {
        self.kind == StoreErrorKind::Timeout
    }
}

/// Invalid throttle configuration. Fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A tier limit of zero would either block everything or be read as "unlimited".
    #[error("{tier} limit must be > 0")]
    ZeroLimit {
        /// Name of the offending tier.
        tier: &'static str,
    },
    #[error("window_seconds must be > 0")]
    ZeroWindow,
    #[error("store_timeout must be > 0")]
    ZeroStoreTimeout,
    #[error("reap_interval must be > 0")]
    ZeroReapInterval,
    #[error("exempt paths must not be empty strings")]
    EmptyExemptPath,
    #[error("key_prefix must not be empty or contain ':' or whitespace (got {0:?})")]
    InvalidKeyPrefix(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_display_names_kind() {
        let err = StoreError::unavailable("connection refused");
        let msg = err.to_string();
        assert!(msg.contains("unavailable"));
        assert!(msg.contains("connection refused"));
        assert_eq!(err.kind(), StoreErrorKind::Unavailable);
        assert!(!err.is_timeout());
    }

    #[test]
    fn timeout_error_includes_durations() {
        let err = StoreError::timeout(Duration::from_millis(260), Duration::from_millis(250));
        assert!(err.is_timeout());
        assert!(err.message().contains("250ms"));
    }

    #[test]
    fn config_error_names_tier() {
        let err = ConfigError::ZeroLimit { tier: "login" };
        assert_eq!(err.to_string(), "login limit must be > 0");
    }
}
