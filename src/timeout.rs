//! Timeout policy bounding calls into the shared counter store

use crate::error::StoreError;
use std::future::Future;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct TimeoutPolicy {
    duration: Duration,
}

impl TimeoutPolicy {
    /// Create a timeout policy. Panics if duration is zero or `Duration::MAX`.
    ///
    /// [`ThrottleConfig`](crate::ThrottleConfig) rejects a zero store timeout before it gets here.
    pub fn new(duration: Duration) -> Self {
        assert!(
            duration > Duration::ZERO && duration < Duration::MAX,
            "timeout duration must be non-zero and finite",
        );
        Self { duration }
    }

    /// Inspect the configured timeout duration.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Run a store operation, turning an overrun into [`StoreError::timeout`].
    ///
    /// The operation future is dropped on overrun; whatever it had applied remotely is
    /// treated as lost.
    pub async fn execute<T, Fut>(&self, operation: Fut) -> Result<T, StoreError>
    where
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let start = Instant::now();

        match tokio::time::timeout(self.duration, operation).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::timeout(start.elapsed(), self.duration)),
        }
    }
}
