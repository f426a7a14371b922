use crate::clock::Clock;
use crate::rate_limit::fallback::FallbackCounter;
use crate::rate_limit::store::WindowStore;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Periodically drops expired [`FallbackCounter`] entries so degraded-mode state can't grow
/// without bound. Given a store with [`with_store`](Self::with_store), it also purges that
/// store's idle keys in the same cycle.
///
/// Runs beside request handling. A request only waits on it while the reaper scans or
/// trims the one map shard that request's key lives in.
#[derive(Clone)]
pub struct FallbackReaper {
    counter: Arc<FallbackCounter>,
    store: Option<Arc<dyn WindowStore>>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl std::fmt::Debug for FallbackReaper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackReaper")
            .field("counter", &self.counter)
            .field("store", &self.store.as_ref().map(|_| "<dyn WindowStore>"))
            .field("clock", &self.clock)
            .field("interval", &self.interval)
            .finish()
    }
}

impl FallbackReaper {
    /// Panics if `interval` is zero; [`ThrottleConfig`](crate::ThrottleConfig) rejects that
    /// earlier.
    pub fn new(counter: Arc<FallbackCounter>, clock: Arc<dyn Clock>, interval: Duration) -> Self {
        assert!(interval > Duration::ZERO, "reap interval must be non-zero");
        Self { counter, store: None, clock, interval }
    }

    /// Also purge `store`'s expired keys every cycle.
    pub fn with_store(mut self, store: Arc<dyn WindowStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// One cycle. Returns the number of fallback entries and store keys removed.
    pub fn sweep(&self) -> usize {
        let removed = self.counter.purge_expired(self.clock.now_millis());
        let idle_keys = self.store.as_ref().map_or(0, |store| store.purge_expired());
        tracing::debug!(
            target: "turnstile::reaper",
            removed,
            idle_keys,
            remaining = self.counter.len(),
            "swept fallback counters"
        );
        removed + idle_keys
    }

    /// Run on the current tokio runtime until the returned handle is shut down or dropped.
    ///
    /// The first sweep happens one interval after spawning.
    pub fn spawn(self) -> ReaperHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            tracing::info!(
                target: "turnstile::reaper",
                interval_ms = self.interval.as_millis() as u64,
                "fallback reaper started"
            );
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        // A panicking sweep must not take the reaper down with it.
                        let swept = std::panic::catch_unwind(AssertUnwindSafe(|| self.sweep()));
                        if swept.is_err() {
                            tracing::warn!(
                                target: "turnstile::reaper",
                                "fallback sweep failed; retrying next tick"
                            );
                        }
                    }
                }
            }
            tracing::info!(target: "turnstile::reaper", "fallback reaper stopped");
        });
        ReaperHandle { stop: Some(stop_tx), task: Some(task) }
    }
}

/// Cancellation handle for a spawned [`FallbackReaper`].
///
/// Dropping the handle stops the task without waiting for it.
#[derive(Debug)]
pub struct ReaperHandle {
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ReaperHandle {
    /// Stop the reaper and wait for its task to finish.
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for ReaperHandle {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}
