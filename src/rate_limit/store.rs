use crate::clock::{Clock, WallClock};
use crate::error::StoreError;
use crate::tier::ThrottleKey;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Shared sliding-window counter store (e.g., Redis sorted sets).
///
/// Each key holds one token per counted request, scored by its timestamp in epoch millis.
/// Implementations must apply prune, insert and count as one logical operation and must
/// report any partial failure as an error rather than a count.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Drop tokens scored at or before `now - window`, add a token scored `now`, and return
    /// how many tokens the key holds afterwards. The key then lives for at least `ttl`.
    ///
    /// Nothing is pruned while `now < window`: every token is still inside the window.
    async fn record_and_count(
        &self,
        key: &ThrottleKey,
        now_millis: u64,
        window: Duration,
        ttl: Duration,
    ) -> Result<u64, StoreError>;

    /// Set the key's own time-to-live so idle keys disappear without a cleanup job.
    async fn refresh_expiry(&self, key: &ThrottleKey, ttl: Duration) -> Result<(), StoreError>;

    /// Drop keys whose time-to-live has passed. Returns how many were removed.
    ///
    /// Stores that expire keys on their own (Redis) keep the default no-op.
    fn purge_expired(&self) -> usize {
        0
    }
}

#[async_trait]
impl<S> WindowStore for Arc<S>
where
    S: WindowStore + ?Sized,
{
    async fn record_and_count(
        &self,
        key: &ThrottleKey,
        now_millis: u64,
        window: Duration,
        ttl: Duration,
    ) -> Result<u64, StoreError> {
        (**self).record_and_count(key, now_millis, window, ttl).await
    }

    async fn refresh_expiry(&self, key: &ThrottleKey, ttl: Duration) -> Result<(), StoreError> {
        (**self).refresh_expiry(key, ttl).await
    }

    fn purge_expired(&self) -> usize {
        (**self).purge_expired()
    }
}

/// Oldest score still inside the window ending at `now`, exclusive. `None` while the window
/// reaches back past the epoch.
pub fn prune_cutoff(now_millis: u64, window: Duration) -> Option<u64> {
    now_millis.checked_sub(millis(window))
}

#[derive(Debug, Default)]
struct WindowTokens {
    stamps: VecDeque<u64>,
    // 0 = no expiry set
    expires_at: u64,
}

/// In-process sliding-window store.
///
/// Same semantics as the shared store, for single-instance deployments and tests. It can be
/// told to fail so the fallback path can be exercised without a network.
///
/// Idle keys are only dropped by [`WindowStore::purge_expired`]; the reaper returned by
/// [`Admission::reaper`](crate::Admission::reaper) calls it every cycle.
#[derive(Debug)]
pub struct InMemoryWindowStore {
    windows: DashMap<String, WindowTokens>,
    clock: Arc<dyn Clock>,
    unavailable: AtomicBool,
    fail_next: AtomicUsize,
    calls: AtomicUsize,
}

impl InMemoryWindowStore {
    pub fn new() -> Self {
        Self::with_clock(WallClock)
    }

    /// Use `clock` for key expiry.
    pub fn with_clock<C: Clock + 'static>(clock: C) -> Self {
        Self {
            windows: DashMap::new(),
            clock: Arc::new(clock),
            unavailable: AtomicBool::new(false),
            fail_next: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// Make every call fail with [`StoreErrorKind::Unavailable`](crate::StoreErrorKind) until
    /// switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fail the next `n` calls.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Total calls received, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of live tokens under `key`, ignoring expiry.
    pub fn tokens(&self, key: &ThrottleKey) -> usize {
        self.windows.get(key.as_str()).map_or(0, |w| w.stamps.len())
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("store marked unavailable"));
        }
        let failed = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(StoreError::unavailable("injected failure"));
        }
        Ok(())
    }
}

impl Default for InMemoryWindowStore {
    fn default() -> Self {
        Self::new()
    }
}

fn is_expired(w: &WindowTokens, now: u64) -> bool {
    w.expires_at != 0 && w.expires_at <= now
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[async_trait]
impl WindowStore for InMemoryWindowStore {
    async fn record_and_count(
        &self,
        key: &ThrottleKey,
        now_millis: u64,
        window: Duration,
        ttl: Duration,
    ) -> Result<u64, StoreError> {
        self.check_available()?;

        let mut entry = self.windows.entry(key.as_str().to_owned()).or_default();
        if is_expired(&entry, self.clock.now_millis()) {
            *entry = WindowTokens::default();
        }
        if let Some(cutoff) = prune_cutoff(now_millis, window) {
            while entry.stamps.front().is_some_and(|&ts| ts <= cutoff) {
                entry.stamps.pop_front();
            }
        }
        entry.stamps.push_back(now_millis);
        let expires_at = self.clock.now_millis().saturating_add(millis(ttl));
        entry.expires_at = entry.expires_at.max(expires_at);
        Ok(entry.stamps.len() as u64)
    }

    async fn refresh_expiry(&self, key: &ThrottleKey, ttl: Duration) -> Result<(), StoreError> {
        self.check_available()?;

        if let Some(mut entry) = self.windows.get_mut(key.as_str()) {
            entry.expires_at = self.clock.now_millis().saturating_add(millis(ttl)).max(1);
        }
        Ok(())
    }

    fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let before = self.windows.len();
        self.windows.retain(|_, w| !is_expired(w, now));
        before.saturating_sub(self.windows.len())
    }
}
