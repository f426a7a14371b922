use crate::tier::ThrottleKey;
use dashmap::DashMap;
use std::time::Duration;

/// One fixed-window counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackEntry {
    pub count: u64,
    pub window_expires_at: u64,
}

impl FallbackEntry {
    fn fresh(now_millis: u64, window: Duration) -> Self {
        let window_millis = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        Self { count: 1, window_expires_at: now_millis.saturating_add(window_millis) }
    }

    pub fn is_expired(&self, now_millis: u64) -> bool {
        self.window_expires_at <= now_millis
    }
}

/// Local counters used while the shared store is unreachable.
///
/// Fixed windows rather than sliding ones: this only runs in degraded mode, where one
/// integer per key is worth more than exact enforcement. Each key is updated under its own
/// shard lock, so concurrent requests never lose increments and unrelated keys rarely
/// contend.
///
/// Owned by whoever wires the service together and shared by `Arc` with the admission filter
/// and the reaper; there is no global instance.
#[derive(Debug, Default)]
pub struct FallbackCounter {
    entries: DashMap<String, FallbackEntry>,
}

impl FallbackCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one request against `key` and return the count for the current window.
    ///
    /// A missing or expired entry is replaced by a fresh window starting at `now_millis`.
    pub fn increment_and_get(&self, key: &ThrottleKey, now_millis: u64, window: Duration) -> u64 {
        let mut entry = self
            .entries
            .entry(key.as_str().to_owned())
            .or_insert_with(|| FallbackEntry { count: 0, window_expires_at: 0 });
        if entry.count == 0 || entry.is_expired(now_millis) {
            *entry = FallbackEntry::fresh(now_millis, window);
        } else {
            entry.count = entry.count.saturating_add(1);
        }
        entry.count
    }

    /// Remove every entry whose window has passed. Returns how many were removed.
    ///
    /// Candidates are collected first and each is removed under its own short lock, re-checked
    /// at removal time so a window renewed in between survives.
    ///
    /// The collection pass read-locks one shard at a time for the length of that shard's scan.
    /// An increment on a key in the shard being scanned waits for at most that scan; keys in
    /// every other shard are never blocked.
    pub fn purge_expired(&self, now_millis: u64) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.value().is_expired(now_millis))
            .map(|e| e.key().clone())
            .collect();

        expired
            .into_iter()
            .filter(|key| self.entries.remove_if(key, |_, e| e.is_expired(now_millis)).is_some())
            .count()
    }

    pub fn get(&self, key: &ThrottleKey) -> Option<FallbackEntry> {
        self.entries.get(key.as_str()).map(|e| *e.value())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
