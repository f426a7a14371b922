use crate::clock::{Clock, WallClock};
use crate::config::ThrottleConfig;
use crate::decision::{decide, RateDecision};
use crate::error::StoreError;
use crate::headers;
use crate::identity::ClientIdentity;
use crate::rate_limit::fallback::FallbackCounter;
use crate::rate_limit::reaper::FallbackReaper;
use crate::rate_limit::store::WindowStore;
use crate::tier::{ThrottleKey, Tier, TierKind, TierSet};
use crate::timeout::TimeoutPolicy;
use http::{HeaderMap, Method};
use std::sync::Arc;

/// What the filter needs to know about an inbound request.
#[derive(Debug, Clone, Copy)]
pub struct AdmissionRequest<'a> {
    pub path: &'a str,
    pub method: &'a Method,
    pub identity: &'a ClientIdentity,
}

/// Which counter produced a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterSource {
    /// Sliding window in the shared store.
    Shared,
    /// Local fixed window, used because the shared store failed.
    Fallback,
}

/// A counted request's decision and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub decision: RateDecision,
    pub tier: TierKind,
    pub key: ThrottleKey,
    pub source: CounterSource,
}

/// Result of [`Admission::admit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionResult {
    /// Exempt path: forwarded untouched, nothing counted.
    Exempt,
    /// Within budget: forward and attach the decision headers.
    Forward(Verdict),
    /// Over budget: answer 429 with the decision headers, skip the handler.
    Reject(Verdict),
}

impl AdmissionResult {
    pub fn is_rejected(&self) -> bool {
        matches!(self, AdmissionResult::Reject(_))
    }

    pub fn verdict(&self) -> Option<&Verdict> {
        match self {
            AdmissionResult::Exempt => None,
            AdmissionResult::Forward(v) | AdmissionResult::Reject(v) => Some(v),
        }
    }

    /// Attach the rate-limit headers for this result. Exempt results add nothing.
    pub fn apply_headers(&self, target: &mut HeaderMap) {
        if let Some(v) = self.verdict() {
            headers::apply(&v.decision, target);
        }
    }
}

/// Per-request admission control.
///
/// Counts each non-exempt request exactly once: against the shared store when it answers in
/// time, otherwise against the local [`FallbackCounter`]. A store failure degrades
/// enforcement to per-instance but never fails the request.
///
/// ```rust
/// use std::sync::Arc;
/// use turnstile::{Admission, ThrottleConfig, FallbackCounter, InMemoryWindowStore};
///
/// let config = ThrottleConfig::builder().build().unwrap();
/// let fallback = Arc::new(FallbackCounter::new());
/// let admission = Admission::new(config, InMemoryWindowStore::new(), fallback);
/// assert!(admission.is_exempt("/health"));
/// ```
#[derive(Debug)]
pub struct Admission<S> {
    config: ThrottleConfig,
    tiers: TierSet,
    store: Arc<S>,
    fallback: Arc<FallbackCounter>,
    clock: Arc<dyn Clock>,
    timeout: TimeoutPolicy,
}

impl<S> Admission<S>
where
    S: WindowStore,
{
    pub fn new(config: ThrottleConfig, store: S, fallback: Arc<FallbackCounter>) -> Self {
        let timeout = TimeoutPolicy::new(config.store_timeout());
        Self {
            tiers: config.tiers(),
            config,
            store: Arc::new(store),
            fallback,
            clock: Arc::new(WallClock),
            timeout,
        }
    }

    /// Override the clock (useful for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn fallback(&self) -> &Arc<FallbackCounter> {
        &self.fallback
    }

    /// A reaper over this filter's fallback counter and store, on the same clock, at the
    /// configured interval. Spawn it at startup and shut it down with the server.
    pub fn reaper(&self) -> FallbackReaper
    where
        S: 'static,
    {
        let store: Arc<dyn WindowStore> = self.store.clone();
        FallbackReaper::new(self.fallback.clone(), self.clock.clone(), self.config.reap_interval())
            .with_store(store)
    }

    pub fn is_exempt(&self, path: &str) -> bool {
        self.config.is_exempt(path)
    }

    /// Tier and key a request would be counted under.
    pub fn classify(&self, path: &str, identity: &ClientIdentity) -> (Tier, ThrottleKey) {
        let kind = TierKind::classify(path, identity.authenticated, self.config.login_markers());
        let key = ThrottleKey::new(self.config.key_prefix(), kind, &identity.client_id);
        (self.tiers.get(kind), key)
    }

    /// Count the request and decide.
    pub async fn admit(&self, request: AdmissionRequest<'_>) -> AdmissionResult {
        if self.is_exempt(request.path) {
            return AdmissionResult::Exempt;
        }

        let (tier, key) = self.classify(request.path, request.identity);
        let now = self.clock.now_millis();

        let (count, source) = match self.count_shared(&key, &tier, now).await {
            Ok(count) => (count, CounterSource::Shared),
            Err(e) => {
                tracing::warn!(
                    target: "turnstile::admission",
                    key = %key,
                    tier = %tier.kind,
                    error = %e,
                    "counter store failed; using local fallback"
                );
                (self.fallback.increment_and_get(&key, now, tier.window), CounterSource::Fallback)
            }
        };

        let decision = decide(count, tier.limit, tier.window, now);
        let verdict = Verdict { decision, tier: tier.kind, key, source };
        if decision.admitted {
            AdmissionResult::Forward(verdict)
        } else {
            tracing::debug!(
                target: "turnstile::admission",
                key = %verdict.key,
                method = %request.method,
                path = request.path,
                count,
                limit = tier.limit,
                source = ?source,
                "request rejected"
            );
            AdmissionResult::Reject(verdict)
        }
    }

    async fn count_shared(
        &self,
        key: &ThrottleKey,
        tier: &Tier,
        now: u64,
    ) -> Result<u64, StoreError> {
        let ttl = self.config.key_ttl();
        let count = self
            .timeout
            .execute(self.store.record_and_count(key, now, tier.window, ttl))
            .await?;
        if count == 1 {
            // The token is already recorded; a failed TTL refresh must not count it twice.
            let refreshed = self.timeout.execute(self.store.refresh_expiry(key, ttl)).await;
            if let Err(e) = refreshed {
                tracing::warn!(
                    target: "turnstile::admission",
                    key = %key,
                    error = %e,
                    "failed to refresh counter expiry"
                );
            }
        }
        Ok(count)
    }
}
