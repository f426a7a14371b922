//! Redis sliding-window store for `turnstile` (companion crate).
//!
//! Each throttle key is a sorted set with one member per counted request, scored by its
//! timestamp in epoch millis. Prune, insert, count and expiry go out as one `MULTI`/`EXEC`
//! pipeline, so concurrent replicas never interleave inside a single admission.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::RedisError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use turnstile::rate_limit::store::prune_cutoff;
use turnstile::{StoreError, StoreErrorKind, ThrottleKey, WindowStore};

#[derive(Clone)]
pub struct RedisWindowStore {
    client: Option<redis::Client>,
    manager: Arc<OnceCell<ConnectionManager>>,
}

impl std::fmt::Debug for RedisWindowStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisWindowStore")
            .field("manager", &"<redis::aio::ConnectionManager>")
            .field("connected", &self.manager.initialized())
            .finish()
    }
}

impl RedisWindowStore {
    /// Open a managed connection to `url` and check it with `PING`.
    ///
    /// Fails when the server is unreachable. A replica that must start during a store outage
    /// should use [`open`](Self::open) instead.
    ///
    /// # Errors
    /// Returns `Err` if the URL is invalid or the server does not answer.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(map_redis_error)?;
        let manager = ConnectionManager::new(client).await.map_err(|e| {
            tracing::warn!(target: "turnstile::redis", error = %e, "failed to connect to redis");
            map_redis_error(e)
        })?;

        let mut conn = manager.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await.map_err(map_redis_error)?;

        tracing::debug!(target: "turnstile::redis", "connected to redis");
        Ok(Self::new(manager))
    }

    /// Parse `url` without touching the network. The connection is made by the first store
    /// call; until it succeeds every call fails as unavailable and the admission filter
    /// counts locally.
    ///
    /// # Errors
    /// Returns `Err` only if the URL is invalid.
    pub fn open(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(map_redis_error)?;
        Ok(Self { client: Some(client), manager: Arc::new(OnceCell::new()) })
    }

    /// Use an existing connection manager.
    pub fn new(manager: ConnectionManager) -> Self {
        Self { client: None, manager: Arc::new(OnceCell::new_with(Some(manager))) }
    }

    /// Whether a connection has been established.
    pub fn is_connected(&self) -> bool {
        self.manager.initialized()
    }

    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        let manager = self
            .manager
            .get_or_try_init(|| async {
                let client = self
                    .client
                    .clone()
                    .ok_or_else(|| StoreError::unavailable("no redis client configured"))?;
                let manager = ConnectionManager::new(client).await.map_err(|e| {
                    StoreError::unavailable(format!("redis connection failed: {e}"))
                })?;
                tracing::info!(target: "turnstile::redis", "connected to redis");
                Ok::<_, StoreError>(manager)
            })
            .await?;
        Ok(manager.clone())
    }
}

#[async_trait]
impl WindowStore for RedisWindowStore {
    async fn record_and_count(
        &self,
        key: &ThrottleKey,
        now_millis: u64,
        window: Duration,
        ttl: Duration,
    ) -> Result<u64, StoreError> {
        let mut conn = self.connection().await?;
        // Two requests in the same millisecond still need two members.
        let member = format!("{}-{}", now_millis, uuid::Uuid::new_v4());

        let mut pipe = redis::pipe();
        pipe.atomic();
        if let Some(cutoff) = prune_cutoff(now_millis, window) {
            pipe.cmd("ZREMRANGEBYSCORE").arg(key.as_str()).arg("-inf").arg(cutoff).ignore();
        }
        pipe.cmd("ZADD")
            .arg(key.as_str())
            .arg(now_millis)
            .arg(&member)
            .ignore()
            .cmd("ZCARD")
            .arg(key.as_str())
            .cmd("PEXPIRE")
            .arg(key.as_str())
            .arg(millis(ttl))
            .ignore();

        let (count,): (u64,) = pipe.query_async(&mut conn).await.map_err(map_redis_error)?;
        Ok(count)
    }

    async fn refresh_expiry(&self, key: &ThrottleKey, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        redis::cmd("PEXPIRE")
            .arg(key.as_str())
            .arg(millis(ttl))
            .query_async::<i64>(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Sort a client error into the store's failure kinds.
pub fn map_redis_error(e: RedisError) -> StoreError {
    if e.is_timeout() {
        StoreError::new(StoreErrorKind::Timeout, e.to_string())
    } else if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() {
        StoreError::unavailable(e.to_string())
    } else {
        StoreError::protocol(e.to_string())
    }
}
