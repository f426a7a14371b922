//! Process-wide throttle configuration.
//!
//! Built once at startup through [`ThrottleConfig::builder`] and shared read-only afterwards.
//! Validation happens in [`ThrottleConfigBuilder::build`]; a service should propagate the
//! [`ConfigError`] and refuse to start rather than run with a silently wrong limit.
//!
//! ```rust
//! use turnstile::ThrottleConfig;
//!
//! let config = ThrottleConfig::builder()
//!     .max_requests_anonymous(20)
//!     .window_seconds(30)
//!     .build()
//!     .unwrap();
//! assert_eq!(config.max_requests_anonymous(), 20);
//! ```

use crate::error::ConfigError;
use crate::tier::TierSet;
use std::time::Duration;

pub const DEFAULT_MAX_REQUESTS_AUTHENTICATED: u64 = 100;
pub const DEFAULT_MAX_REQUESTS_ANONYMOUS: u64 = 30;
pub const DEFAULT_MAX_REQUESTS_LOGIN: u64 = 10;
pub const DEFAULT_WINDOW_SECONDS: u64 = 60;
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(250);
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_EXPIRY_GRACE: Duration = Duration::from_secs(1);
pub const DEFAULT_KEY_PREFIX: &str = "rate_limit";

const DEFAULT_EXEMPT_PATHS: &[&str] =
    &["/health", "/healthz", "/livez", "/readyz", "/actuator/health"];
const DEFAULT_LOGIN_MARKERS: &[&str] = &["login", "forgot-password", "reset-password"];

/// Validated, immutable throttle configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleConfig {
    max_requests_authenticated: u64,
    max_requests_anonymous: u64,
    max_requests_login: u64,
    window_seconds: u64,
    exempt_paths: Vec<String>,
    login_markers: Vec<String>,
    store_timeout: Duration,
    reap_interval: Duration,
    expiry_grace: Duration,
    key_prefix: String,
}

impl ThrottleConfig {
    /// Start from the defaults.
    pub fn builder() -> ThrottleConfigBuilder {
        ThrottleConfigBuilder::new()
    }

    pub fn max_requests_authenticated(&self) -> u64 {
        self.max_requests_authenticated
    }

    pub fn max_requests_anonymous(&self) -> u64 {
        self.max_requests_anonymous
    }

    pub fn max_requests_login(&self) -> u64 {
        self.max_requests_login
    }

    pub fn window_seconds(&self) -> u64 {
        self.window_seconds
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }

    pub fn exempt_paths(&self) -> &[String] {
        &self.exempt_paths
    }

    pub fn login_markers(&self) -> &[String] {
        &self.login_markers
    }

    /// Bound on each call into the shared store.
    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    /// How often the fallback reaper sweeps.
    pub fn reap_interval(&self) -> Duration {
        self.reap_interval
    }

    /// TTL given to a shared-store key: one window plus a grace period.
    pub fn key_ttl(&self) -> Duration {
        self.window() + self.expiry_grace
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    pub fn tiers(&self) -> TierSet {
        TierSet::new(
            self.max_requests_login,
            self.max_requests_authenticated,
            self.max_requests_anonymous,
            self.window(),
        )
    }

    /// Exact match, or prefix match on a path-segment boundary (`/health` covers
    /// `/health/db` but not `/healthcheck-bypass`).
    pub fn is_exempt(&self, path: &str) -> bool {
        self.exempt_paths.iter().any(|exempt| {
            path == exempt
                || path
                    .strip_prefix(exempt.as_str())
                    .is_some_and(|rest| exempt.ends_with('/') || rest.starts_with('/'))
        })
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        ThrottleConfigBuilder::new().unchecked()
    }
}

/// Builder for [`ThrottleConfig`].
#[derive(Debug, Clone)]
pub struct ThrottleConfigBuilder {
    max_requests_authenticated: u64,
    max_requests_anonymous: u64,
    max_requests_login: u64,
    window_seconds: u64,
    exempt_paths: Vec<String>,
    login_markers: Vec<String>,
    store_timeout: Duration,
    reap_interval: Duration,
    expiry_grace: Duration,
    key_prefix: String,
}

impl ThrottleConfigBuilder {
    /// Create a builder with the documented defaults.
    pub fn new() -> Self {
        Self {
            max_requests_authenticated: DEFAULT_MAX_REQUESTS_AUTHENTICATED,
            max_requests_anonymous: DEFAULT_MAX_REQUESTS_ANONYMOUS,
            max_requests_login: DEFAULT_MAX_REQUESTS_LOGIN,
            window_seconds: DEFAULT_WINDOW_SECONDS,
            exempt_paths: DEFAULT_EXEMPT_PATHS.iter().map(|p| p.to_string()).collect(),
            login_markers: DEFAULT_LOGIN_MARKERS.iter().map(|m| m.to_string()).collect(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
            reap_interval: DEFAULT_REAP_INTERVAL,
            expiry_grace: DEFAULT_EXPIRY_GRACE,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }

    pub fn max_requests_authenticated(mut self, limit: u64) -> Self {
        self.max_requests_authenticated = limit;
        self
    }

    pub fn max_requests_anonymous(mut self, limit: u64) -> Self {
        self.max_requests_anonymous = limit;
        self
    }

    pub fn max_requests_login(mut self, limit: u64) -> Self {
        self.max_requests_login = limit;
        self
    }

    pub fn window_seconds(mut self, seconds: u64) -> Self {
        self.window_seconds = seconds;
        self
    }

    /// Replace the exempt path list.
    pub fn exempt_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exempt_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the substrings that route a path to the login tier. Matched case-insensitively.
    pub fn login_markers<I, S>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.login_markers = markers.into_iter().map(|m| m.into().to_ascii_lowercase()).collect();
        self
    }

    pub fn store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }

    pub fn expiry_grace(mut self, grace: Duration) -> Self {
        self.expiry_grace = grace;
        self
    }

    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Build the configuration, validating inputs.
    pub fn build(self) -> Result<ThrottleConfig, ConfigError> {
        for (tier, limit) in [
            ("login", self.max_requests_login),
            ("authenticated", self.max_requests_authenticated),
            ("anonymous", self.max_requests_anonymous),
        ] {
            if limit == 0 {
                return Err(ConfigError::ZeroLimit { tier });
            }
        }
        if self.window_seconds == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if self.store_timeout.is_zero() {
            return Err(ConfigError::ZeroStoreTimeout);
        }
        if self.reap_interval.is_zero() {
            return Err(ConfigError::ZeroReapInterval);
        }
        if self.exempt_paths.iter().any(|p| p.is_empty()) {
            return Err(ConfigError::EmptyExemptPath);
        }
        if self.key_prefix.is_empty()
            || self.key_prefix.contains(':')
            || self.key_prefix.chars().any(char::is_whitespace)
        {
            return Err(ConfigError::InvalidKeyPrefix(self.key_prefix));
        }
        Ok(self.unchecked())
    }

    fn unchecked(self) -> ThrottleConfig {
        ThrottleConfig {
            max_requests_authenticated: self.max_requests_authenticated,
            max_requests_anonymous: self.max_requests_anonymous,
            max_requests_login: self.max_requests_login,
            window_seconds: self.window_seconds,
            exempt_paths: self.exempt_paths,
            login_markers: self.login_markers,
            store_timeout: self.store_timeout,
            reap_interval: self.reap_interval,
            expiry_grace: self.expiry_grace,
            key_prefix: self.key_prefix,
        }
    }
}

impl Default for ThrottleConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// On-disk / environment shape of the configuration, using the externally documented
/// option names. Missing fields take the defaults.
#[cfg(feature = "serde")]
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ThrottleConfigFile {
    pub max_requests_authenticated: Option<u64>,
    pub max_requests_anonymous: Option<u64>,
    pub max_requests_login: Option<u64>,
    pub window_seconds: Option<u64>,
    pub exempt_paths: Option<Vec<String>>,
    pub login_markers: Option<Vec<String>>,
    pub store_timeout_millis: Option<u64>,
    pub reap_interval_seconds: Option<u64>,
    pub expiry_grace_millis: Option<u64>,
    pub key_prefix: Option<String>,
}

#[cfg(feature = "serde")]
impl TryFrom<ThrottleConfigFile> for ThrottleConfig {
    type Error = ConfigError;

    fn try_from(file: ThrottleConfigFile) -> Result<Self, Self::Error> {
        let mut builder = ThrottleConfig::builder();
        if let Some(v) = file.max_requests_authenticated {
            builder = builder.max_requests_authenticated(v);
        }
        if let Some(v) = file.max_requests_anonymous {
            builder = builder.max_requests_anonymous(v);
        }
        if let Some(v) = file.max_requests_login {
            builder = builder.max_requests_login(v);
        }
        if let Some(v) = file.window_seconds {
            builder = builder.window_seconds(v);
        }
        if let Some(v) = file.exempt_paths {
            builder = builder.exempt_paths(v);
        }
        if let Some(v) = file.login_markers {
            builder = builder.login_markers(v);
        }
        if let Some(v) = file.store_timeout_millis {
            builder = builder.store_timeout(Duration::from_millis(v));
        }
        if let Some(v) = file.reap_interval_seconds {
            builder = builder.reap_interval(Duration::from_secs(v));
        }
        if let Some(v) = file.expiry_grace_millis {
            builder = builder.expiry_grace(Duration::from_millis(v));
        }
        if let Some(v) = file.key_prefix {
            builder = builder.key_prefix(v);
        }
        builder.build()
    }
}
