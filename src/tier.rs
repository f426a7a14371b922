//! Rate-limit tiers and the keys that address their counters.

use std::fmt;
use std::time::Duration;

/// Which policy applies to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TierKind {
    /// Login, password reset and forgot-password routes. Strictest budget.
    Login,
    /// Callers with an authenticated principal.
    Authenticated,
    /// Everyone else.
    Anonymous,
}

impl TierKind {
    /// Stable name used in throttle keys and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            TierKind::Login => "login",
            TierKind::Authenticated => "authenticated",
            TierKind::Anonymous => "anonymous",
        }
    }

    /// Pick the tier for a request.
    ///
    /// Sensitive routes win over authentication state: an authenticated caller hammering
    /// the password-reset route still draws from the login budget.
    pub fn classify(path: &str, authenticated: bool, login_markers: &[String]) -> Self {
        let path = path.to_ascii_lowercase();
        if login_markers.iter().any(|m| path.contains(m.as_str())) {
            TierKind::Login
        } else if authenticated {
            TierKind::Authenticated
        } else {
            TierKind::Anonymous
        }
    }
}

impl fmt::Display for TierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named limit over a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tier {
    pub kind: TierKind,
    pub limit: u64,
    pub window: Duration,
}

impl Tier {
    pub fn name(&self) -> &'static str {
        self.kind.as_str()
    }

    pub fn window_millis(&self) -> u64 {
        u64::try_from(self.window.as_millis()).unwrap_or(u64::MAX)
    }
}

/// The three tiers, resolved once from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierSet {
    login: Tier,
    authenticated: Tier,
    anonymous: Tier,
}

impl TierSet {
    pub fn new(login: u64, authenticated: u64, anonymous: u64, window: Duration) -> Self {
        Self {
            login: Tier { kind: TierKind::Login, limit: login, window },
            authenticated: Tier { kind: TierKind::Authenticated, limit: authenticated, window },
            anonymous: Tier { kind: TierKind::Anonymous, limit: anonymous, window },
        }
    }

    pub fn get(&self, kind: TierKind) -> Tier {
        match kind {
            TierKind::Login => self.login,
            TierKind::Authenticated => self.authenticated,
            TierKind::Anonymous => self.anonymous,
        }
    }
}

/// Identifier of one counter: `{prefix}:{tier}:{client}`.
///
/// The tier segment sits before the client segment and tier names never contain `:`, so two
/// tiers can never address the same counter even when the client id (an IPv6 address, say)
/// contains colons.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThrottleKey(String);

impl ThrottleKey {
    pub fn new(prefix: &str, tier: TierKind, client_id: &str) -> Self {
        Self(format!("{}:{}:{}", prefix, tier.as_str(), client_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThrottleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ThrottleKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
