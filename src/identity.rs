//! Who is calling.
//!
//! Authentication itself happens upstream. The throttle only needs a stable client id and
//! whether a principal was established; [`IdentityResolver`] is the seam where a deployment
//! plugs in its own notion of both.

use http::{Extensions, HeaderMap};
use std::net::{IpAddr, SocketAddr};

/// Client id used when nothing usable identifies the caller.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Resolved caller identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub client_id: String,
    pub authenticated: bool,
}

impl ClientIdentity {
    pub fn anonymous(client_id: impl Into<String>) -> Self {
        Self { client_id: client_id.into(), authenticated: false }
    }

    pub fn authenticated(client_id: impl Into<String>) -> Self {
        Self { client_id: client_id.into(), authenticated: true }
    }
}

/// Marker an upstream authentication layer inserts into request extensions once it has
/// established a principal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuthenticatedPrincipal;

/// Derives a [`ClientIdentity`] from request metadata.
pub trait IdentityResolver: Send + Sync + 'static {
    fn resolve(&self, headers: &HeaderMap, extensions: &Extensions) -> ClientIdentity;
}

impl<F> IdentityResolver for F
where
    F: Fn(&HeaderMap, &Extensions) -> ClientIdentity + Send + Sync + 'static,
{
    fn resolve(&self, headers: &HeaderMap, extensions: &Extensions) -> ClientIdentity {
        self(headers, extensions)
    }
}

/// Resolver for services behind a trusted reverse proxy.
///
/// Takes the first `X-Forwarded-For` hop, then `X-Real-IP`, then a [`SocketAddr`] request
/// extension (the peer address, if the server recorded it). Only deploy this where the
/// proxy overwrites those headers; otherwise clients pick their own id.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForwardedIdentity;

impl IdentityResolver for ForwardedIdentity {
    fn resolve(&self, headers: &HeaderMap, extensions: &Extensions) -> ClientIdentity {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(parse_ip);
        let real_ip =
            || headers.get("x-real-ip").and_then(|v| v.to_str().ok()).and_then(parse_ip);
        let peer = || extensions.get::<SocketAddr>().map(|addr| addr.ip());

        let client_id = forwarded
            .or_else(real_ip)
            .or_else(peer)
            .map(|ip| normalize_ip(ip).to_string())
            .unwrap_or_else(|| UNKNOWN_CLIENT.to_string());

        ClientIdentity {
            client_id,
            authenticated: extensions.get::<AuthenticatedPrincipal>().is_some(),
        }
    }
}

fn parse_ip(raw: &str) -> Option<IpAddr> {
    let raw = raw.trim();
    raw.parse::<IpAddr>()
        .ok()
        .or_else(|| raw.parse::<SocketAddr>().ok().map(|addr| addr.ip()))
}

/// Collapse IPv4-mapped IPv6 (`::ffff:a.b.c.d`) to plain IPv4 so dual-stack listeners
/// don't give one client two budgets.
pub fn normalize_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(IpAddr::V6(v6)),
        v4 => v4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn first_forwarded_hop_wins() {
        let h = headers(&[
            ("x-forwarded-for", "203.0.113.5, 10.0.0.1"),
            ("x-real-ip", "198.51.100.7"),
        ]);
        let id = ForwardedIdentity.resolve(&h, &Extensions::new());
        assert_eq!(id, ClientIdentity::anonymous("203.0.113.5"));
    }

    #[test]
    fn falls_back_to_real_ip_then_peer() {
        let h = headers(&[("x-forwarded-for", "garbage"), ("x-real-ip", "198.51.100.7")]);
        assert_eq!(ForwardedIdentity.resolve(&h, &Extensions::new()).client_id, "198.51.100.7");

        let mut ext = Extensions::new();
        ext.insert("192.0.2.9:5555".parse::<SocketAddr>().unwrap());
        assert_eq!(ForwardedIdentity.resolve(&HeaderMap::new(), &ext).client_id, "192.0.2.9");
    }

    #[test]
    fn unknown_when_nothing_identifies_caller() {
        let id = ForwardedIdentity.resolve(&HeaderMap::new(), &Extensions::new());
        assert_eq!(id.client_id, UNKNOWN_CLIENT);
    }

    #[test]
    fn mapped_ipv6_is_normalized() {
        let h = headers(&[("x-forwarded-for", "::ffff:203.0.113.5")]);
        assert_eq!(ForwardedIdentity.resolve(&h, &Extensions::new()).client_id, "203.0.113.5");
    }

    #[test]
    fn principal_extension_marks_authenticated() {
        let mut ext = Extensions::new();
        ext.insert(AuthenticatedPrincipal);
        let h = headers(&[("x-real-ip", "203.0.113.5")]);
        assert!(ForwardedIdentity.resolve(&h, &ext).authenticated);
    }

    #[test]
    fn closures_are_resolvers() {
        let fixed = |_: &HeaderMap, _: &Extensions| ClientIdentity::authenticated("tenant-7");
        assert_eq!(fixed.resolve(&HeaderMap::new(), &Extensions::new()).client_id, "tenant-7");
    }
}
