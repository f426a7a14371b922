#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Turnstile
//!
//! Per-client, per-route request admission control for async Rust services.
//!
//! ## Features
//!
//! - **Three budget tiers**: login routes, authenticated callers and anonymous callers
//! - **Sliding windows** in a shared store so every replica enforces the same budget
//! - **Local fallback** counters when the shared store is slow or unreachable
//! - **Background reaper** that keeps fallback state bounded
//! - **Tower middleware** answering `429 Too Many Requests` with `X-RateLimit-*` and
//!   `Retry-After` headers
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use turnstile::{
//!     Admission, AdmissionRequest, ClientIdentity, FallbackCounter, InMemoryWindowStore,
//!     ThrottleConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ThrottleConfig::builder()
//!         .max_requests_anonymous(30)
//!         .window_seconds(60)
//!         .build()
//!         .unwrap();
//!     let admission =
//!         Admission::new(config, InMemoryWindowStore::new(), Arc::new(FallbackCounter::new()));
//!
//!     let identity = ClientIdentity::anonymous("203.0.113.5");
//!     let result = admission
//!         .admit(AdmissionRequest {
//!             path: "/api/v1/posts",
//!             method: &http::Method::GET,
//!             identity: &identity,
//!         })
//!         .await;
//!     assert_eq!(result.verdict().unwrap().decision.remaining, 29);
//! }
//! ```
//!
//! In a tower stack, wrap the service with [`AdmissionLayer`] and spawn the reaper next to
//! it:
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use turnstile::*;
//! # async fn run() {
//! let admission = Arc::new(Admission::new(
//!     ThrottleConfig::default(),
//!     InMemoryWindowStore::new(),
//!     Arc::new(FallbackCounter::new()),
//! ));
//! let reaper = admission.reaper().spawn();
//! let layer = AdmissionLayer::new(admission, ForwardedIdentity);
//! // ServiceBuilder::new().layer(layer).service(app) ...
//! # drop(layer);
//! reaper.shutdown().await;
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod decision;
pub mod error;
pub mod headers;
pub mod identity;
pub mod rate_limit;
pub mod tier;
pub mod timeout;

// Re-exports
pub use clock::{Clock, ManualClock, WallClock};
#[cfg(feature = "serde")]
pub use config::ThrottleConfigFile;
pub use config::{ThrottleConfig, ThrottleConfigBuilder};
pub use decision::{decide, RateDecision};
pub use error::{ConfigError, StoreError, StoreErrorKind};
pub use identity::{AuthenticatedPrincipal, ClientIdentity, ForwardedIdentity, IdentityResolver};
pub use rate_limit::{
    Admission, AdmissionLayer, AdmissionRequest, AdmissionResult, AdmissionService,
    CounterSource, FallbackCounter, FallbackEntry, FallbackReaper, InMemoryWindowStore,
    ReaperHandle, Verdict, WindowStore,
};
pub use tier::{ThrottleKey, Tier, TierKind, TierSet};
pub use timeout::TimeoutPolicy;
