//! Admission control.
//!
//! The building blocks:
//! - [`WindowStore`]: sliding-window counters in a store shared by every replica.
//! - [`FallbackCounter`]: local fixed-window counters used while that store is failing.
//! - [`FallbackReaper`]: background task that drops expired fallback entries.
//! - [`Admission`]: counts a request once and turns the count into a decision.
//! - [`AdmissionLayer`]: tower middleware that rejects with 429 and writes the headers.
//!
//! # Architecture
//!
//! - **Middleware** resolves who is calling and asks `Admission`; it knows nothing about
//!   counting.
//! - **Admission** picks the tier, builds the key and bounds every store call with a
//!   timeout. Any store failure, timeouts included, is absorbed by the fallback counter.
//! - **Storage** sits behind `WindowStore`, so the in-process store and the Redis store
//!   (`turnstile-redis`) are interchangeable.

pub mod admission;
pub mod fallback;
pub mod middleware;
pub mod reaper;
pub mod store;

pub use admission::{Admission, AdmissionRequest, AdmissionResult, CounterSource, Verdict};
pub use fallback::{FallbackCounter, FallbackEntry};
pub use middleware::{AdmissionLayer, AdmissionService};
pub use reaper::{FallbackReaper, ReaperHandle};
pub use store::{InMemoryWindowStore, WindowStore};
