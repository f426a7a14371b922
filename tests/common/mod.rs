#![allow(dead_code)]

use http::{Request, Response};
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower::util::BoxCloneService;
use tower::{service_fn, Layer, ServiceExt};
use turnstile::{
    Admission, AdmissionLayer, FallbackCounter, ForwardedIdentity, InMemoryWindowStore,
    ManualClock, ThrottleConfig, WindowStore,
};

pub type TestService = BoxCloneService<Request<String>, Response<String>, Infallible>;

pub const CLIENT_IP: &str = "203.0.113.5";
pub const START: u64 = 1_700_000_000_000;

pub fn admission<S: WindowStore>(
    config: ThrottleConfig,
    store: S,
    clock: &ManualClock,
) -> Arc<Admission<S>> {
    Arc::new(
        Admission::new(config, store, Arc::new(FallbackCounter::new())).with_clock(clock.clone()),
    )
}

pub fn memory_store(clock: &ManualClock) -> Arc<InMemoryWindowStore> {
    Arc::new(InMemoryWindowStore::with_clock(clock.clone()))
}

/// Wrap an "ok" handler that counts how often it runs.
pub fn service<S: WindowStore + 'static>(
    admission: Arc<Admission<S>>,
) -> (TestService, Arc<AtomicUsize>) {
    let handled = Arc::new(AtomicUsize::new(0));
    let counter = handled.clone();
    let inner = service_fn(move |_req: Request<String>| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Ok::<_, Infallible>(Response::new(String::from("ok"))) }
    });
    let svc = AdmissionLayer::new(admission, ForwardedIdentity).layer(inner);
    (BoxCloneService::new(svc), handled)
}

pub fn request(path: &str, ip: &str) -> Request<String> {
    Request::get(path).header("x-real-ip", ip).body(String::new()).unwrap()
}

pub async fn send(svc: &TestService, req: Request<String>) -> Response<String> {
    svc.clone().oneshot(req).await.unwrap()
}

pub fn header<'a>(res: &'a Response<String>, name: &str) -> Option<&'a str> {
    res.headers().get(name).map(|v| v.to_str().unwrap())
}
