mod common;

use common::*;
use http::{Extensions, HeaderMap, Request, Response, StatusCode};
use std::convert::Infallible;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tower::util::BoxCloneService;
use tower::Layer;
use turnstile::{
    AdmissionLayer, AuthenticatedPrincipal, ClientIdentity, Clock, ManualClock, ThrottleConfig,
};

#[tokio::test]
async fn anonymous_client_gets_thirty_per_minute() {
    let clock = ManualClock::new(START);
    let admission = admission(ThrottleConfig::default(), memory_store(&clock), &clock);
    let (svc, handled) = service(admission);

    for expected_remaining in (0..30u64).rev() {
        let res = send(&svc, request("/api/v1/posts", CLIENT_IP)).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(header(&res, "x-ratelimit-limit"), Some("30"));
        let remaining = expected_remaining.to_string();
        assert_eq!(header(&res, "x-ratelimit-remaining"), Some(remaining.as_str()));
        assert_eq!(header(&res, "retry-after"), None);
        clock.advance(Duration::from_millis(100));
    }

    let res = send(&svc, request("/api/v1/posts", CLIENT_IP)).await;
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header(&res, "x-ratelimit-limit"), Some("30"));
    assert_eq!(header(&res, "x-ratelimit-remaining"), Some("0"));
    assert_eq!(header(&res, "retry-after"), Some("60"));
    let reset = (clock.now_millis() + 60_000).to_string();
    assert_eq!(header(&res, "x-ratelimit-reset"), Some(reset.as_str()));
    assert!(res.body().is_empty());
    assert_eq!(handled.load(Ordering::SeqCst), 30);
}

#[tokio::test]
async fn window_slides_instead_of_resetting() {
    let clock = ManualClock::new(START);
    let config = ThrottleConfig::builder().max_requests_anonymous(5).build().unwrap();
    let (svc, _) = service(admission(config, memory_store(&clock), &clock));

    for _ in 0..5 {
        assert_eq!(send(&svc, request("/api", CLIENT_IP)).await.status(), StatusCode::OK);
    }
    let res = send(&svc, request("/api", CLIENT_IP)).await;
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);

    clock.advance(Duration::from_secs(60));
    let res = send(&svc, request("/api", CLIENT_IP)).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(header(&res, "x-ratelimit-remaining"), Some("4"));
}

#[tokio::test]
async fn rejected_requests_still_consume_the_window() {
    let clock = ManualClock::new(START);
    let config = ThrottleConfig::builder().max_requests_anonymous(2).build().unwrap();
    let (svc, _) = service(admission(config, memory_store(&clock), &clock));

    send(&svc, request("/api", CLIENT_IP)).await;
    send(&svc, request("/api", CLIENT_IP)).await;
    clock.advance(Duration::from_secs(30));
    // counted, even though rejected
    let res = send(&svc, request("/api", CLIENT_IP)).await;
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);

    // the first two age out; the rejected one is still in the window
    clock.advance(Duration::from_secs(30));
    let res = send(&svc, request("/api", CLIENT_IP)).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(header(&res, "x-ratelimit-remaining"), Some("0"));
}

#[tokio::test]
async fn clients_have_separate_budgets() {
    let clock = ManualClock::new(START);
    let config = ThrottleConfig::builder().max_requests_anonymous(1).build().unwrap();
    let (svc, _) = service(admission(config, memory_store(&clock), &clock));

    assert_eq!(send(&svc, request("/api", "198.51.100.1")).await.status(), StatusCode::OK);
    assert_eq!(
        send(&svc, request("/api", "198.51.100.1")).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
    assert_eq!(send(&svc, request("/api", "198.51.100.2")).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn login_and_general_budgets_do_not_interfere() {
    let clock = ManualClock::new(START);
    let config = ThrottleConfig::builder()
        .max_requests_login(3)
        .max_requests_anonymous(30)
        .build()
        .unwrap();
    let (svc, _) = service(admission(config, memory_store(&clock), &clock));

    for _ in 0..3 {
        let res = send(&svc, request("/auth/login", CLIENT_IP)).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(header(&res, "x-ratelimit-limit"), Some("3"));
    }
    let res = send(&svc, request("/auth/login", CLIENT_IP)).await;
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);

    // exhausted login budget leaves the general budget intact
    let res = send(&svc, request("/api/v1/posts", CLIENT_IP)).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(header(&res, "x-ratelimit-remaining"), Some("29"));

    // and general traffic never touched the login count
    clock.advance(Duration::from_secs(60));
    let res = send(&svc, request("/Auth/Login", CLIENT_IP)).await;
    assert_eq!(header(&res, "x-ratelimit-limit"), Some("3"));
    assert_eq!(header(&res, "x-ratelimit-remaining"), Some("2"));
}

#[tokio::test]
async fn authenticated_callers_get_the_larger_budget() {
    let clock = ManualClock::new(START);
    let (svc, _) = service(admission(ThrottleConfig::default(), memory_store(&clock), &clock));

    let req = Request::get("/api/v1/posts")
        .header("x-real-ip", CLIENT_IP)
        .extension(AuthenticatedPrincipal)
        .body(String::new())
        .unwrap();
    let res = send(&svc, req).await;
    assert_eq!(header(&res, "x-ratelimit-limit"), Some("100"));
    assert_eq!(header(&res, "x-ratelimit-remaining"), Some("99"));

    // the same client without a principal is counted separately
    let res = send(&svc, request("/api/v1/posts", CLIENT_IP)).await;
    assert_eq!(header(&res, "x-ratelimit-limit"), Some("30"));
    assert_eq!(header(&res, "x-ratelimit-remaining"), Some("29"));
}

#[tokio::test]
async fn health_check_paths_are_never_counted() {
    let clock = ManualClock::new(START);
    let store = memory_store(&clock);
    let config = ThrottleConfig::builder().max_requests_anonymous(1).build().unwrap();
    let admission = admission(config, store.clone(), &clock);
    let (svc, handled) = service(admission.clone());

    for path in ["/health", "/healthz", "/livez", "/readyz", "/actuator/health", "/health/db"] {
        for _ in 0..10 {
            let res = send(&svc, request(path, CLIENT_IP)).await;
            assert_eq!(res.status(), StatusCode::OK);
            assert_eq!(header(&res, "x-ratelimit-limit"), None);
        }
    }
    assert_eq!(handled.load(Ordering::SeqCst), 60);
    assert_eq!(store.calls(), 0);
    assert!(admission.fallback().is_empty());

    // lookalike path is not exempt
    let res = send(&svc, request("/healthcheck-bypass", CLIENT_IP)).await;
    assert_eq!(header(&res, "x-ratelimit-remaining"), Some("0"));
}

#[tokio::test]
async fn custom_resolver_keys_by_user() {
    let clock = ManualClock::new(START);
    let config = ThrottleConfig::builder().max_requests_authenticated(1).build().unwrap();
    let admission = admission(config, memory_store(&clock), &clock);
    let resolver = |headers: &HeaderMap, _: &Extensions| {
        let user = headers.get("x-user").and_then(|v| v.to_str().ok()).unwrap_or("nobody");
        ClientIdentity::authenticated(user)
    };
    let inner = tower::service_fn(|_req: Request<String>| async {
        Ok::<_, Infallible>(Response::new(String::new()))
    });
    let svc: TestService =
        BoxCloneService::new(AdmissionLayer::new(Arc::clone(&admission), resolver).layer(inner));

    let as_user = |user: &'static str| {
        Request::get("/api").header("x-user", user).body(String::new()).unwrap()
    };
    assert_eq!(send(&svc, as_user("alice")).await.status(), StatusCode::OK);
    assert_eq!(send(&svc, as_user("alice")).await.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(send(&svc, as_user("bob")).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn concurrent_requests_are_each_counted_once() {
    let clock = ManualClock::new(START);
    let store = memory_store(&clock);
    let (svc, handled) = service(admission(ThrottleConfig::default(), store.clone(), &clock));

    let responses = futures::future::join_all(
        (0..45).map(|_| send(&svc, request("/api/v1/posts", CLIENT_IP))),
    )
    .await;

    let admitted = responses.iter().filter(|r| r.status() == StatusCode::OK).count();
    assert_eq!(admitted, 30);
    assert_eq!(handled.load(Ordering::SeqCst), 30);
    let key = turnstile::ThrottleKey::new("rate_limit", turnstile::TierKind::Anonymous, CLIENT_IP);
    assert_eq!(store.tokens(&key), 45);
}
