//! Platform API wrapper: rate limiting, token attachment, and the retry policy.

mod common;

use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::expiring_in;
use social_auth::client::{PlatformClient, RequestOptions};
use social_auth::providers::{ProviderRegistry, YouTubeProvider};
use social_auth::ratelimit::{RateLimit, RateLimiterRegistry};
use social_auth::scheduler::RefreshScheduler;
use social_auth::store::{CredentialStore, MemoryStore};
use social_auth::{AuthError, Platform};

struct Harness {
    server: MockServer,
    store: Arc<MemoryStore>,
    limiters: Arc<RateLimiterRegistry>,
    client: PlatformClient,
}

/// YouTube client whose API and token endpoint both live on one mock server.
async fn harness(limit: RateLimit) -> Harness {
    let server = MockServer::start().await;

    let provider = YouTubeProvider::new("yt-client".into(), "yt-secret".into())
        .with_token_url(format!("{}/token", server.uri()));
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(provider));

    let store = Arc::new(MemoryStore::new());
    let scheduler = Arc::new(RefreshScheduler::new(
        store.clone(),
        Arc::new(registry),
        common::settings(),
    ));
    let limiters = Arc::new(RateLimiterRegistry::new().with_limit(Platform::YouTube, limit));

    let client = PlatformClient::new(store.clone(), scheduler, limiters.clone())
        .with_base_url(Platform::YouTube, format!("{}/youtube/v3", server.uri()))
        .with_backoff_unit(Duration::from_millis(10));

    let mut rec = expiring_in(Platform::YouTube, 60);
    rec.access_token = "old-token".into();
    store.save_tokens("u1", &rec).await.unwrap();

    Harness {
        server,
        store,
        limiters,
        client,
    }
}

#[tokio::test]
async fn success_returns_json_body_with_bearer_token() {
    let h = harness(RateLimit::new(10, 60)).await;
    Mock::given(method("GET"))
        .and(path("/youtube/v3/channels"))
        .and(header("authorization", "Bearer old-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [1, 2] })))
        .expect(1)
        .mount(&h.server)
        .await;

    let data = h
        .client
        .request("u1", Platform::YouTube, "/channels", &RequestOptions::default())
        .await
        .unwrap();

    assert_eq!(data, json!({ "items": [1, 2] }));
    assert_eq!(h.limiters.remaining("u1", Platform::YouTube), 9);
}

#[tokio::test]
async fn unauthorized_refreshes_once_and_retries_with_new_token() {
    let h = harness(RateLimit::new(10, 60)).await;
    Mock::given(method("POST"))
        .and(path("/youtube/v3/videos"))
        .and(header("authorization", "Bearer old-token"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/youtube/v3/videos"))
        .and(header("authorization", "Bearer new-token"))
        .and(body_string_contains("\"title\":\"hello\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "vid-1" })))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "new-token",
            "expires_in": 3600,
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&h.server)
        .await;

    let data = h
        .client
        .request(
            "u1",
            Platform::YouTube,
            "videos",
            &RequestOptions::post(json!({ "title": "hello" })),
        )
        .await
        .unwrap();

    assert_eq!(data, json!({ "id": "vid-1" }));
    let stored = h.store.get_tokens("u1", Platform::YouTube).await.unwrap().unwrap();
    assert_eq!(stored.access_token, "new-token");
}

#[tokio::test]
async fn too_many_requests_waits_for_retry_after() {
    let h = harness(RateLimit::new(10, 60)).await;
    Mock::given(method("GET"))
        .and(path("/youtube/v3/search"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "1"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/youtube/v3/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .expect(1)
        .mount(&h.server)
        .await;

    let started = Instant::now();
    let data = h
        .client
        .request("u1", Platform::YouTube, "search", &RequestOptions::default())
        .await
        .unwrap();

    assert_eq!(data, json!({ "ok": true }));
    assert!(started.elapsed() >= Duration::from_secs(1));
}

#[tokio::test]
async fn retries_stop_after_max_attempts() {
    let h = harness(RateLimit::new(10, 60)).await;
    Mock::given(method("GET"))
        .and(path("/youtube/v3/search"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
        .expect(3)
        .mount(&h.server)
        .await;

    let err = h
        .client
        .request("u1", Platform::YouTube, "search", &RequestOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::PlatformApi { status: 429, .. }));
}

#[tokio::test]
async fn other_client_errors_are_not_retried() {
    let h = harness(RateLimit::new(10, 60)).await;
    Mock::given(method("DELETE"))
        .and(path("/youtube/v3/videos"))
        .respond_with(ResponseTemplate::new(403).set_body_string("quotaExceeded"))
        .expect(1)
        .mount(&h.server)
        .await;

    let opts: RequestOptions = serde_json::from_value(json!({
        "method": "delete",
        "query": [["id", "vid-1"]]
    }))
    .unwrap();
    let err = h
        .client
        .request("u1", Platform::YouTube, "videos", &opts)
        .await
        .unwrap_err();

    match err {
        AuthError::PlatformApi {
            platform,
            status,
            body,
        } => {
            assert_eq!(platform, "youtube");
            assert_eq!(status, 403);
            assert_eq!(body, "quotaExceeded");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn missing_account_is_not_found() {
    let h = harness(RateLimit::new(10, 60)).await;

    let err = h
        .client
        .request("nobody", Platform::YouTube, "channels", &RequestOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::NotFound(_)));
    assert_eq!(h.server.received_requests().await.unwrap_or_default().len(), 0);
}

#[tokio::test]
async fn exhausted_rate_limit_delays_the_next_call() {
    let h = harness(RateLimit::new(1, 1)).await;
    Mock::given(method("GET"))
        .and(path("/youtube/v3/channels"))
        .respond_with(ResponseTemplate::new(204))
        .expect(2)
        .mount(&h.server)
        .await;

    let started = Instant::now();
    for _ in 0..2 {
        let data = h
            .client
            .request("u1", Platform::YouTube, "channels", &RequestOptions::default())
            .await
            .unwrap();
        assert_eq!(data, serde_json::Value::Null);
    }

    assert!(started.elapsed() >= Duration::from_millis(900));
    assert_eq!(h.limiters.remaining("u1", Platform::YouTube), 0);
}

/// Accepts connections and closes them before answering.
async fn hang_up_server() -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            drop(socket);
        }
    });
    (format!("http://{addr}"), accepted)
}

#[tokio::test]
async fn transport_errors_back_off_linearly_then_give_up() {
    let (base_url, accepted) = hang_up_server().await;

    let store = Arc::new(MemoryStore::new());
    let scheduler = Arc::new(RefreshScheduler::new(
        store.clone(),
        Arc::new(ProviderRegistry::new()),
        common::settings(),
    ));
    let client = PlatformClient::new(store.clone(), scheduler, Arc::new(RateLimiterRegistry::new()))
        .with_base_url(Platform::LinkedIn, base_url)
        .with_backoff_unit(Duration::from_millis(100));
    store
        .save_tokens("u1", &expiring_in(Platform::LinkedIn, 60))
        .await
        .unwrap();

    let started = Instant::now();
    let err = client
        .request("u1", Platform::LinkedIn, "me", &RequestOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::Http(_)), "{err:?}");
    assert_eq!(accepted.load(Ordering::SeqCst), 3);
    // 100ms after the first attempt, 200ms after the second
    assert!(started.elapsed() >= Duration::from_millis(300));
}
