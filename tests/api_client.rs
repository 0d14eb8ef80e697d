//! Resilient API client tests
//!
//! A mock API answers 401 for stale tokens; a mock provider issues new
//! ones. Checks the retry-after-refresh path, single-flight refresh, and
//! session expiry handling.

mod common;

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::future::join_all;
use pretty_assertions::assert_eq;
use reqwest::Client;
use serde_json::{Value, json};
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{
    CLIENT_ID, FailingWritesStore, RecordingNotifier, TOKEN_PATH, mock_provider, signed_in_pair,
    token_body,
};
use oauth_session::Error;
use oauth_session::api::{ApiClientSettings, ConsistencyRetryPolicy, ResilientApiClient};
use oauth_session::oauth::{IssuerMetadataCache, TokenPair, TokenRefreshCoordinator};
use oauth_session::session::{
    MemorySessionStore, RefreshGate, SessionState, SessionStateTracker, SessionStore, store,
};

struct Harness {
    client: ResilientApiClient,
    store: Arc<dyn SessionStore>,
    state: Arc<SessionStateTracker>,
    notifier: Arc<RecordingNotifier>,
}

async fn harness(provider: &MockServer, api_base: &str, stored: Option<TokenPair>) -> Harness {
    harness_with_store(provider, api_base, stored, Arc::new(MemorySessionStore::new())).await
}

async fn harness_with_store(
    provider: &MockServer,
    api_base: &str,
    stored: Option<TokenPair>,
    store: Arc<dyn SessionStore>,
) -> Harness {
    if let Some(pair) = stored {
        store::save_token_pair(store.as_ref(), &pair).await.unwrap();
    }

    let state = Arc::new(SessionStateTracker::new(SessionState::Authenticated));
    let notifier = RecordingNotifier::new();
    let cache = Arc::new(IssuerMetadataCache::new(Client::new()));
    let gate = Arc::new(RefreshGate::new(
        Arc::new(TokenRefreshCoordinator::new(cache, None)),
        store.clone(),
        Arc::clone(&state),
        notifier.clone(),
        provider.uri(),
        CLIENT_ID,
    ));

    let settings = ApiClientSettings {
        base_url: api_base.to_string(),
        consistency: ConsistencyRetryPolicy {
            max_attempts: 3,
            step: Duration::from_millis(5),
        },
    };

    Harness {
        client: ResilientApiClient::new(Client::new(), settings, gate),
        store,
        state,
        notifier,
    }
}

async fn mount_bearer(api: &MockServer, token: &str, status: u16, body: Value) {
    Mock::given(method("GET"))
        .and(path("/clusters"))
        .and(header("authorization", format!("Bearer {token}").as_str()))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .mount(api)
        .await;
}

#[tokio::test]
async fn test_401_refreshes_and_retries_once() {
    let provider = mock_provider().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("refresh_token=rt1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("at2", Some("rt2"))))
        .expect(1)
        .mount(&provider)
        .await;

    let api = MockServer::start().await;
    mount_bearer(&api, "at1", 401, json!({"error": "unauthorized"})).await;
    mount_bearer(&api, "at2", 200, json!({"clusters": [{"id": "a"}, {"id": "b"}]})).await;

    let h = harness(&provider, &api.uri(), Some(signed_in_pair("at1", Some("rt1")))).await;

    let clusters: Vec<Value> = h.client.list("/clusters", Some("clusters")).await.unwrap();
    assert_eq!(clusters, vec![json!({"id": "a"}), json!({"id": "b"})]);

    let stored = store::load_token_pair(h.store.as_ref()).await.unwrap().unwrap();
    assert_eq!(stored.access_token, "at2");
    assert_eq!(stored.refresh_token(), Some("rt2"));
    assert!(stored.original_client_metadata.is_some());
    assert_eq!(h.state.current(), SessionState::Authenticated);
}

#[tokio::test]
async fn test_refreshed_token_is_used_even_when_it_cannot_be_saved() {
    let provider = mock_provider().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("refresh_token=rt1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("at2", Some("rt2"))))
        .expect(1)
        .mount(&provider)
        .await;

    let api = MockServer::start().await;
    mount_bearer(&api, "at1", 401, json!({})).await;
    mount_bearer(&api, "at2", 200, json!({"clusters": [{"id": "a"}]})).await;

    let failing = FailingWritesStore::new();
    let h = harness_with_store(
        &provider,
        &api.uri(),
        Some(signed_in_pair("at1", Some("rt1"))),
        failing.clone(),
    )
    .await;
    failing.fail_writes(true);

    let clusters: Vec<Value> = h.client.list("/clusters", Some("clusters")).await.unwrap();
    assert_eq!(clusters, vec![json!({"id": "a"})]);
    assert_eq!(h.state.current(), SessionState::Authenticated);

    let errors = h.notifier.errors.lock().clone();
    assert_eq!(errors.len(), 1, "{errors:?}");
    assert!(errors[0].contains("could not be saved"), "{errors:?}");

    // Old pair is still on disk; nothing was half-written
    let stored = store::load_token_pair(h.store.as_ref()).await.unwrap().unwrap();
    assert_eq!(stored.access_token, "at1");
}

#[tokio::test]
async fn test_concurrent_401s_share_one_refresh() {
    let provider = mock_provider().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_body("at2", Some("rt2")))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&provider)
        .await;

    let api = MockServer::start().await;
    mount_bearer(&api, "at1", 401, json!({})).await;
    mount_bearer(&api, "at2", 200, json!([{"id": "a"}])).await;

    let h = harness(&provider, &api.uri(), Some(signed_in_pair("at1", Some("rt1")))).await;

    let results = join_all((0..5).map(|_| h.client.get("/clusters"))).await;
    for result in results {
        assert_eq!(result.unwrap(), json!([{"id": "a"}]));
    }

    let stored = store::load_token_pair(h.store.as_ref()).await.unwrap().unwrap();
    assert_eq!(stored.access_token, "at2");
}

#[tokio::test]
async fn test_missing_refresh_token_expires_session() {
    let provider = mock_provider().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&provider)
        .await;

    let api = MockServer::start().await;
    mount_bearer(&api, "at1", 401, json!({})).await;

    let h = harness(&provider, &api.uri(), Some(signed_in_pair("at1", None))).await;

    let err = h.client.get("/clusters").await.unwrap_err();
    assert!(matches!(err, Error::SessionExpired), "got {err:?}");
    assert_eq!(err.to_string(), "Your session has expired. Please sign in again.");

    assert!(store::load_token_pair(h.store.as_ref()).await.unwrap().is_none());
    assert!(h.store.get(store::ACCESS_TOKEN_KEY).await.unwrap().is_none());
    assert_eq!(h.state.current(), SessionState::Unauthenticated);
    assert!(
        h.notifier
            .infos
            .lock()
            .iter()
            .any(|m| m.contains("session has expired"))
    );
}

#[tokio::test]
async fn test_rejected_refresh_expires_session() {
    let provider = mock_provider().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "invalid_grant"})))
        .expect(1)
        .mount(&provider)
        .await;

    let api = MockServer::start().await;
    mount_bearer(&api, "at1", 401, json!({})).await;

    let h = harness(&provider, &api.uri(), Some(signed_in_pair("at1", Some("rt1")))).await;

    let err = h.client.get("/clusters").await.unwrap_err();
    assert!(matches!(err, Error::SessionExpired), "got {err:?}");
    assert!(store::load_token_pair(h.store.as_ref()).await.unwrap().is_none());
    assert_eq!(h.state.current(), SessionState::Unauthenticated);
}

#[tokio::test]
async fn test_second_401_after_refresh_expires_session() {
    let provider = mock_provider().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("at2", Some("rt2"))))
        .expect(1)
        .mount(&provider)
        .await;

    let api = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/clusters"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&api)
        .await;

    let h = harness(&provider, &api.uri(), Some(signed_in_pair("at1", Some("rt1")))).await;

    let err = h.client.get("/clusters").await.unwrap_err();
    assert!(matches!(err, Error::SessionExpired), "got {err:?}");
    assert!(store::load_token_pair(h.store.as_ref()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_expired_token_is_refreshed_before_sending() {
    let provider = mock_provider().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("at2", Some("rt2"))))
        .expect(1)
        .mount(&provider)
        .await;

    let api = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/clusters"))
        .and(header("authorization", "Bearer at1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(0)
        .mount(&api)
        .await;
    mount_bearer(&api, "at2", 200, json!({"id": "a"})).await;

    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
    let mut stale = signed_in_pair("at1", Some("rt1"));
    stale.expires_at = Some(now - 10);

    let h = harness(&provider, &api.uri(), Some(stale)).await;
    let clusters: Vec<Value> = h.client.list("/clusters", Some("clusters")).await.unwrap();
    assert_eq!(clusters, vec![json!({"id": "a"})]);
}

#[tokio::test]
async fn test_no_stored_session_fails_without_request() {
    let provider = mock_provider().await;
    let api = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&api)
        .await;

    let h = harness(&provider, &api.uri(), None).await;
    let err = h.client.get("/clusters").await.unwrap_err();
    assert!(matches!(err, Error::SessionExpired), "got {err:?}");
}

#[tokio::test]
async fn test_await_consistency_retries_empty_lists() {
    let provider = mock_provider().await;
    let api = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
        .up_to_n_times(2)
        .with_priority(1)
        .expect(2)
        .mount(&api)
        .await;
    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": [{"id": 7}]})))
        .expect(1)
        .mount(&api)
        .await;

    let h = harness(&provider, &api.uri(), Some(signed_in_pair("at1", Some("rt1")))).await;
    let items: Vec<Value> = h
        .client
        .list_awaiting_consistency("/items", None)
        .await
        .unwrap();
    assert_eq!(items, vec![json!({"id": 7})]);
}

#[tokio::test]
async fn test_plain_list_does_not_retry_empty() {
    let provider = mock_provider().await;
    let api = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&api)
        .await;

    let h = harness(&provider, &api.uri(), Some(signed_in_pair("at1", Some("rt1")))).await;
    let items: Vec<Value> = h.client.list("/items", None).await.unwrap();
    assert!(items.is_empty());
}

#[tokio::test]
async fn test_server_error_is_reported_with_status() {
    let provider = mock_provider().await;
    let api = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/clusters"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .expect(1)
        .mount(&api)
        .await;

    let h = harness(&provider, &api.uri(), Some(signed_in_pair("at1", Some("rt1")))).await;
    match h.client.get("/clusters").await.unwrap_err() {
        Error::Api { status, body } => {
            assert_eq!(status, 503);
            assert_eq!(body, "maintenance");
        }
        other => panic!("expected Api error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unreachable_api_is_network_error() {
    let provider = mock_provider().await;
    let base = format!("http://127.0.0.1:{}/v1", common::unused_port());

    let h = harness(&provider, &base, Some(signed_in_pair("at1", Some("rt1")))).await;
    let err = h.client.get("/clusters").await.unwrap_err();
    match err {
        Error::Network(target) => assert!(target.starts_with("http://127.0.0.1:")),
        other => panic!("expected Network error, got {other:?}"),
    }
    // Session is untouched
    assert!(store::load_token_pair(h.store.as_ref()).await.unwrap().is_some());
}

#[tokio::test]
async fn test_post_sends_json_body() {
    let provider = mock_provider().await;
    let api = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/clusters"))
        .and(header("authorization", "Bearer at1"))
        .and(body_string_contains("\"name\":\"primary\""))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "c1"})))
        .expect(1)
        .mount(&api)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/clusters/c1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&api)
        .await;

    let h = harness(&provider, &api.uri(), Some(signed_in_pair("at1", Some("rt1")))).await;
    let created = h.client.post("/clusters", &json!({"name": "primary"})).await.unwrap();
    assert_eq!(created, json!({"id": "c1"}));

    let deleted = h.client.delete("clusters/c1").await.unwrap();
    assert_eq!(deleted, Value::Null);
}
