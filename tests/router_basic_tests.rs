use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use chrono::Utc;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tower::ServiceExt;

use switchboard::config::Config;
use switchboard::db::{DbActorHandle, DbProxyApiKey};
use switchboard::dispatch::Dispatcher;
use switchboard::providers::ProviderRegistry;
use switchboard::ratelimit::RateLimitRegistry;
use switchboard::secrets::AesGcmCipher;
use switchboard::server::router::{AppState, app_router};
use switchboard_thoughtsig::SignatureStore;

const PROXY_KEY: &str = "sk-switchboard-test-key";

fn sha256_hex(input: &str) -> String {
    Sha256::digest(input.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

async fn test_app() -> (Router, DbActorHandle) {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before UNIX_EPOCH")
        .as_nanos();
    let mut path = std::env::temp_dir();
    path.push(format!(
        "switchboard-router-{}-{}.sqlite",
        std::process::id(),
        nanos
    ));
    let database_url = format!("sqlite:{}", path.display());

    let db = switchboard::db::spawn(&database_url).await;
    let cipher = Arc::new(AesGcmCipher::from_master_key("test-master-key"));
    let cfg = Config::default();

    let registry = Arc::new(ProviderRegistry::build(
        &cfg,
        db.clone(),
        cipher.clone(),
        Arc::new(SignatureStore::default()),
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        registry,
        db.clone(),
        cipher.clone(),
        Arc::new(RateLimitRegistry::new()),
        cfg.providers.defaults.retry_max_times,
        cfg.providers.defaults.retry_base_ms,
    ));

    db.create_proxy_key(DbProxyApiKey {
        id: 0,
        user_id: "user-1".to_string(),
        key_hash: sha256_hex(PROXY_KEY),
        key_preview: "sk-switc".to_string(),
        name: Some("test".to_string()),
        expires_at: None,
        is_active: true,
        created_at: Utc::now(),
    })
    .await
    .expect("proxy key stored");

    let state = AppState::new(dispatcher, db.clone(), cipher);
    (app_router(state), db)
}

fn post_json(uri: &str, key: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(key) = key {
        builder = builder.header("authorization", format!("Bearer {key}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn healthz_is_open() {
    let (app, _db) = test_app().await;
    let resp = app
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn chat_requires_a_proxy_key() {
    let (app, _db) = test_app().await;
    let body = json!({"model": "claude-sonnet-4-5",
                      "messages": [{"role": "user", "content": "hi"}]});

    let resp = app
        .clone()
        .oneshot(post_json("/v1/chat/completions", None, &body))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = app
        .oneshot(post_json("/v1/chat/completions", Some("wrong-key"), &body))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_model_is_a_400() {
    let (app, _db) = test_app().await;
    let body = json!({"model": "model-nobody-serves",
                      "messages": [{"role": "user", "content": "hi"}]});

    let resp = app
        .oneshot(post_json("/v1/chat/completions", Some(PROXY_KEY), &body))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let bytes = to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
    let error: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(error["error"]["type"], json!("invalid_request_error"));
}

#[tokio::test]
async fn known_model_without_accounts_maps_to_503_with_retry_after() {
    let (app, _db) = test_app().await;
    let body = json!({"model": "claude-sonnet-4-5",
                      "messages": [{"role": "user", "content": "hi"}]});

    let resp = app
        .oneshot(post_json("/v1/chat/completions", Some(PROXY_KEY), &body))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(resp.headers().contains_key("retry-after"));

    let bytes = to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
    let error: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(error["error"]["type"], json!("quota_exhausted_error"));
}

#[tokio::test]
async fn empty_messages_are_rejected_up_front() {
    let (app, _db) = test_app().await;
    let body = json!({"model": "claude-sonnet-4-5", "messages": []});

    let resp = app
        .oneshot(post_json("/v1/chat/completions", Some(PROXY_KEY), &body))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn models_reflect_connected_accounts() {
    let (app, _db) = test_app().await;

    // No accounts yet: the list is empty.
    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/v1/models")
                .header("authorization", format!("Bearer {PROXY_KEY}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
    let list: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(list["data"], json!([]));

    // Submit an OpenRouter API key; its models appear.
    let resp = app
        .clone()
        .oneshot(post_json(
            "/accounts/api_key",
            Some(PROXY_KEY),
            &json!({"provider": "openrouter", "api_key": "sk-or-abc"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = app
        .oneshot(
            Request::builder()
                .uri("/v1/models")
                .header("authorization", format!("Bearer {PROXY_KEY}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let bytes = to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
    let list: Value = serde_json::from_slice(&bytes).unwrap();
    let ids: Vec<&str> = list["data"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|m| m["id"].as_str())
        .collect();
    assert!(ids.contains(&"openrouter/auto"));
}

#[tokio::test]
async fn account_management_round_trip() {
    let (app, _db) = test_app().await;

    let resp = app
        .clone()
        .oneshot(post_json(
            "/accounts/api_key",
            Some(PROXY_KEY),
            &json!({"provider": "nvidia_nim", "api_key": "nvapi-123"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let bytes = to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
    let created: Value = serde_json::from_slice(&bytes).unwrap();
    let id = created["id"].as_i64().unwrap();

    // Listed, redacted.
    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/accounts")
                .header("authorization", format!("Bearer {PROXY_KEY}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let bytes = to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
    let listed: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(listed[0]["provider"], json!("nvidia_nim"));
    assert!(listed[0].get("access_token").is_none());
    assert!(listed[0].get("refresh_token").is_none());

    // Deactivate, then delete.
    let resp = app
        .clone()
        .oneshot(post_json(
            &format!("/accounts/{id}/deactivate"),
            Some(PROXY_KEY),
            &json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/accounts/{id}"))
                .header("authorization", format!("Bearer {PROXY_KEY}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
}
