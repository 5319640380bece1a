use axum::{
    Router,
    extract::{FromRef, Request},
    http::{HeaderName, StatusCode, Version, header::USER_AGENT},
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post},
};
use axum_extra::extract::cookie::Key;
use base64::Engine as _;
use rand::RngCore;
use reqwest::header::HeaderValue;
use std::sync::{Arc, LazyLock};
use std::time::Instant;
use tower_http::decompression::RequestDecompressionLayer;
use tracing::{error, info, warn};

use crate::db::DbActorHandle;
use crate::dispatch::Dispatcher;
use crate::secrets::CredentialCipher;
use crate::server::routes::{accounts, chat, messages, models, oauth_flow};

/// Global cookie signing/encryption key for PrivateCookieJar.
static COOKIE_KEY: LazyLock<Key> = LazyLock::new(Key::generate);

const MAX_REQUEST_ID_LEN: usize = 128;
const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

fn generate_request_id() -> String {
    // 96 bits => 16 chars base64url (no padding).
    let mut bytes = [0u8; 12];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

fn format_http_version(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_11 => "HTTP/1.1",
        Version::HTTP_2 => "HTTP/2",
        Version::HTTP_3 => "HTTP/3",
        _ => "HTTP/?",
    }
}

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub db: DbActorHandle,
    pub cipher: Arc<dyn CredentialCipher>,
}

impl AppState {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        db: DbActorHandle,
        cipher: Arc<dyn CredentialCipher>,
    ) -> Self {
        Self {
            dispatcher,
            db,
            cipher,
        }
    }
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        let _ = state; // state not used to fetch the static key
        COOKIE_KEY.clone()
    }
}

async fn not_found_handler() -> StatusCode {
    StatusCode::NOT_FOUND
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn access_log(req: Request, next: Next) -> Response {
    // Capture request metadata before moving `req` into the handler stack.
    let method = req.method().clone();
    let uri = req.uri().clone();
    let version = req.version();

    let request_id = req
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= MAX_REQUEST_ID_LEN)
        .map(str::to_string)
        .unwrap_or_else(generate_request_id);

    let user_agent = req
        .headers()
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    let start = Instant::now();
    let mut resp = next.run(req).await;

    // Always reflect `x-request-id` for easier correlation, even if the
    // client didn't send one.
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        resp.headers_mut().insert(X_REQUEST_ID, value);
    }

    let status = resp.status();
    let latency_ms = start.elapsed().as_millis() as u64;
    let path = uri.path();
    let protocol = format_http_version(version);

    // For SSE responses `latency_ms` is time-to-first-byte, not the full
    // stream duration.
    if status.is_server_error() {
        error!(
            "| {:>3} | {} | {:^7} | {:<8} | {} | {}ms | {}",
            status.as_u16(),
            request_id,
            method.as_str(),
            protocol,
            path,
            latency_ms,
            user_agent
        );
    } else if status.is_client_error() {
        warn!(
            "| {:>3} | {} | {:^7} | {:<8} | {} | {}ms | {}",
            status.as_u16(),
            request_id,
            method.as_str(),
            protocol,
            path,
            latency_ms,
            user_agent
        );
    } else {
        info!(
            "| {:>3} | {} | {:^7} | {:<8} | {} | {}ms | {}",
            status.as_u16(),
            request_id,
            method.as_str(),
            protocol,
            path,
            latency_ms,
            user_agent
        );
    }

    resp
}

pub fn app_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/v1/chat/completions", post(chat::chat_completions))
        .route("/v1/messages", post(messages::messages))
        .route("/v1/models", get(models::list_models));

    let management = Router::new()
        .route("/accounts", get(accounts::list_accounts))
        .route("/accounts/api_key", post(accounts::submit_api_key))
        .route(
            "/accounts/{id}/deactivate",
            post(accounts::deactivate_account),
        )
        .route("/accounts/{id}", delete(accounts::delete_account));

    let oauth = Router::new()
        .route("/oauth/{provider}/start", get(oauth_flow::oauth_start))
        .route("/oauth/{provider}/callback", get(oauth_flow::oauth_callback))
        .route(
            "/oauth/{provider}/device/start",
            post(oauth_flow::device_start),
        )
        // Fixed-path callback registered by the loopback OAuth clients.
        .route("/oauth2callback", get(oauth_flow::oauth_callback_fixed));

    Router::new()
        .merge(api)
        .merge(management)
        .merge(oauth)
        .route("/healthz", get(healthz))
        .fallback(not_found_handler)
        .with_state(state)
        .layer(RequestDecompressionLayer::new())
        .layer(middleware::from_fn(access_log))
}
