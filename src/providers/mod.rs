pub mod account;
pub mod antigravity;
pub mod codex;
pub mod compat;
pub mod copilot;
pub mod gemini_cli;
pub mod iflow;
pub mod qwen;
pub mod registry;

mod credentials;
mod google_code_assist;
mod streaming;

pub use account::Account;
pub use registry::{ProviderRegistry, normalize_provider_name};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::stream::BoxStream;
use std::collections::BTreeSet;
use std::sync::Arc;
use url::Url;

use crate::db::DbActorHandle;
use crate::dispatch::RequestContext;
use crate::error::{OauthError, ProxyError};
use crate::oauth::DeviceAuthorization;
use crate::ratelimit::{parse_rate_limit_error, parse_retry_after_ms};
use crate::secrets::CredentialCipher;
use switchboard_schema::openai::{ChatCompletion, ChatCompletionChunk, ChatCompletionRequest};

/// Streamed response body, already in chat.completion.chunk dialect.
pub type ChunkStream = BoxStream<'static, Result<ChatCompletionChunk, ProxyError>>;

/// What a provider hands back to the dispatcher.
pub enum ProviderResponse {
    Stream(ChunkStream),
    Completion(Box<ChatCompletion>),
}

/// Static identity of a provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub name: &'static str,
    pub display_name: &'static str,
    pub supported_models: BTreeSet<String>,
}

impl ProviderConfig {
    pub fn new(
        name: &'static str,
        display_name: &'static str,
        models: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            name,
            display_name,
            supported_models: models.into_iter().collect(),
        }
    }
}

/// Everything a provider learns about an account from one OAuth exchange
/// or refresh.
#[derive(Debug, Clone)]
pub struct OAuthResult {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub email: Option<String>,
    pub api_key: Option<String>,
    pub project_id: Option<String>,
    pub tier: Option<String>,
    pub account_id: Option<String>,
    pub workspace_id: Option<String>,
}

impl OAuthResult {
    pub fn tokens(
        access_token: String,
        refresh_token: String,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token,
            refresh_token,
            expires_at,
            email: None,
            api_key: None,
            project_id: None,
            tier: None,
            account_id: None,
            workspace_id: None,
        }
    }
}

/// Shared wiring every provider needs.
pub struct ProviderContext {
    pub db: DbActorHandle,
    pub cipher: Arc<dyn CredentialCipher>,
    pub http: reqwest::Client,
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn config(&self) -> &ProviderConfig;

    fn context(&self) -> &ProviderContext;

    /// How long before nominal expiry a credential is already treated as
    /// expired. Varies per upstream: Copilot tokens die hard at expiry,
    /// iFlow keys are refreshed a day ahead.
    fn refresh_buffer(&self) -> ChronoDuration;

    /// Hard model aliases resolved inside the provider
    /// (e.g. `claude-opus-4-5` -> `claude-opus-4-5-thinking`).
    fn resolve_model(&self, model: &str) -> String {
        model.to_string()
    }

    /// Authorization URL for PKCE/auth-code flows. Device-code and API-key
    /// providers reject this.
    fn auth_url(&self, state: &str, code_verifier: Option<&str>) -> Result<Url, ProxyError>;

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<OAuthResult, ProxyError>;

    async fn refresh_token(&self, refresh_token: &str) -> Result<OAuthResult, ProxyError>;

    /// Device-code flow entry point; only Codex and Copilot support it.
    async fn start_device_auth(&self) -> Result<DeviceAuthorization, ProxyError> {
        Err(ProxyError::Oauth(OauthError::Flow {
            code: "UNSUPPORTED_AUTH_FLOW".to_string(),
            message: format!("{} does not use the device-code flow", self.config().name),
            details: None,
        }))
    }

    /// Poll a started device authorization to completion.
    async fn complete_device_auth(
        &self,
        authorization: &DeviceAuthorization,
    ) -> Result<OAuthResult, ProxyError> {
        let _ = authorization;
        Err(ProxyError::Oauth(OauthError::Flow {
            code: "UNSUPPORTED_AUTH_FLOW".to_string(),
            message: format!("{} does not use the device-code flow", self.config().name),
            details: None,
        }))
    }

    /// The string that goes into the Authorization header upstream.
    /// iFlow and the API-key passthroughs use a key, not the OAuth token.
    fn credential_of(&self, account: &Account) -> String {
        account.access_token.clone()
    }

    /// Return a usable credential, refreshing and persisting first when the
    /// stored one is inside the refresh buffer.
    async fn valid_credentials(&self, account: &mut Account) -> Result<String, ProxyError> {
        credentials::ensure_fresh(self, account).await
    }

    /// Last-chance request normalisation before the upstream call.
    async fn prepare_request(
        &self,
        account: &Account,
        body: &mut ChatCompletionRequest,
    ) -> Result<(), ProxyError> {
        let _ = (account, body);
        Ok(())
    }

    /// Issue the upstream call. The returned body is already in OpenAI
    /// chat.completions shape, streamed or buffered.
    async fn make_request(
        &self,
        credential: &str,
        account: &Account,
        ctx: &RequestContext,
        body: &ChatCompletionRequest,
    ) -> Result<ProviderResponse, ProxyError>;
}

/// Map a failed upstream response onto the proxy error surface.
///
/// 429 bodies are parsed for quota-reset hints so the dispatcher can mark
/// the account and fail over with an honest Retry-After.
pub(crate) async fn classify_error_response(resp: reqwest::Response) -> ProxyError {
    let status = resp.status();
    let header_delay = parse_retry_after_ms(resp.headers());
    let body: serde_json::Value = resp.json().await.unwrap_or_default();

    match status.as_u16() {
        429 => {
            let info = parse_rate_limit_error(&body);
            ProxyError::RateLimited {
                retry_after_ms: header_delay.unwrap_or(info.retry_after_ms),
                message: info.message,
            }
        }
        401 => ProxyError::Unauthorized("upstream rejected the credential".to_string()),
        403 => ProxyError::Forbidden("upstream denied access for this account".to_string()),
        400 | 409 | 422 => ProxyError::InvalidRequest(
            body.get("error")
                .and_then(|e| e.get("message"))
                .and_then(serde_json::Value::as_str)
                .unwrap_or("upstream rejected the request body")
                .to_string(),
        ),
        500..=599 => ProxyError::UpstreamTransient(format!("upstream returned {status}")),
        _ => ProxyError::UpstreamTransient(format!("unexpected upstream status {status}")),
    }
}

/// Connects are bounded tightly; streams get room to run.
pub(crate) const CONNECT_TIMEOUT_SECS: u64 = 10;
pub(crate) const STREAM_TOTAL_TIMEOUT_SECS: u64 = 10 * 60;
pub(crate) const NONSTREAM_TIMEOUT_SECS: u64 = 60;

/// Build the outbound client for one provider.
pub(crate) fn build_http_client(
    user_agent: &str,
    proxy: Option<Url>,
    enable_multiplexing: bool,
) -> reqwest::Client {
    use reqwest::header::{CONNECTION, HeaderMap, HeaderValue};
    use std::time::Duration;

    let mut headers = HeaderMap::new();

    let mut builder = reqwest::Client::builder()
        .user_agent(user_agent)
        .redirect(reqwest::redirect::Policy::none())
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .timeout(Duration::from_secs(STREAM_TOTAL_TIMEOUT_SECS));

    if let Some(proxy_url) = proxy {
        let proxy = reqwest::Proxy::all(proxy_url.as_str())
            .expect("invalid proxy url for reqwest client");
        builder = builder.proxy(proxy);
    }

    if enable_multiplexing {
        builder = builder.http2_adaptive_window(true);
    } else {
        headers.insert(CONNECTION, HeaderValue::from_static("close"));
        builder = builder
            .http1_only()
            .pool_max_idle_per_host(0)
            .pool_idle_timeout(Duration::from_secs(0));
    }

    builder
        .default_headers(headers)
        .build()
        .expect("failed to build reqwest client")
}
