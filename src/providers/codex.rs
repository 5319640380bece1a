use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::Value;
use tracing::info;
use url::Url;

use crate::config::CodexResolvedConfig;
use crate::convert::{ResponsesSseState, chat_to_responses_request, merge_buffered_chunks};
use crate::dispatch::RequestContext;
use crate::error::{OauthError, ProxyError};
use crate::oauth::{DeviceAuthorization, DevicePollOutcome, poll_device_flow};
use crate::utils::jwt;
use switchboard_schema::openai::ChatCompletionRequest;

use super::streaming::{collect_chunks, responses_chunk_stream};
use super::{
    OAuthResult, Provider, ProviderConfig, ProviderContext, ProviderResponse,
    classify_error_response,
};

pub const CODEX_USER_AGENT: &str = "codex_cli_rs/0.52.0 (Ubuntu 24.04; x86_64)";

const OPENAI_AUTH_CLAIM: &str = "https://api.openai.com/auth";
const DEFAULT_ORGANIZATION: &str = "default";

/// ChatGPT account identity parsed from a freshly issued id_token.
#[derive(Debug, Clone)]
pub(crate) struct CodexIdentity {
    pub(crate) account_id: String,
    pub(crate) workspace_id: Option<String>,
    pub(crate) email: Option<String>,
}

/// Claims are read without signature verification: the token was just
/// handed to us by the issuer over TLS.
pub(crate) fn identity_from_id_token(id_token: &str) -> Result<CodexIdentity, ProxyError> {
    let claims = jwt::decode_claims(id_token)
        .ok_or_else(|| ProxyError::Internal("failed to decode id_token claims".to_string()))?;

    let auth = claims.get(OPENAI_AUTH_CLAIM).and_then(Value::as_object);

    let workspace_id = auth
        .and_then(|o| o.get("workspace_id"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let account_id = auth
        .and_then(|o| o.get("chatgpt_account_id"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| workspace_id.clone())
        .unwrap_or_else(|| DEFAULT_ORGANIZATION.to_string());

    let email = claims
        .get("email")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(CodexIdentity {
        account_id,
        workspace_id,
        email,
    })
}

/// Classify one Codex device-token poll response.
///
/// Codex deviates from the RFC: while the user has not approved yet, the
/// endpoint answers 403/404 with `deviceauth_authorization_unknown`
/// instead of `authorization_pending`.
pub(crate) fn classify_codex_poll(status: u16, body: &Value) -> DevicePollOutcome {
    let code = body
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(Value::as_str);

    if matches!(status, 403 | 404)
        && code.is_some_and(|c| c.contains("authorization_unknown") || c.contains("not_found"))
    {
        return DevicePollOutcome::Pending;
    }

    crate::oauth::classify_standard_poll(status, body)
}

pub struct CodexProvider {
    config: ProviderConfig,
    ctx: ProviderContext,
    cfg: CodexResolvedConfig,
}

impl CodexProvider {
    pub fn new(ctx: ProviderContext, cfg: CodexResolvedConfig) -> Self {
        Self {
            config: ProviderConfig::new(
                "codex",
                "ChatGPT Codex",
                cfg.model_list.iter().cloned(),
            ),
            ctx,
            cfg,
        }
    }

    fn oauth_result_from_token_body(&self, body: &Value) -> Result<OAuthResult, ProxyError> {
        let access_token = body
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ProxyError::Oauth(OauthError::Parse {
                    message: "token response lacks access_token".to_string(),
                    body: "<redacted>".to_string(),
                })
            })?
            .to_string();

        // Codex rotates refresh tokens on every refresh.
        let refresh_token = body
            .get("refresh_token")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let expires_in = body
            .get("expires_in")
            .and_then(Value::as_i64)
            .unwrap_or(3600);

        let mut result = OAuthResult::tokens(
            access_token,
            refresh_token,
            Utc::now() + ChronoDuration::seconds(expires_in),
        );

        if let Some(id_token) = body.get("id_token").and_then(Value::as_str) {
            let identity = identity_from_id_token(id_token)?;
            info!(account_id = %identity.account_id, "Codex identity extracted");
            result.email = identity.email;
            result.account_id = Some(identity.account_id);
            result.workspace_id = identity.workspace_id;
        }

        Ok(result)
    }
}

#[async_trait]
impl Provider for CodexProvider {
    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn context(&self) -> &ProviderContext {
        &self.ctx
    }

    fn refresh_buffer(&self) -> ChronoDuration {
        ChronoDuration::minutes(5)
    }

    fn auth_url(&self, _state: &str, _code_verifier: Option<&str>) -> Result<Url, ProxyError> {
        Err(ProxyError::Oauth(OauthError::Flow {
            code: "UNSUPPORTED_AUTH_FLOW".to_string(),
            message: "codex uses the device-code flow".to_string(),
            details: None,
        }))
    }

    /// Kick off the device flow: returns the code the user must enter.
    async fn start_device_auth(&self) -> Result<DeviceAuthorization, ProxyError> {
        let resp = self
            .ctx
            .http
            .post(self.cfg.device_url.clone())
            .json(&serde_json::json!({ "client_id": self.cfg.client_id }))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(ProxyError::Oauth(OauthError::UpstreamStatus(resp.status())));
        }

        Ok(resp.json::<DeviceAuthorization>().await?)
    }

    /// Poll until the user approves, then exchange the granted code.
    ///
    /// The grant payload carries its own `code_verifier`, which overrides
    /// anything generated locally.
    async fn complete_device_auth(
        &self,
        authorization: &DeviceAuthorization,
    ) -> Result<OAuthResult, ProxyError> {
        let http = self.ctx.http.clone();
        let url = self.cfg.device_token_url.clone();
        let client_id = self.cfg.client_id.clone();
        let device_code = authorization.device_code.clone();

        let grant = poll_device_flow(authorization, move || {
            let http = http.clone();
            let url = url.clone();
            let client_id = client_id.clone();
            let device_code = device_code.clone();
            async move {
                let result = http
                    .post(url)
                    .json(&serde_json::json!({
                        "client_id": client_id,
                        "device_code": device_code,
                        "grant_type": "urn:ietf:params:oauth:grant-type:device_code",
                    }))
                    .send()
                    .await;

                match result {
                    Ok(resp) => {
                        let status = resp.status().as_u16();
                        let body = resp.json::<Value>().await.unwrap_or_default();
                        classify_codex_poll(status, &body)
                    }
                    Err(e) => DevicePollOutcome::TransportError(e.to_string()),
                }
            }
        })
        .await?;

        let code = grant
            .get("authorization_code")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ProxyError::Oauth(OauthError::Other {
                    message: "device grant lacks authorization_code".to_string(),
                })
            })?;
        let verifier = grant.get("code_verifier").and_then(Value::as_str);

        self.exchange_code(code, "", verifier).await
    }

    async fn exchange_code(
        &self,
        code: &str,
        _redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<OAuthResult, ProxyError> {
        let mut form = serde_json::json!({
            "grant_type": "authorization_code",
            "code": code,
            "client_id": self.cfg.client_id,
        });
        if let Some(verifier) = code_verifier {
            form["code_verifier"] = Value::String(verifier.to_string());
        }

        let resp = self
            .ctx
            .http
            .post(self.cfg.token_url.clone())
            .json(&form)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(ProxyError::Oauth(OauthError::UpstreamStatus(resp.status())));
        }

        let body: Value = resp.json().await?;
        self.oauth_result_from_token_body(&body)
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<OAuthResult, ProxyError> {
        let resp = self
            .ctx
            .http
            .post(self.cfg.token_url.clone())
            .json(&serde_json::json!({
                "grant_type": "refresh_token",
                "refresh_token": refresh_token,
                "client_id": self.cfg.client_id,
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(ProxyError::Oauth(OauthError::UpstreamStatus(resp.status())));
        }

        let body: Value = resp.json().await?;
        let mut result = self.oauth_result_from_token_body(&body)?;
        if result.refresh_token.is_empty() {
            result.refresh_token = refresh_token.to_string();
        }
        Ok(result)
    }

    async fn make_request(
        &self,
        credential: &str,
        account: &super::Account,
        ctx: &RequestContext,
        body: &ChatCompletionRequest,
    ) -> Result<ProviderResponse, ProxyError> {
        let model = self.resolve_model(&ctx.bare_model);
        let request = chat_to_responses_request(body, &model);

        let mut builder = self
            .ctx
            .http
            .post(self.cfg.responses_url.clone())
            .bearer_auth(credential)
            .header("OpenAI-Beta", "responses=experimental")
            .header("session_id", &ctx.session_id);

        if let Some(account_id) = &account.account_id {
            builder = builder.header("ChatGPT-Account-Id", account_id);
        }

        let resp = builder.json(&request).send().await?;

        if !resp.status().is_success() {
            return Err(classify_error_response(resp).await);
        }

        // The Codex backend only speaks SSE (the request pins stream=true).
        let state = ResponsesSseState::new(&ctx.requested_model, ctx.include_reasoning);
        let stream = responses_chunk_stream(resp, state);

        if ctx.stream {
            Ok(ProviderResponse::Stream(stream))
        } else {
            let chunks = collect_chunks(stream).await?;
            Ok(ProviderResponse::Completion(Box::new(
                merge_buffered_chunks(&chunks, &ctx.requested_model),
            )))
        }
    }
}
