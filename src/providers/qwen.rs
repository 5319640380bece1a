use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use oauth2::{PkceCodeChallenge, PkceCodeVerifier};
use serde::Deserialize;
use url::Url;

use crate::config::QwenResolvedConfig;
use crate::dispatch::RequestContext;
use crate::error::{OauthError, ProxyError};
use switchboard_schema::openai::{ChatCompletion, ChatCompletionRequest};

use super::streaming::passthrough_chunk_stream;
use super::{
    NONSTREAM_TIMEOUT_SECS, OAuthResult, Provider, ProviderConfig, ProviderContext,
    ProviderResponse, classify_error_response,
};

pub const QWEN_USER_AGENT: &str = "QwenCode/0.2.3 (linux; x64)";

#[derive(Debug, Deserialize)]
struct QwenTokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

/// Qwen Code: PKCE OAuth against the Qwen portal, OpenAI-compatible chat.
pub struct QwenProvider {
    config: ProviderConfig,
    ctx: ProviderContext,
    cfg: QwenResolvedConfig,
}

impl QwenProvider {
    pub fn new(ctx: ProviderContext, cfg: QwenResolvedConfig) -> Self {
        Self {
            config: ProviderConfig::new(
                "qwen_code",
                "Qwen Code",
                cfg.model_list.iter().cloned(),
            ),
            ctx,
            cfg,
        }
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<OAuthResult, ProxyError> {
        let resp = self
            .ctx
            .http
            .post(self.cfg.oauth_token_url.clone())
            .form(form)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(ProxyError::Oauth(OauthError::UpstreamStatus(resp.status())));
        }

        let token: QwenTokenResponse = resp.json().await?;
        Ok(OAuthResult::tokens(
            token.access_token,
            token.refresh_token.unwrap_or_default(),
            Utc::now() + ChronoDuration::seconds(token.expires_in.unwrap_or(3600)),
        ))
    }
}

#[async_trait]
impl Provider for QwenProvider {
    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn context(&self) -> &ProviderContext {
        &self.ctx
    }

    fn refresh_buffer(&self) -> ChronoDuration {
        ChronoDuration::minutes(5)
    }

    fn auth_url(&self, state: &str, code_verifier: Option<&str>) -> Result<Url, ProxyError> {
        let mut url = self.cfg.oauth_auth_url.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("client_id", &self.cfg.oauth_client_id)
                .append_pair("redirect_uri", self.cfg.oauth_redirect_url.as_str())
                .append_pair("response_type", "code")
                .append_pair("scope", "openid profile model.completion")
                .append_pair("state", state);

            if let Some(verifier) = code_verifier {
                let challenge = PkceCodeChallenge::from_code_verifier_sha256(
                    &PkceCodeVerifier::new(verifier.to_string()),
                );
                pairs
                    .append_pair("code_challenge", challenge.as_str())
                    .append_pair("code_challenge_method", "S256");
            }
        }
        Ok(url)
    }

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<OAuthResult, ProxyError> {
        let redirect_uri = if redirect_uri.is_empty() {
            self.cfg.oauth_redirect_url.as_str()
        } else {
            redirect_uri
        };
        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("client_id", self.cfg.oauth_client_id.as_str()),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ];
        if let Some(verifier) = code_verifier {
            form.push(("code_verifier", verifier));
        }

        self.token_request(&form).await
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<OAuthResult, ProxyError> {
        let form = vec![
            ("grant_type", "refresh_token"),
            ("client_id", self.cfg.oauth_client_id.as_str()),
            ("refresh_token", refresh_token),
        ];

        let mut result = self.token_request(&form).await?;
        if result.refresh_token.is_empty() {
            result.refresh_token = refresh_token.to_string();
        }
        Ok(result)
    }

    async fn make_request(
        &self,
        credential: &str,
        _account: &super::Account,
        ctx: &RequestContext,
        body: &ChatCompletionRequest,
    ) -> Result<ProviderResponse, ProxyError> {
        let mut request = body.clone();
        request.model = self.resolve_model(&ctx.bare_model);
        request.extra.remove("_responsesInput");

        let mut builder = self
            .ctx
            .http
            .post(self.cfg.api_url.clone())
            .bearer_auth(credential);

        if !ctx.stream {
            builder = builder.timeout(std::time::Duration::from_secs(NONSTREAM_TIMEOUT_SECS));
        }

        let resp = builder.json(&request).send().await?;

        if !resp.status().is_success() {
            return Err(classify_error_response(resp).await);
        }

        if ctx.stream {
            Ok(ProviderResponse::Stream(passthrough_chunk_stream(resp)))
        } else {
            let completion: ChatCompletion = resp.json().await?;
            Ok(ProviderResponse::Completion(Box::new(completion)))
        }
    }
}
