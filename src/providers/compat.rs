use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use url::Url;

use crate::config::CompatResolvedConfig;
use crate::dispatch::RequestContext;
use crate::error::{OauthError, ProxyError};
use switchboard_schema::openai::{ChatCompletion, ChatCompletionRequest};

use super::streaming::passthrough_chunk_stream;
use super::{
    NONSTREAM_TIMEOUT_SECS, OAuthResult, Provider, ProviderConfig, ProviderContext,
    ProviderResponse, classify_error_response,
};

/// API-key accounts are stamped a year ahead; the refresh path re-stamps
/// them lazily when they come within this window.
const API_KEY_LIFETIME_DAYS: i64 = 365;
const API_KEY_REFRESH_BUFFER_DAYS: i64 = 30;

/// One API-key OpenAI-compatible passthrough upstream (Nvidia NIM, Ollama
/// Cloud, OpenRouter, Kiro). The stored refresh token is the API key
/// itself; "refreshing" just re-stamps the expiry.
pub struct OpenAiCompatProvider {
    config: ProviderConfig,
    ctx: ProviderContext,
    cfg: CompatResolvedConfig,
    extra_headers: &'static [(&'static str, &'static str)],
}

impl OpenAiCompatProvider {
    pub fn new(
        name: &'static str,
        display_name: &'static str,
        ctx: ProviderContext,
        cfg: CompatResolvedConfig,
        extra_headers: &'static [(&'static str, &'static str)],
    ) -> Self {
        Self {
            config: ProviderConfig::new(name, display_name, cfg.model_list.iter().cloned()),
            ctx,
            cfg,
            extra_headers,
        }
    }

    /// The Account row contract for a submitted API key.
    pub fn api_key_oauth_result(api_key: &str) -> OAuthResult {
        let mut result = OAuthResult::tokens(
            api_key.to_string(),
            api_key.to_string(),
            Utc::now() + ChronoDuration::days(API_KEY_LIFETIME_DAYS),
        );
        result.api_key = Some(api_key.to_string());
        result
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn context(&self) -> &ProviderContext {
        &self.ctx
    }

    fn refresh_buffer(&self) -> ChronoDuration {
        ChronoDuration::days(API_KEY_REFRESH_BUFFER_DAYS)
    }

    fn credential_of(&self, account: &super::Account) -> String {
        account
            .api_key
            .clone()
            .unwrap_or_else(|| account.access_token.clone())
    }

    fn auth_url(&self, _state: &str, _code_verifier: Option<&str>) -> Result<Url, ProxyError> {
        Err(ProxyError::Oauth(OauthError::Flow {
            code: "UNSUPPORTED_AUTH_FLOW".to_string(),
            message: format!("{} accounts are created from an API key", self.config.name),
            details: None,
        }))
    }

    async fn exchange_code(
        &self,
        _code: &str,
        _redirect_uri: &str,
        _code_verifier: Option<&str>,
    ) -> Result<OAuthResult, ProxyError> {
        Err(ProxyError::Oauth(OauthError::Flow {
            code: "UNSUPPORTED_AUTH_FLOW".to_string(),
            message: format!("{} accounts are created from an API key", self.config.name),
            details: None,
        }))
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<OAuthResult, ProxyError> {
        Ok(Self::api_key_oauth_result(refresh_token))
    }

    async fn make_request(
        &self,
        credential: &str,
        _account: &super::Account,
        ctx: &RequestContext,
        body: &ChatCompletionRequest,
    ) -> Result<ProviderResponse, ProxyError> {
        let mut request = body.clone();
        // Model ids on these upstreams can themselves contain a slash that
        // happens to match a provider name (`openrouter/auto`); prefer the
        // exact requested id when this provider claims it.
        request.model = if self
            .config
            .supported_models
            .contains(&ctx.requested_model)
        {
            ctx.requested_model.clone()
        } else {
            self.resolve_model(&ctx.bare_model)
        };
        request.extra.remove("_responsesInput");
        request.thinking_budget = None;
        request.include_thoughts = None;

        let mut builder = self
            .ctx
            .http
            .post(self.cfg.api_url.clone())
            .bearer_auth(credential);

        for (name, value) in self.extra_headers {
            builder = builder.header(*name, *value);
        }
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
