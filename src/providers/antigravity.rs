use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use crate::config::AntigravityResolvedConfig;
use crate::convert::{
    GeminiSseState, apply_claude_envelope, apply_gemini_envelope, chat_to_gemini_request,
    gemini_to_chat_completion, merge_buffered_chunks,
};
use crate::dispatch::RequestContext;
use crate::error::ProxyError;
use crate::ratelimit::family_for_model;
use switchboard_schema::codeassist::{CodeAssistEnvelope, unwrap_response};
use switchboard_schema::openai::ChatCompletionRequest;
use switchboard_thoughtsig::{KeyScope, SignatureSniffer, SignatureStore};

use super::google_code_assist::{CodeAssistClient, GoogleOauth};
use super::streaming::{collect_chunks, gemini_chunk_stream};
use super::{
    OAuthResult, Provider, ProviderConfig, ProviderContext, ProviderResponse,
    classify_error_response,
};

pub const ANTIGRAVITY_USER_AGENT: &str = "antigravity/1.16.5 linux/amd64";

/// Hard model aliases resolved inside the provider.
const MODEL_ALIASES: [(&str, &str); 2] = [
    ("claude-opus-4-5", "claude-opus-4-5-thinking"),
    ("claude-sonnet-4-5-high", "claude-sonnet-4-5-thinking"),
];

pub struct AntigravityProvider {
    config: ProviderConfig,
    ctx: ProviderContext,
    client: CodeAssistClient,
    oauth: GoogleOauth,
    sigstore: Arc<SignatureStore>,
}

impl AntigravityProvider {
    pub fn new(
        ctx: ProviderContext,
        cfg: &AntigravityResolvedConfig,
        sigstore: Arc<SignatureStore>,
    ) -> Self {
        let client = CodeAssistClient::new(ctx.http.clone(), "ANTIGRAVITY");
        let oauth = GoogleOauth {
            client_id: cfg.oauth_client_id.clone(),
            client_secret: cfg.oauth_client_secret.clone(),
            auth_url: cfg.oauth_auth_url.clone(),
            token_url: cfg.oauth_token_url.clone(),
            redirect_url: cfg.oauth_redirect_url.clone(),
            scopes: cfg.oauth_scopes.clone(),
        };

        Self {
            config: ProviderConfig::new(
                "antigravity",
                "Google Antigravity",
                cfg.model_list.iter().cloned(),
            ),
            ctx,
            client,
            oauth,
            sigstore,
        }
    }

    fn is_claude_model(model: &str) -> bool {
        model.starts_with("claude")
    }

    /// Project id from an `onboardUser` LRO response, wherever it landed.
    fn project_from_onboard(value: &Value) -> Option<String> {
        let node = value.get("response").unwrap_or(value);
        node.get("cloudaicompanionProject")
            .and_then(|p| p.get("id").or(Some(p)))
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    async fn discover_account(&self, access_token: &str) -> Result<(Option<String>, Option<String>), ProxyError> {
        let discovery = self.client.load_code_assist(access_token).await?;
        let tier = discovery.tier_id().map(str::to_string);

        if let Some(project) = discovery.cloudaicompanion_project.clone() {
            return Ok((Some(project), tier));
        }

        // Fresh consumer accounts need onboarding before a project exists.
        let tier_id = tier.as_deref().unwrap_or("free-tier");
        let onboarded = self.client.onboard_user(access_token, tier_id).await?;
        Ok((Self::project_from_onboard(&onboarded), tier))
    }
}

#[async_trait]
impl Provider for AntigravityProvider {
    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn context(&self) -> &ProviderContext {
        &self.ctx
    }

    fn refresh_buffer(&self) -> ChronoDuration {
        ChronoDuration::minutes(60)
    }

    fn resolve_model(&self, model: &str) -> String {
        MODEL_ALIASES
            .iter()
            .find(|(from, _)| *from == model)
            .map_or_else(|| model.to_string(), |(_, to)| (*to).to_string())
    }

    fn auth_url(&self, state: &str, code_verifier: Option<&str>) -> Result<Url, ProxyError> {
        self.oauth.auth_url(state, code_verifier)
    }

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<OAuthResult, ProxyError> {
        let mut result = self
            .oauth
            .exchange_code(&self.ctx.http, code, redirect_uri, code_verifier)
            .await?;

        let (project_id, tier) = self.discover_account(&result.access_token).await?;
        info!(
            project = project_id.as_deref().unwrap_or("<none>"),
            tier = tier.as_deref().unwrap_or("<unknown>"),
            "Antigravity account discovered"
        );

        result.project_id = project_id;
        result.tier = tier;
        Ok(result)
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<OAuthResult, ProxyError> {
        self.oauth.refresh(&self.ctx.http, refresh_token).await
    }

    async fn make_request(
        &self,
        credential: &str,
        account: &super::Account,
        ctx: &RequestContext,
        body: &ChatCompletionRequest,
    ) -> Result<ProviderResponse, ProxyError> {
        let model = self.resolve_model(&ctx.bare_model);
        let mut request = chat_to_gemini_request(body);

        if Self::is_claude_model(&model) {
            apply_claude_envelope(&mut request, &model);
        } else {
            let scope = KeyScope::new(family_for_model(&model), &ctx.session_id);
            let stats = apply_gemini_envelope(&mut request, &self.sigstore, &scope);
            debug!(
                thoughts_patched = stats.thoughts_patched,
                thoughts_dropped = stats.thoughts_dropped,
                "Thought signatures applied"
            );
        }

        let envelope = CodeAssistEnvelope::new(
            account.project_id.clone(),
            &model,
            &ctx.request_id,
            &ctx.session_id,
            request,
        );

        // Claude behind Code Assist only streams; buffer for non-streaming
        // callers instead of switching the upstream mode.
        let upstream_stream = ctx.stream || Self::is_claude_model(&model);

        let extra_headers: &[(&str, &str)] = if model.ends_with("-thinking") {
            &[("anthropic-beta", "interleaved-thinking-2025-05-14")]
        } else {
            &[]
        };

        let resp = self
            .client
            .generate(credential, &envelope, upstream_stream, extra_headers)
            .await?;

        if !resp.status().is_success() {
            return Err(classify_error_response(resp).await);
        }

        let scope = KeyScope::new(family_for_model(&model), &ctx.session_id);
        let sniffer = SignatureSniffer::new(self.sigstore.clone(), scope);

        if upstream_stream {
            let state =
                GeminiSseState::new(&ctx.requested_model, ctx.include_reasoning, ctx.schemas.clone());
            let stream = gemini_chunk_stream(resp, state, Some(sniffer));

            if ctx.stream {
                Ok(ProviderResponse::Stream(stream))
            } else {
                let chunks = collect_chunks(stream).await?;
                Ok(ProviderResponse::Completion(Box::new(
                    merge_buffered_chunks(&chunks, &ctx.requested_model),
                )))
            }
        } else {
            let value: Value = resp.json().await?;
            let response = unwrap_response(value).ok_or_else(|| {
                ProxyError::ProtocolMismatch("upstream body is not a Gemini response".to_string())
            })?;

            let mut sniffer = sniffer;
            sniffer.inspect(&response);
            drop(sniffer);

            Ok(ProviderResponse::Completion(Box::new(
                gemini_to_chat_completion(
                    &response,
                    &format!("chatcmpl-{}", uuid::Uuid::new_v4()),
                    chrono::Utc::now().timestamp(),
                    &ctx.requested_model,
                    ctx.include_reasoning,
                    &ctx.schemas,
                ),
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opus_alias_resolves_to_thinking_variant() {
        let aliased = MODEL_ALIASES
            .iter()
            .find(|(from, _)| *from == "claude-opus-4-5")
            .unwrap();
        assert_eq!(aliased.1, "claude-opus-4-5-thinking");
    }

    #[test]
    fn onboard_project_extraction_handles_lro_wrapping() {
        let wrapped = serde_json::json!({
            "done": true,
            "response": {"cloudaicompanionProject": {"id": "proj-1"}}
        });
        assert_eq!(
            AntigravityProvider::project_from_onboard(&wrapped).as_deref(),
            Some("proj-1")
        );

        let bare = serde_json::json!({"cloudaicompanionProject": "proj-2"});
        assert_eq!(
            AntigravityProvider::project_from_onboard(&bare).as_deref(),
            Some("proj-2")
        );
    }

    #[test]
    fn claude_detection() {
        assert!(AntigravityProvider::is_claude_model("claude-sonnet-4-5"));
        assert!(!AntigravityProvider::is_claude_model("gemini-3-pro"));
    }
}
