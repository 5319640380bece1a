use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use crate::config::GeminiCliResolvedConfig;
use crate::convert::{
    GeminiSseState, apply_gemini_envelope, chat_to_gemini_request, gemini_to_chat_completion,
};
use crate::dispatch::RequestContext;
use crate::error::ProxyError;
use crate::ratelimit::family_for_model;
use switchboard_schema::codeassist::{CodeAssistEnvelope, unwrap_response};
use switchboard_schema::openai::ChatCompletionRequest;
use switchboard_thoughtsig::{KeyScope, SignatureSniffer, SignatureStore};

use super::google_code_assist::{CodeAssistClient, GoogleOauth};
use super::streaming::gemini_chunk_stream;
use super::{
    OAuthResult, Provider, ProviderConfig, ProviderContext, ProviderResponse,
    classify_error_response,
};

pub const GEMINI_CLI_USER_AGENT: &str = "GeminiCLI/0.8.1 (linux; x64)";

pub struct GeminiCliProvider {
    config: ProviderConfig,
    ctx: ProviderContext,
    client: CodeAssistClient,
    oauth: GoogleOauth,
    sigstore: Arc<SignatureStore>,
    project_override: Option<String>,
}

impl GeminiCliProvider {
    pub fn new(
        ctx: ProviderContext,
        cfg: &GeminiCliResolvedConfig,
        sigstore: Arc<SignatureStore>,
    ) -> Self {
        let client = CodeAssistClient::new(ctx.http.clone(), "IDE_UNSPECIFIED");
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
                "gemini_cli",
                "Gemini CLI",
                cfg.model_list.iter().cloned(),
            ),
            ctx,
            client,
            oauth,
            sigstore,
            project_override: cfg.project_id.clone(),
        }
    }
}

#[async_trait]
impl Provider for GeminiCliProvider {
    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn context(&self) -> &ProviderContext {
        &self.ctx
    }

    fn refresh_buffer(&self) -> ChronoDuration {
        ChronoDuration::minutes(30)
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

        if let Some(project) = &self.project_override {
            result.project_id = Some(project.clone());
            return Ok(result);
        }

        let discovery = self.client.load_code_assist(&result.access_token).await?;
        result.tier = discovery.tier_id().map(str::to_string);
        result.project_id = discovery.cloudaicompanion_project;
        info!(
            project = result.project_id.as_deref().unwrap_or("<none>"),
            tier = result.tier.as_deref().unwrap_or("<unknown>"),
            "Gemini CLI account discovered"
        );

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
        let family = family_for_model(&model).to_string();
        let scope = KeyScope::new(&family, &ctx.session_id);

        let mut request = chat_to_gemini_request(body);
        let stats = apply_gemini_envelope(&mut request, &self.sigstore, &scope);
        debug!(
            thoughts_patched = stats.thoughts_patched,
            thoughts_dropped = stats.thoughts_dropped,
            calls_stamped = stats.calls_stamped,
            "Thought signatures applied"
        );

        let project = self
            .project_override
            .clone()
            .or_else(|| account.project_id.clone());
        let envelope = CodeAssistEnvelope::new(
            project,
            &model,
            &ctx.request_id,
            &ctx.session_id,
            request,
        );

        let resp = self
            .client
            .generate(credential, &envelope, ctx.stream, &[])
            .await?;

        if !resp.status().is_success() {
            return Err(classify_error_response(resp).await);
        }

        let sniffer = SignatureSniffer::new(self.sigstore.clone(), scope);

        if ctx.stream {
            let state = GeminiSseState::new(
                &ctx.requested_model,
                ctx.include_reasoning,
                ctx.schemas.clone(),
            );
            Ok(ProviderResponse::Stream(gemini_chunk_stream(
                resp,
                state,
                Some(sniffer),
            )))
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
