use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use hmac::{Hmac, Mac};
use oauth2::{PkceCodeChallenge, PkceCodeVerifier};
use serde::Deserialize;
use sha2::Sha256;
use tracing::warn;
use url::Url;

use crate::config::{IFLOW_CLIENT_NAME, IflowResolvedConfig};
use crate::dispatch::RequestContext;
use crate::error::{OauthError, ProxyError};
use switchboard_schema::openai::{ChatCompletion, ChatCompletionRequest};

use super::streaming::passthrough_chunk_stream;
use super::{
    NONSTREAM_TIMEOUT_SECS, OAuthResult, Provider, ProviderConfig, ProviderContext,
    ProviderResponse, classify_error_response,
};

pub const IFLOW_USER_AGENT: &str = "iflow-cli/1.5.2";

type HmacSha256 = Hmac<Sha256>;

/// iFlow wraps some payloads in `{"data": ...}` and returns others bare;
/// both shapes must be accepted.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MaybeWrapped<T> {
    Wrapped { data: T },
    Bare(T),
}

impl<T> MaybeWrapped<T> {
    fn into_inner(self) -> T {
        match self {
            MaybeWrapped::Wrapped { data } => data,
            MaybeWrapped::Bare(inner) => inner,
        }
    }
}

#[derive(Debug, Deserialize)]
struct IflowTokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IflowUserInfo {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    api_key: Option<String>,
}

/// Request signature: `HMAC-SHA256(apiKey, "{clientName}:{sessionId}:{ts}")`,
/// hex encoded.
pub(crate) fn sign_request(api_key: &str, session_id: &str, ts_millis: i64) -> String {
    let mut mac = HmacSha256::new_from_slice(api_key.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(format!("{IFLOW_CLIENT_NAME}:{session_id}:{ts_millis}").as_bytes());

    mac.finalize()
        .into_bytes()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

pub struct IflowProvider {
    config: ProviderConfig,
    ctx: ProviderContext,
    cfg: IflowResolvedConfig,
}

impl IflowProvider {
    pub fn new(ctx: ProviderContext, cfg: IflowResolvedConfig) -> Self {
        Self {
            config: ProviderConfig::new("iflow", "iFlow", cfg.model_list.iter().cloned()),
            ctx,
            cfg,
        }
    }

    async fn fetch_user_info(&self, access_token: &str) -> Result<IflowUserInfo, ProxyError> {
        let resp = self
            .ctx
            .http
            .get(self.cfg.user_info_url.clone())
            .bearer_auth(access_token)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(ProxyError::Oauth(OauthError::UpstreamStatus(resp.status())));
        }

        Ok(resp
            .json::<MaybeWrapped<IflowUserInfo>>()
            .await?
            .into_inner())
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

        let token = resp
            .json::<MaybeWrapped<IflowTokenResponse>>()
            .await?
            .into_inner();

        Ok(OAuthResult::tokens(
            token.access_token,
            token.refresh_token.unwrap_or_default(),
            Utc::now() + ChronoDuration::seconds(token.expires_in.unwrap_or(3600)),
        ))
    }
}

#[async_trait]
impl Provider for IflowProvider {
    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn context(&self) -> &ProviderContext {
        &self.ctx
    }

    /// iFlow keys are long-lived; refreshing a day ahead keeps the chat key
    /// fresh without racing expiry.
    fn refresh_buffer(&self) -> ChronoDuration {
        ChronoDuration::hours(24)
    }

    /// Chat calls authenticate with the separate apiKey, not the OAuth
    /// access token.
    fn credential_of(&self, account: &super::Account) -> String {
        account
            .api_key
            .clone()
            .unwrap_or_else(|| account.access_token.clone())
    }

    fn auth_url(&self, state: &str, code_verifier: Option<&str>) -> Result<Url, ProxyError> {
        let mut url = self.cfg.oauth_auth_url.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("client_id", &self.cfg.oauth_client_id)
                .append_pair("redirect_uri", self.cfg.oauth_redirect_url.as_str())
                .append_pair("response_type", "code")
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
        if !self.cfg.oauth_client_secret.is_empty() {
            form.push(("client_secret", self.cfg.oauth_client_secret.as_str()));
        }
        if let Some(verifier) = code_verifier {
            form.push(("code_verifier", verifier));
        }

        let mut result = self.token_request(&form).await?;

        let info = self.fetch_user_info(&result.access_token).await?;
        result.email = info.email;
        result.api_key = info.api_key;
        Ok(result)
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<OAuthResult, ProxyError> {
        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("client_id", self.cfg.oauth_client_id.as_str()),
            ("refresh_token", refresh_token),
        ];
        if !self.cfg.oauth_client_secret.is_empty() {
            form.push(("client_secret", self.cfg.oauth_client_secret.as_str()));
        }

        let mut result = self.token_request(&form).await?;
        if result.refresh_token.is_empty() {
            result.refresh_token = refresh_token.to_string();
        }

        // A fresh apiKey is nice to have; the stored one keeps working if
        // the user-info endpoint is down.
        match self.fetch_user_info(&result.access_token).await {
            Ok(info) => {
                result.email = info.email;
                result.api_key = info.api_key;
            }
            Err(e) => {
                warn!(error = %e, "iFlow user-info failed on refresh; keeping stored apiKey");
            }
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

        let ts = Utc::now().timestamp_millis();
        let signature = sign_request(credential, &ctx.session_id, ts);

        let mut builder = self
            .ctx
            .http
            .post(self.cfg.api_url.clone())
            .bearer_auth(credential)
            .header("x-iflow-signature", signature)
            .header("x-iflow-timestamp", ts.to_string())
            .header("x-iflow-session-id", &ctx.session_id);

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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn signature_is_hex_hmac_over_client_session_ts() {
        let sig = sign_request("key-1", "session-1", 1_700_000_000_000);
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
        // Deterministic for fixed inputs, distinct across keys.
        assert_eq!(sig, sign_request("key-1", "session-1", 1_700_000_000_000));
        assert_ne!(sig, sign_request("key-2", "session-1", 1_700_000_000_000));
        assert_ne!(sig, sign_request("key-1", "session-2", 1_700_000_000_000));
    }

    #[test]
    fn wrapped_and_bare_token_payloads_both_parse() {
        let bare: MaybeWrapped<IflowTokenResponse> = serde_json::from_value(json!({
            "access_token": "at", "refresh_token": "rt", "expires_in": 7200
        }))
        .unwrap();
        assert_eq!(bare.into_inner().access_token, "at");

        let wrapped: MaybeWrapped<IflowTokenResponse> = serde_json::from_value(json!({
            "data": {"access_token": "at2", "refresh_token": "rt2", "expires_in": 7200}
        }))
        .unwrap();
        assert_eq!(wrapped.into_inner().access_token, "at2");
    }

    #[test]
    fn user_info_accepts_both_shapes() {
        let wrapped: MaybeWrapped<IflowUserInfo> = serde_json::from_value(json!({
            "data": {"email": "a@b.c", "apiKey": "sk-x"}
        }))
        .unwrap();
        let info = wrapped.into_inner();
        assert_eq!(info.email.as_deref(), Some("a@b.c"));
        assert_eq!(info.api_key.as_deref(), Some("sk-x"));
    }
}
