use chrono::{Duration as ChronoDuration, Utc};
use oauth2::{
    AuthorizationCode, CsrfToken, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, RefreshToken,
    Scope, TokenResponse,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::config::{CODE_ASSIST_AUTOPUSH, CODE_ASSIST_DAILY, CODE_ASSIST_PROD};
use crate::error::ProxyError;
use crate::oauth::build_oauth2_client;
use crate::utils::jwt;
use switchboard_schema::codeassist::{CodeAssistEnvelope, LoadCodeAssistResponse};

use super::OAuthResult;

/// Rollout-stage fallback orders, one per RPC surface.
const GENERATE_ORDER: [&str; 3] = [CODE_ASSIST_DAILY, CODE_ASSIST_AUTOPUSH, CODE_ASSIST_PROD];
const DISCOVERY_ORDER: [&str; 2] = [CODE_ASSIST_PROD, CODE_ASSIST_DAILY];
const ONBOARD_ORDER: [&str; 2] = [CODE_ASSIST_DAILY, CODE_ASSIST_PROD];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientMetadata {
    ide_type: &'static str,
    platform: &'static str,
    plugin_type: &'static str,
}

impl ClientMetadata {
    fn for_ide(ide_type: &'static str) -> Self {
        Self {
            ide_type,
            platform: "PLATFORM_UNSPECIFIED",
            plugin_type: "GEMINI",
        }
    }
}

/// Thin client over the Code Assist RPC surfaces shared by the Antigravity
/// and Gemini CLI providers.
pub(crate) struct CodeAssistClient {
    http: reqwest::Client,
    ide_type: &'static str,
}

impl CodeAssistClient {
    pub(crate) fn new(http: reqwest::Client, ide_type: &'static str) -> Self {
        Self { http, ide_type }
    }

    fn generate_url(base: &str, stream: bool) -> String {
        if stream {
            format!("{base}/v1internal:streamGenerateContent?alt=sse")
        } else {
            format!("{base}/v1internal:generateContent")
        }
    }

    fn client_metadata(&self) -> String {
        format!(
            "ideType={},platform=PLATFORM_UNSPECIFIED,pluginType=GEMINI",
            self.ide_type
        )
    }

    /// POST the envelope, walking the rollout bases. Transport failures and
    /// 5xx move to the next base; anything else is final. `extra_headers`
    /// carries per-model additions (the Claude-thinking beta flag).
    pub(crate) async fn generate(
        &self,
        access_token: &str,
        envelope: &CodeAssistEnvelope,
        stream: bool,
        extra_headers: &[(&str, &str)],
    ) -> Result<reqwest::Response, ProxyError> {
        let mut last_err: Option<ProxyError> = None;

        for base in GENERATE_ORDER {
            let url = Self::generate_url(base, stream);
            let mut request = self
                .http
                .post(&url)
                .bearer_auth(access_token)
                .header("X-Goog-Api-Client", "gl-node/22.17.0")
                .header("Client-Metadata", self.client_metadata())
                .json(envelope);
            for (name, value) in extra_headers {
                request = request.header(*name, *value);
            }
            if !stream {
                request = request.timeout(std::time::Duration::from_secs(
                    super::NONSTREAM_TIMEOUT_SECS,
                ));
            }
            let result = request.send().await;

            match result {
                Ok(resp) if resp.status().is_server_error() => {
                    warn!(base, status = %resp.status(), "Code Assist base unavailable, trying next");
                    last_err = Some(ProxyError::UpstreamTransient(format!(
                        "{base} returned {}",
                        resp.status()
                    )));
                }
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    warn!(base, error = %e, "Code Assist base unreachable, trying next");
                    last_err = Some(ProxyError::Reqwest(e));
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| ProxyError::Internal("no Code Assist base configured".to_string())))
    }

    /// Project/tier discovery (`loadCodeAssist`), prod-first.
    pub(crate) async fn load_code_assist(
        &self,
        access_token: &str,
    ) -> Result<LoadCodeAssistResponse, ProxyError> {
        let body = serde_json::json!({ "metadata": ClientMetadata::for_ide(self.ide_type) });

        self.post_fallback(&DISCOVERY_ORDER, "loadCodeAssist", access_token, &body)
            .await?
            .json::<LoadCodeAssistResponse>()
            .await
            .map_err(ProxyError::from)
    }

    /// Free-tier onboarding (`onboardUser`), daily-first.
    pub(crate) async fn onboard_user(
        &self,
        access_token: &str,
        tier_id: &str,
    ) -> Result<Value, ProxyError> {
        let body = serde_json::json!({
            "tierId": tier_id,
            "metadata": ClientMetadata::for_ide(self.ide_type),
        });

        self.post_fallback(&ONBOARD_ORDER, "onboardUser", access_token, &body)
            .await?
            .json::<Value>()
            .await
            .map_err(ProxyError::from)
    }

    async fn post_fallback(
        &self,
        bases: &[&str],
        rpc: &str,
        access_token: &str,
        body: &Value,
    ) -> Result<reqwest::Response, ProxyError> {
        let mut last_err: Option<ProxyError> = None;

        for base in bases {
            let url = format!("{base}/v1internal:{rpc}");
            match self
                .http
                .post(&url)
                .bearer_auth(access_token)
                .json(body)
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) => {
                    let status = resp.status();
                    debug!(base, rpc, %status, "Code Assist RPC rejected, trying next base");
                    last_err = Some(if status.as_u16() == 401 {
                        ProxyError::Unauthorized(format!("{rpc} rejected the token"))
                    } else {
                        ProxyError::UpstreamTransient(format!("{rpc} at {base} returned {status}"))
                    });
                }
                Err(e) => {
                    debug!(base, rpc, error = %e, "Code Assist RPC unreachable, trying next base");
                    last_err = Some(ProxyError::Reqwest(e));
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| ProxyError::Internal("no Code Assist base configured".to_string())))
    }
}

/// OAuth endpoints + client identity for one Google-backed provider.
pub(crate) struct GoogleOauth {
    pub client_id: String,
    pub client_secret: String,
    pub auth_url: Url,
    pub token_url: Url,
    pub redirect_url: Url,
    pub scopes: Vec<String>,
}

impl GoogleOauth {
    fn oauth2_client(
        &self,
        redirect_uri: &str,
    ) -> Result<crate::oauth::StandardOauth2Client, ProxyError> {
        build_oauth2_client(
            &self.client_id,
            Some(&self.client_secret),
            self.auth_url.as_str(),
            self.token_url.as_str(),
            RedirectUrl::new(redirect_uri.to_string())
                .map_err(|e| ProxyError::Internal(format!("invalid redirect url: {e}")))?,
        )
    }

    /// Authorization URL with offline access and a caller-supplied state
    /// and PKCE verifier.
    pub(crate) fn auth_url(
        &self,
        state: &str,
        code_verifier: Option<&str>,
    ) -> Result<Url, ProxyError> {
        let client = self.oauth2_client(self.redirect_url.as_str())?;
        let state = state.to_string();

        let mut request = client
            .authorize_url(move || CsrfToken::new(state))
            .add_extra_param("access_type", "offline")
            .add_extra_param("prompt", "consent");

        for scope in &self.scopes {
            request = request.add_scope(Scope::new(scope.clone()));
        }

        if let Some(verifier) = code_verifier {
            let challenge =
                PkceCodeChallenge::from_code_verifier_sha256(&PkceCodeVerifier::new(
                    verifier.to_string(),
                ));
            request = request.set_pkce_challenge(challenge);
        }

        let (url, _) = request.url();
        Ok(url)
    }

    pub(crate) async fn exchange_code(
        &self,
        http: &reqwest::Client,
        code: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<OAuthResult, ProxyError> {
        // Callers pass "" to mean "the redirect the flow started with".
        let redirect_uri = if redirect_uri.is_empty() {
            self.redirect_url.as_str()
        } else {
            redirect_uri
        };
        let client = self.oauth2_client(redirect_uri)?;

        let mut request = client.exchange_code(AuthorizationCode::new(code.to_string()));
        if let Some(verifier) = code_verifier {
            request = request.set_pkce_verifier(PkceCodeVerifier::new(verifier.to_string()));
        }

        let token = request.request_async(http).await.map_err(ProxyError::from)?;
        Ok(oauth_result_from_token(&token, None))
    }

    pub(crate) async fn refresh(
        &self,
        http: &reqwest::Client,
        refresh_token: &str,
    ) -> Result<OAuthResult, ProxyError> {
        let client = self.oauth2_client(self.redirect_url.as_str())?;

        let token = client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(http)
            .await
            .map_err(ProxyError::from)?;

        // Google does not rotate refresh tokens; keep the old one when the
        // response omits it.
        Ok(oauth_result_from_token(&token, Some(refresh_token)))
    }
}

pub(crate) fn oauth_result_from_token(
    token: &crate::oauth::OauthTokenResponse,
    fallback_refresh: Option<&str>,
) -> OAuthResult {
    let expires_in = token
        .expires_in()
        .map_or(3600, |d| d.as_secs().min(i64::MAX as u64) as i64);

    let refresh_token = token
        .refresh_token()
        .map(|t| t.secret().clone())
        .or_else(|| fallback_refresh.map(str::to_string))
        .unwrap_or_default();

    let email = token
        .extra_fields()
        .id_token
        .as_deref()
        .and_then(jwt::decode_claims)
        .and_then(|claims| {
            claims
                .get("email")
                .and_then(Value::as_str)
                .map(str::to_string)
        });

    let mut result = OAuthResult::tokens(
        token.access_token().secret().clone(),
        refresh_token,
        Utc::now() + ChronoDuration::seconds(expires_in),
    );
    result.email = email;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oauth() -> GoogleOauth {
        GoogleOauth {
            client_id: "client-id".to_string(),
            client_secret: "secret".to_string(),
            auth_url: Url::parse("https://accounts.google.com/o/oauth2/v2/auth").unwrap(),
            token_url: Url::parse("https://oauth2.googleapis.com/token").unwrap(),
            redirect_url: Url::parse("http://localhost:11451/oauth2callback").unwrap(),
            scopes: vec!["scope-a".to_string(), "scope-b".to_string()],
        }
    }

    #[test]
    fn auth_url_carries_offline_consent_state_and_pkce() {
        let url = oauth()
            .auth_url("state-123", Some("a".repeat(43).as_str()))
            .unwrap();
        let query: std::collections::HashMap<_, _> = url.query_pairs().collect();

        assert_eq!(query.get("access_type").map(AsRef::as_ref), Some("offline"));
        assert_eq!(query.get("prompt").map(AsRef::as_ref), Some("consent"));
        assert_eq!(query.get("state").map(AsRef::as_ref), Some("state-123"));
        assert_eq!(
            query.get("code_challenge_method").map(AsRef::as_ref),
            Some("S256")
        );
        assert!(query.contains_key("code_challenge"));
        assert!(query.get("scope").is_some_and(|s| s.contains("scope-a")));
        assert_eq!(
            query.get("redirect_uri").map(AsRef::as_ref),
            Some("http://localhost:11451/oauth2callback")
        );
    }

    #[test]
    fn generate_urls_select_stream_suffix() {
        assert_eq!(
            CodeAssistClient::generate_url(CODE_ASSIST_DAILY, true),
            format!("{CODE_ASSIST_DAILY}/v1internal:streamGenerateContent?alt=sse")
        );
        assert_eq!(
            CodeAssistClient::generate_url(CODE_ASSIST_PROD, false),
            format!("{CODE_ASSIST_PROD}/v1internal:generateContent")
        );
    }

    #[test]
    fn fallback_orders_match_rollout_policy() {
        assert_eq!(
            GENERATE_ORDER,
            [CODE_ASSIST_DAILY, CODE_ASSIST_AUTOPUSH, CODE_ASSIST_PROD]
        );
        assert_eq!(DISCOVERY_ORDER, [CODE_ASSIST_PROD, CODE_ASSIST_DAILY]);
        assert_eq!(ONBOARD_ORDER, [CODE_ASSIST_DAILY, CODE_ASSIST_PROD]);
    }
}
