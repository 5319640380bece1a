use serde::{Deserialize, Serialize};
use url::Url;

use super::{ProviderDefaults, env_or};
use crate::config::BasicConfig;

/// Google Code Assist API surfaces. The three bases serve the same RPCs but
/// differ in rollout stage; call sites try them in a surface-specific order.
pub const CODE_ASSIST_PROD: &str = "https://cloudcode-pa.googleapis.com";
pub const CODE_ASSIST_DAILY: &str = "https://daily-cloudcode-pa.sandbox.googleapis.com";
pub const CODE_ASSIST_AUTOPUSH: &str = "https://autopush-cloudcode-pa.sandbox.googleapis.com";

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Antigravity's loopback OAuth callback. The IDE registers this exact
/// redirect with Google, so it is not configurable.
const ANTIGRAVITY_REDIRECT_URL: &str = "http://localhost:11451/oauth2callback";

const ANTIGRAVITY_CLIENT_ID: &str =
    "1071006060591-tmhssin2h21lcre235vtolojh4g403ep.apps.googleusercontent.com";
const ANTIGRAVITY_CLIENT_SECRET: &str = "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";

const GEMINI_CLI_CLIENT_ID: &str =
    "681255809395-oo8ft2oprdrnp9e3aqf6av3hmdib135j.apps.googleusercontent.com";
const GEMINI_CLI_CLIENT_SECRET: &str = "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";

/// Antigravity provider configuration.
///
/// OAuth endpoints and client credentials are fixed built-ins; only the
/// `*_CLIENT_ID`/`*_CLIENT_SECRET` environment variables can override them.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AntigravityConfig {
    /// Optional upstream HTTP proxy.
    /// Falls back to `providers.defaults.proxy` when unset.
    #[serde(default)]
    pub proxy: Option<Url>,

    /// List of supported model names (allowlist).
    /// TOML: `providers.antigravity.model_list`.
    #[serde(default = "default_antigravity_models")]
    pub model_list: Vec<String>,

    #[serde(default)]
    pub enable_multiplexing: Option<bool>,

    #[serde(default)]
    pub retry_max_times: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct AntigravityResolvedConfig {
    pub proxy: Option<Url>,
    pub model_list: Vec<String>,
    pub enable_multiplexing: bool,
    pub retry_max_times: usize,
    pub retry_base_ms: u64,
    pub oauth_auth_url: Url,
    pub oauth_token_url: Url,
    pub oauth_redirect_url: Url,
    pub oauth_client_id: String,
    pub oauth_client_secret: String,
    pub oauth_scopes: Vec<String>,
}

impl AntigravityConfig {
    pub fn resolve(&self, defaults: &ProviderDefaults) -> AntigravityResolvedConfig {
        AntigravityResolvedConfig {
            proxy: self.proxy.clone().or_else(|| defaults.proxy.clone()),
            model_list: self.model_list.clone(),
            enable_multiplexing: self
                .enable_multiplexing
                .unwrap_or(defaults.enable_multiplexing),
            retry_max_times: self.retry_max_times.unwrap_or(defaults.retry_max_times),
            retry_base_ms: defaults.retry_base_ms,
            oauth_auth_url: Url::parse(GOOGLE_AUTH_URL).expect("built-in auth URL must parse"),
            oauth_token_url: Url::parse(GOOGLE_TOKEN_URL).expect("built-in token URL must parse"),
            oauth_redirect_url: Url::parse(ANTIGRAVITY_REDIRECT_URL)
                .expect("built-in redirect URL must parse"),
            oauth_client_id: env_or("ANTIGRAVITY_CLIENT_ID", ANTIGRAVITY_CLIENT_ID),
            oauth_client_secret: env_or("ANTIGRAVITY_CLIENT_SECRET", ANTIGRAVITY_CLIENT_SECRET),
            oauth_scopes: google_scopes_full(),
        }
    }
}

impl Default for AntigravityConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            model_list: default_antigravity_models(),
            enable_multiplexing: None,
            retry_max_times: None,
        }
    }
}

/// Gemini CLI provider configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GeminiCliConfig {
    #[serde(default)]
    pub proxy: Option<Url>,

    /// Optional Cloud project override for all Gemini CLI accounts.
    /// TOML: `providers.gemini_cli.project_id`. Env `GEMINI_CLI_PROJECT_ID`.
    #[serde(default)]
    pub project_id: Option<String>,

    #[serde(default = "default_gemini_cli_models")]
    pub model_list: Vec<String>,

    #[serde(default)]
    pub enable_multiplexing: Option<bool>,

    #[serde(default)]
    pub retry_max_times: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct GeminiCliResolvedConfig {
    pub proxy: Option<Url>,
    pub project_id: Option<String>,
    pub model_list: Vec<String>,
    pub enable_multiplexing: bool,
    pub retry_max_times: usize,
    pub retry_base_ms: u64,
    pub oauth_auth_url: Url,
    pub oauth_token_url: Url,
    pub oauth_redirect_url: Url,
    pub oauth_client_id: String,
    pub oauth_client_secret: String,
    pub oauth_scopes: Vec<String>,
}

impl GeminiCliConfig {
    pub fn resolve(
        &self,
        defaults: &ProviderDefaults,
        basic: &BasicConfig,
    ) -> GeminiCliResolvedConfig {
        let project_id = std::env::var("GEMINI_CLI_PROJECT_ID")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| self.project_id.clone());

        let oauth_redirect_url = basic
            .base_url
            .join("/oauth/gemini_cli/callback")
            .expect("base_url joined with a fixed path must parse");

        GeminiCliResolvedConfig {
            proxy: self.proxy.clone().or_else(|| defaults.proxy.clone()),
            project_id,
            model_list: self.model_list.clone(),
            enable_multiplexing: self
                .enable_multiplexing
                .unwrap_or(defaults.enable_multiplexing),
            retry_max_times: self.retry_max_times.unwrap_or(defaults.retry_max_times),
            retry_base_ms: defaults.retry_base_ms,
            oauth_auth_url: Url::parse(GOOGLE_AUTH_URL).expect("built-in auth URL must parse"),
            oauth_token_url: Url::parse(GOOGLE_TOKEN_URL).expect("built-in token URL must parse"),
            oauth_redirect_url,
            oauth_client_id: env_or("GEMINI_CLI_CLIENT_ID", GEMINI_CLI_CLIENT_ID),
            oauth_client_secret: env_or("GEMINI_CLI_CLIENT_SECRET", GEMINI_CLI_CLIENT_SECRET),
            oauth_scopes: google_scopes_basic(),
        }
    }
}

impl Default for GeminiCliConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            project_id: None,
            model_list: default_gemini_cli_models(),
            enable_multiplexing: None,
            retry_max_times: None,
        }
    }
}

fn default_antigravity_models() -> Vec<String> {
    [
        "claude-sonnet-4-5",
        "claude-sonnet-4-5-thinking",
        "claude-opus-4-5",
        "claude-opus-4-5-thinking",
        "gemini-3-pro",
        "gemini-3-flash",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

fn default_gemini_cli_models() -> Vec<String> {
    ["gemini-2.5-pro", "gemini-2.5-flash"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn google_scopes_basic() -> Vec<String> {
    [
        "https://www.googleapis.com/auth/cloud-platform",
        "https://www.googleapis.com/auth/userinfo.email",
        "https://www.googleapis.com/auth/userinfo.profile",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

fn google_scopes_full() -> Vec<String> {
    let mut scopes = google_scopes_basic();
    scopes.push("https://www.googleapis.com/auth/cclog".to_string());
    scopes.push("https://www.googleapis.com/auth/experimentsandconfigs".to_string());
    scopes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn antigravity_redirect_is_the_fixed_loopback() {
        let resolved = AntigravityConfig::default().resolve(&ProviderDefaults::default());
        assert_eq!(
            resolved.oauth_redirect_url.as_str(),
            "http://localhost:11451/oauth2callback"
        );
    }

    #[test]
    fn gemini_cli_redirect_derives_from_base_url() {
        let basic = BasicConfig::default();
        let resolved = GeminiCliConfig::default().resolve(&ProviderDefaults::default(), &basic);
        assert_eq!(
            resolved.oauth_redirect_url.as_str(),
            "http://localhost:8553/oauth/gemini_cli/callback"
        );
    }

    #[test]
    fn antigravity_scopes_include_cclog() {
        let resolved = AntigravityConfig::default().resolve(&ProviderDefaults::default());
        assert!(
            resolved
                .oauth_scopes
                .iter()
                .any(|s| s.ends_with("/cclog"))
        );
    }
}
