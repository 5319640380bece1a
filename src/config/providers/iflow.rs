use serde::{Deserialize, Serialize};
use url::Url;

use super::{ProviderDefaults, env_or};

const IFLOW_CLIENT_ID: &str = "10009311001";
const IFLOW_CLIENT_SECRET: &str = "";
const IFLOW_AUTH_URL: &str = "https://iflow.cn/oauth";
const IFLOW_TOKEN_URL: &str = "https://iflow.cn/oauth/token";
const IFLOW_USER_INFO_URL: &str = "https://iflow.cn/api/oauth/getUserInfo";
const IFLOW_API_URL: &str = "https://apis.iflow.cn/v1/chat/completions";

/// The loopback callback iFlow registers for its CLI clients.
const IFLOW_REDIRECT_URL: &str = "http://localhost:11451/oauth2callback";

/// Client name used in the request signature
/// (`HMAC-SHA256(apiKey, "{clientName}:{sessionId}:{ts}")`).
pub const IFLOW_CLIENT_NAME: &str = "iflow-cli";

/// iFlow provider configuration.
///
/// iFlow splits credentials: the OAuth access token authenticates the
/// account surface, while chat calls use a separate `apiKey` fetched from
/// the user-info endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct IflowConfig {
    #[serde(default)]
    pub proxy: Option<Url>,

    #[serde(default = "default_iflow_models")]
    pub model_list: Vec<String>,

    #[serde(default)]
    pub enable_multiplexing: Option<bool>,

    #[serde(default)]
    pub retry_max_times: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct IflowResolvedConfig {
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
    pub user_info_url: Url,
    pub api_url: Url,
}

impl IflowConfig {
    pub fn resolve(&self, defaults: &ProviderDefaults) -> IflowResolvedConfig {
        IflowResolvedConfig {
            proxy: self.proxy.clone().or_else(|| defaults.proxy.clone()),
            model_list: self.model_list.clone(),
            enable_multiplexing: self
                .enable_multiplexing
                .unwrap_or(defaults.enable_multiplexing),
            retry_max_times: self.retry_max_times.unwrap_or(defaults.retry_max_times),
            retry_base_ms: defaults.retry_base_ms,
            oauth_auth_url: Url::parse(IFLOW_AUTH_URL).expect("built-in auth URL must parse"),
            oauth_token_url: Url::parse(IFLOW_TOKEN_URL).expect("built-in token URL must parse"),
            oauth_redirect_url: Url::parse(IFLOW_REDIRECT_URL)
                .expect("built-in redirect URL must parse"),
            oauth_client_id: env_or("IFLOW_CLIENT_ID", IFLOW_CLIENT_ID),
            oauth_client_secret: env_or("IFLOW_CLIENT_SECRET", IFLOW_CLIENT_SECRET),
            user_info_url: Url::parse(IFLOW_USER_INFO_URL)
                .expect("built-in user info URL must parse"),
            api_url: Url::parse(IFLOW_API_URL).expect("built-in api URL must parse"),
        }
    }
}

impl Default for IflowConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            model_list: default_iflow_models(),
            enable_multiplexing: None,
            retry_max_times: None,
        }
    }
}

fn default_iflow_models() -> Vec<String> {
    ["qwen3-coder-plus", "kimi-k2", "deepseek-v3.1"]
        .into_iter()
        .map(str::to_string)
        .collect()
}
