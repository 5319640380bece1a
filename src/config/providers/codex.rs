use serde::{Deserialize, Serialize};
use url::Url;

use super::{ProviderDefaults, env_or};

const CODEX_CLIENT_ID: &str = "app_EMoamEEZ73f0CkXaXp7hrann";
const CODEX_DEVICE_URL: &str = "https://auth.openai.com/api/accounts/deviceauth/usercode";
const CODEX_DEVICE_TOKEN_URL: &str = "https://auth.openai.com/api/accounts/deviceauth/token";
const CODEX_TOKEN_URL: &str = "https://auth.openai.com/oauth/token";
const CODEX_RESPONSES_URL: &str = "https://chatgpt.com/backend-api/codex/responses";

/// ChatGPT Codex provider configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CodexConfig {
    #[serde(default)]
    pub proxy: Option<Url>,

    #[serde(default = "default_codex_models")]
    pub model_list: Vec<String>,

    #[serde(default)]
    pub enable_multiplexing: Option<bool>,

    #[serde(default)]
    pub retry_max_times: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct CodexResolvedConfig {
    pub proxy: Option<Url>,
    pub model_list: Vec<String>,
    pub enable_multiplexing: bool,
    pub retry_max_times: usize,
    pub retry_base_ms: u64,
    pub client_id: String,
    pub device_url: Url,
    pub device_token_url: Url,
    pub token_url: Url,
    pub responses_url: Url,
}

impl CodexConfig {
    pub fn resolve(&self, defaults: &ProviderDefaults) -> CodexResolvedConfig {
        CodexResolvedConfig {
            proxy: self.proxy.clone().or_else(|| defaults.proxy.clone()),
            model_list: self.model_list.clone(),
            enable_multiplexing: self
                .enable_multiplexing
                .unwrap_or(defaults.enable_multiplexing),
            retry_max_times: self.retry_max_times.unwrap_or(defaults.retry_max_times),
            retry_base_ms: defaults.retry_base_ms,
            client_id: env_or("CODEX_CLIENT_ID", CODEX_CLIENT_ID),
            device_url: Url::parse(CODEX_DEVICE_URL).expect("built-in device URL must parse"),
            device_token_url: Url::parse(CODEX_DEVICE_TOKEN_URL)
                .expect("built-in device token URL must parse"),
            token_url: Url::parse(CODEX_TOKEN_URL).expect("built-in token URL must parse"),
            responses_url: Url::parse(CODEX_RESPONSES_URL)
                .expect("built-in responses URL must parse"),
        }
    }
}

impl Default for CodexConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            model_list: default_codex_models(),
            enable_multiplexing: None,
            retry_max_times: None,
        }
    }
}

fn default_codex_models() -> Vec<String> {
    ["gpt-5", "gpt-5-codex"]
        .into_iter()
        .map(str::to_string)
        .collect()
}
