use serde::{Deserialize, Serialize};
use url::Url;

use super::{ProviderDefaults, env_or};

const COPILOT_CLIENT_ID: &str = "Iv1.b507a08c87ecfe98";
const COPILOT_DEVICE_CODE_URL: &str = "https://github.com/login/device/code";
const COPILOT_ACCESS_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const COPILOT_TOKEN_URL: &str = "https://api.github.com/copilot_internal/v2/token";
const COPILOT_API_URL: &str = "https://api.githubcopilot.com/chat/completions";

/// GitHub Copilot provider configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CopilotConfig {
    #[serde(default)]
    pub proxy: Option<Url>,

    #[serde(default = "default_copilot_models")]
    pub model_list: Vec<String>,

    #[serde(default)]
    pub enable_multiplexing: Option<bool>,

    #[serde(default)]
    pub retry_max_times: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct CopilotResolvedConfig {
    pub proxy: Option<Url>,
    pub model_list: Vec<String>,
    pub enable_multiplexing: bool,
    pub retry_max_times: usize,
    pub retry_base_ms: u64,
    pub client_id: String,
    pub device_code_url: Url,
    pub access_token_url: Url,
    pub copilot_token_url: Url,
    pub api_url: Url,
}

impl CopilotConfig {
    pub fn resolve(&self, defaults: &ProviderDefaults) -> CopilotResolvedConfig {
        CopilotResolvedConfig {
            proxy: self.proxy.clone().or_else(|| defaults.proxy.clone()),
            model_list: self.model_list.clone(),
            enable_multiplexing: self
                .enable_multiplexing
                .unwrap_or(defaults.enable_multiplexing),
            retry_max_times: self.retry_max_times.unwrap_or(defaults.retry_max_times),
            retry_base_ms: defaults.retry_base_ms,
            client_id: env_or("COPILOT_CLIENT_ID", COPILOT_CLIENT_ID),
            device_code_url: Url::parse(COPILOT_DEVICE_CODE_URL)
                .expect("built-in device code URL must parse"),
            access_token_url: Url::parse(COPILOT_ACCESS_TOKEN_URL)
                .expect("built-in access token URL must parse"),
            copilot_token_url: Url::parse(COPILOT_TOKEN_URL)
                .expect("built-in copilot token URL must parse"),
            api_url: Url::parse(COPILOT_API_URL).expect("built-in api URL must parse"),
        }
    }
}

impl Default for CopilotConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            model_list: default_copilot_models(),
            enable_multiplexing: None,
            retry_max_times: None,
        }
    }
}

fn default_copilot_models() -> Vec<String> {
    [
        "gpt-4.1",
        "gpt-5-mini",
        "gpt-5-codex",
        "claude-sonnet-4.5",
        "gemini-2.5-pro",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}
