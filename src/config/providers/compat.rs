use serde::{Deserialize, Serialize};
use url::Url;

use super::{ProviderDefaults, env_or};
use crate::config::BasicConfig;

const QWEN_CLIENT_ID: &str = "f0304373b74a44d2b584a3fb70ca9e56";
const QWEN_AUTH_URL: &str = "https://chat.qwen.ai/api/v1/oauth2/authorize";
const QWEN_TOKEN_URL: &str = "https://chat.qwen.ai/api/v1/oauth2/token";
const QWEN_API_URL: &str = "https://portal.qwen.ai/v1/chat/completions";

/// Qwen Code provider configuration (PKCE OAuth, OpenAI-compatible chat).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct QwenConfig {
    #[serde(default)]
    pub proxy: Option<Url>,

    #[serde(default = "default_qwen_models")]
    pub model_list: Vec<String>,

    #[serde(default)]
    pub enable_multiplexing: Option<bool>,

    #[serde(default)]
    pub retry_max_times: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct QwenResolvedConfig {
    pub proxy: Option<Url>,
    pub model_list: Vec<String>,
    pub enable_multiplexing: bool,
    pub retry_max_times: usize,
    pub retry_base_ms: u64,
    pub oauth_auth_url: Url,
    pub oauth_token_url: Url,
    pub oauth_redirect_url: Url,
    pub oauth_client_id: String,
    pub api_url: Url,
}

impl QwenConfig {
    pub fn resolve(&self, defaults: &ProviderDefaults, basic: &BasicConfig) -> QwenResolvedConfig {
        QwenResolvedConfig {
            proxy: self.proxy.clone().or_else(|| defaults.proxy.clone()),
            model_list: self.model_list.clone(),
            enable_multiplexing: self
                .enable_multiplexing
                .unwrap_or(defaults.enable_multiplexing),
            retry_max_times: self.retry_max_times.unwrap_or(defaults.retry_max_times),
            retry_base_ms: defaults.retry_base_ms,
            oauth_auth_url: Url::parse(QWEN_AUTH_URL).expect("built-in auth URL must parse"),
            oauth_token_url: Url::parse(QWEN_TOKEN_URL).expect("built-in token URL must parse"),
            oauth_redirect_url: basic
                .base_url
                .join("/oauth/qwen_code/callback")
                .expect("base_url joined with a fixed path must parse"),
            oauth_client_id: env_or("QWEN_CODE_CLIENT_ID", QWEN_CLIENT_ID),
            api_url: Url::parse(QWEN_API_URL).expect("built-in api URL must parse"),
        }
    }
}

impl Default for QwenConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            model_list: default_qwen_models(),
            enable_multiplexing: None,
            retry_max_times: None,
        }
    }
}

fn default_qwen_models() -> Vec<String> {
    ["qwen3-coder-plus", "qwen3-coder-flash"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// Configuration for an API-key OpenAI-compatible passthrough provider
/// (Nvidia NIM, Ollama Cloud, OpenRouter, Kiro).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OpenAiCompatConfig {
    /// Chat completions endpoint.
    pub api_url: Url,

    #[serde(default)]
    pub proxy: Option<Url>,

    #[serde(default)]
    pub model_list: Vec<String>,

    #[serde(default)]
    pub enable_multiplexing: Option<bool>,

    #[serde(default)]
    pub retry_max_times: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct CompatResolvedConfig {
    pub api_url: Url,
    pub proxy: Option<Url>,
    pub model_list: Vec<String>,
    pub enable_multiplexing: bool,
    pub retry_max_times: usize,
    pub retry_base_ms: u64,
}

impl OpenAiCompatConfig {
    pub fn resolve(&self, defaults: &ProviderDefaults) -> CompatResolvedConfig {
        CompatResolvedConfig {
            api_url: self.api_url.clone(),
            proxy: self.proxy.clone().or_else(|| defaults.proxy.clone()),
            model_list: self.model_list.clone(),
            enable_multiplexing: self
                .enable_multiplexing
                .unwrap_or(defaults.enable_multiplexing),
            retry_max_times: self.retry_max_times.unwrap_or(defaults.retry_max_times),
            retry_base_ms: defaults.retry_base_ms,
        }
    }
}

fn compat(api_url: &str, models: &[&str]) -> OpenAiCompatConfig {
    OpenAiCompatConfig {
        api_url: Url::parse(api_url).expect("built-in compat api URL must parse"),
        proxy: None,
        model_list: models.iter().map(|m| (*m).to_string()).collect(),
        enable_multiplexing: None,
        retry_max_times: None,
    }
}

pub(super) fn default_nvidia_nim() -> OpenAiCompatConfig {
    compat(
        "https://integrate.api.nvidia.com/v1/chat/completions",
        &[
            "meta/llama-3.3-70b-instruct",
            "qwen/qwen3-coder-480b-a35b-instruct",
        ],
    )
}

pub(super) fn default_ollama_cloud() -> OpenAiCompatConfig {
    compat(
        "https://ollama.com/v1/chat/completions",
        &["gpt-oss:120b", "qwen3-coder:480b"],
    )
}

pub(super) fn default_openrouter() -> OpenAiCompatConfig {
    compat(
        "https://openrouter.ai/api/v1/chat/completions",
        &["openrouter/auto"],
    )
}

pub(super) fn default_kiro() -> OpenAiCompatConfig {
    compat(
        "https://api.kiro.dev/v1/chat/completions",
        &["claude-sonnet-4-5", "claude-haiku-4-5"],
    )
}
