mod codex;
mod compat;
mod copilot;
mod google;
mod iflow;

pub use codex::{CodexConfig, CodexResolvedConfig};
pub use compat::{CompatResolvedConfig, OpenAiCompatConfig, QwenConfig, QwenResolvedConfig};
pub use copilot::{CopilotConfig, CopilotResolvedConfig};
pub use google::{
    AntigravityConfig, AntigravityResolvedConfig, CODE_ASSIST_AUTOPUSH, CODE_ASSIST_DAILY,
    CODE_ASSIST_PROD, GeminiCliConfig, GeminiCliResolvedConfig,
};
pub use iflow::IFLOW_CLIENT_NAME;
pub use iflow::{IflowConfig, IflowResolvedConfig};

use serde::{Deserialize, Serialize};
use url::Url;

/// Fallback settings shared by every provider table.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderDefaults {
    /// Upstream HTTP proxy for reqwest clients.
    /// TOML: `providers.defaults.proxy`.
    #[serde(default)]
    pub proxy: Option<Url>,

    /// Allow HTTP/2 multiplexing; disabled forces HTTP/1.
    /// TOML: `providers.defaults.enable_multiplexing`. Default: `true`.
    #[serde(default = "default_enable_multiplexing")]
    pub enable_multiplexing: bool,

    /// Max account-failover attempts per request.
    /// TOML: `providers.defaults.retry_max_times`. Default: `3`.
    #[serde(default = "default_retry_max_times")]
    pub retry_max_times: usize,

    /// Base of the exponential backoff between transient retries (ms).
    /// TOML: `providers.defaults.retry_base_ms`. Default: `500`.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
}

impl Default for ProviderDefaults {
    fn default() -> Self {
        Self {
            proxy: None,
            enable_multiplexing: default_enable_multiplexing(),
            retry_max_times: default_retry_max_times(),
            retry_base_ms: default_retry_base_ms(),
        }
    }
}

fn default_enable_multiplexing() -> bool {
    true
}

fn default_retry_max_times() -> usize {
    3
}

fn default_retry_base_ms() -> u64 {
    500
}

/// Provider and upstream settings (the `providers` table).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub defaults: ProviderDefaults,

    #[serde(default)]
    pub antigravity: AntigravityConfig,

    #[serde(default)]
    pub gemini_cli: GeminiCliConfig,

    #[serde(default)]
    pub codex: CodexConfig,

    #[serde(default)]
    pub copilot: CopilotConfig,

    #[serde(default)]
    pub iflow: IflowConfig,

    #[serde(default)]
    pub qwen_code: QwenConfig,

    #[serde(default = "compat::default_nvidia_nim")]
    pub nvidia_nim: OpenAiCompatConfig,

    #[serde(default = "compat::default_ollama_cloud")]
    pub ollama_cloud: OpenAiCompatConfig,

    #[serde(default = "compat::default_openrouter")]
    pub openrouter: OpenAiCompatConfig,

    #[serde(default = "compat::default_kiro")]
    pub kiro: OpenAiCompatConfig,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            defaults: ProviderDefaults::default(),
            antigravity: AntigravityConfig::default(),
            gemini_cli: GeminiCliConfig::default(),
            codex: CodexConfig::default(),
            copilot: CopilotConfig::default(),
            iflow: IflowConfig::default(),
            qwen_code: QwenConfig::default(),
            nvidia_nim: compat::default_nvidia_nim(),
            ollama_cloud: compat::default_ollama_cloud(),
            openrouter: compat::default_openrouter(),
            kiro: compat::default_kiro(),
        }
    }
}

/// Read a `NAME` environment override, falling back to the built-in value.
pub(crate) fn env_or(name: &str, fallback: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| fallback.to_string())
}
