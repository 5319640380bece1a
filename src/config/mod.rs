mod basic;
mod providers;

pub use basic::BasicConfig;
pub use providers::{
    AntigravityConfig, AntigravityResolvedConfig, CODE_ASSIST_AUTOPUSH, CODE_ASSIST_DAILY,
    CODE_ASSIST_PROD, CodexConfig, CodexResolvedConfig, CompatResolvedConfig, CopilotConfig,
    CopilotResolvedConfig, GeminiCliConfig, GeminiCliResolvedConfig, IFLOW_CLIENT_NAME,
    IflowConfig, IflowResolvedConfig, OpenAiCompatConfig, ProviderDefaults, ProvidersConfig,
    QwenConfig, QwenResolvedConfig,
};

use figment::{
    Figment,
    providers::{Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, sync::LazyLock};

/// Application configuration managed by Figment.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    /// Core server configuration (see `basic` table in config.toml).
    #[serde(default)]
    pub basic: BasicConfig,

    /// Provider and upstream settings (see `providers` table in config.toml).
    #[serde(default)]
    pub providers: ProvidersConfig,
}

const DEFAULT_CONFIG_FILE: &str = "config.toml";

impl Config {
    /// Builds a Figment that merges defaults and a config TOML file.
    pub fn figment() -> Figment {
        let figment = Figment::new().merge(Serialized::defaults(Config::default()));
        if PathBuf::from(DEFAULT_CONFIG_FILE).is_file() {
            figment.merge(Toml::file(DEFAULT_CONFIG_FILE))
        } else {
            figment
        }
    }

    /// Loads configuration merging defaults and `config.toml` if present.
    ///
    /// Does **not** validate required fields like `basic.master_key`;
    /// binaries should call `Config::from_toml()` instead.
    pub fn from_optional_toml() -> Self {
        Self::figment().extract().unwrap_or_else(|err| {
            panic!("failed to extract configuration (defaults + optional config.toml): {err}")
        })
    }

    /// Loads configuration from the TOML file and validates required fields.
    pub fn from_toml() -> Self {
        if !PathBuf::from(DEFAULT_CONFIG_FILE).is_file() {
            panic!("config file not found: {DEFAULT_CONFIG_FILE}");
        }
        let cfg: Self = Self::figment().extract().unwrap_or_else(|err| {
            panic!("failed to extract configuration from {DEFAULT_CONFIG_FILE}: {err}")
        });
        if cfg.basic.master_key.trim().is_empty() {
            panic!("basic.master_key must be set and non-empty");
        }
        cfg
    }

    pub fn antigravity(&self) -> AntigravityResolvedConfig {
        self.providers.antigravity.resolve(&self.providers.defaults)
    }

    pub fn gemini_cli(&self) -> GeminiCliResolvedConfig {
        self.providers
            .gemini_cli
            .resolve(&self.providers.defaults, &self.basic)
    }

    pub fn codex(&self) -> CodexResolvedConfig {
        self.providers.codex.resolve(&self.providers.defaults)
    }

    pub fn copilot(&self) -> CopilotResolvedConfig {
        self.providers.copilot.resolve(&self.providers.defaults)
    }

    pub fn iflow(&self) -> IflowResolvedConfig {
        self.providers.iflow.resolve(&self.providers.defaults)
    }

    pub fn qwen_code(&self) -> QwenResolvedConfig {
        self.providers
            .qwen_code
            .resolve(&self.providers.defaults, &self.basic)
    }

    pub fn nvidia_nim(&self) -> CompatResolvedConfig {
        self.providers.nvidia_nim.resolve(&self.providers.defaults)
    }

    pub fn ollama_cloud(&self) -> CompatResolvedConfig {
        self.providers.ollama_cloud.resolve(&self.providers.defaults)
    }

    pub fn openrouter(&self) -> CompatResolvedConfig {
        self.providers.openrouter.resolve(&self.providers.defaults)
    }

    pub fn kiro(&self) -> CompatResolvedConfig {
        self.providers.kiro.resolve(&self.providers.defaults)
    }
}

/// Global, lazily-initialized configuration instance.
pub static CONFIG: LazyLock<Config> = LazyLock::new(Config::from_optional_toml);
