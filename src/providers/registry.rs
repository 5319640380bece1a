use std::sync::Arc;

use crate::config::Config;
use crate::db::DbActorHandle;
use crate::secrets::CredentialCipher;
use switchboard_thoughtsig::SignatureStore;

use super::antigravity::{ANTIGRAVITY_USER_AGENT, AntigravityProvider};
use super::codex::{CODEX_USER_AGENT, CodexProvider};
use super::compat::OpenAiCompatProvider;
use super::copilot::{COPILOT_USER_AGENT, CopilotProvider};
use super::gemini_cli::{GEMINI_CLI_USER_AGENT, GeminiCliProvider};
use super::iflow::{IFLOW_USER_AGENT, IflowProvider};
use super::qwen::{QWEN_USER_AGENT, QwenProvider};
use super::{Provider, ProviderContext, build_http_client};

/// The closed provider set.
pub const PROVIDER_NAMES: [&str; 10] = [
    "antigravity",
    "codex",
    "copilot",
    "iflow",
    "gemini_cli",
    "qwen_code",
    "kiro",
    "nvidia_nim",
    "ollama_cloud",
    "openrouter",
];

const OPENROUTER_HEADERS: &[(&str, &str)] = &[
    ("HTTP-Referer", "https://github.com/switchboard-proxy/switchboard"),
    ("X-Title", "switchboard"),
];

/// Collapse historical aliases onto canonical provider names.
pub fn normalize_provider_name(name: &str) -> &str {
    match name {
        "github-copilot" | "github_copilot" => "copilot",
        other => other,
    }
}

/// Name-keyed provider set, built once at startup.
///
/// Kept as an ordered Vec rather than a map: lookups are over ten entries,
/// and model resolution wants a deterministic provider order.
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn build(
        cfg: &Config,
        db: DbActorHandle,
        cipher: Arc<dyn CredentialCipher>,
        sigstore: Arc<SignatureStore>,
    ) -> Self {
        let ctx = |user_agent: &str, proxy: Option<url::Url>, multiplexing: bool| ProviderContext {
            db: db.clone(),
            cipher: cipher.clone(),
            http: build_http_client(user_agent, proxy, multiplexing),
        };

        let antigravity_cfg = cfg.antigravity();
        let gemini_cli_cfg = cfg.gemini_cli();
        let codex_cfg = cfg.codex();
        let copilot_cfg = cfg.copilot();
        let iflow_cfg = cfg.iflow();
        let qwen_cfg = cfg.qwen_code();
        let nim_cfg = cfg.nvidia_nim();
        let ollama_cfg = cfg.ollama_cloud();
        let openrouter_cfg = cfg.openrouter();
        let kiro_cfg = cfg.kiro();

        let providers: Vec<Arc<dyn Provider>> = vec![
            Arc::new(AntigravityProvider::new(
                ctx(
                    ANTIGRAVITY_USER_AGENT,
                    antigravity_cfg.proxy.clone(),
                    antigravity_cfg.enable_multiplexing,
                ),
                &antigravity_cfg,
                sigstore.clone(),
            )),
            Arc::new(GeminiCliProvider::new(
                ctx(
                    GEMINI_CLI_USER_AGENT,
                    gemini_cli_cfg.proxy.clone(),
                    gemini_cli_cfg.enable_multiplexing,
                ),
                &gemini_cli_cfg,
                sigstore,
            )),
            Arc::new(CodexProvider::new(
                ctx(
                    CODEX_USER_AGENT,
                    codex_cfg.proxy.clone(),
                    codex_cfg.enable_multiplexing,
                ),
                codex_cfg,
            )),
            Arc::new(CopilotProvider::new(
                ctx(
                    COPILOT_USER_AGENT,
                    copilot_cfg.proxy.clone(),
                    copilot_cfg.enable_multiplexing,
                ),
                copilot_cfg,
            )),
            Arc::new(IflowProvider::new(
                ctx(
                    IFLOW_USER_AGENT,
                    iflow_cfg.proxy.clone(),
                    iflow_cfg.enable_multiplexing,
                ),
                iflow_cfg,
            )),
            Arc::new(QwenProvider::new(
                ctx(
                    QWEN_USER_AGENT,
                    qwen_cfg.proxy.clone(),
                    qwen_cfg.enable_multiplexing,
                ),
                qwen_cfg,
            )),
            Arc::new(OpenAiCompatProvider::new(
                "nvidia_nim",
                "Nvidia NIM",
                ctx("switchboard/0.3", nim_cfg.proxy.clone(), nim_cfg.enable_multiplexing),
                nim_cfg,
                &[],
            )),
            Arc::new(OpenAiCompatProvider::new(
                "ollama_cloud",
                "Ollama Cloud",
                ctx(
                    "switchboard/0.3",
                    ollama_cfg.proxy.clone(),
                    ollama_cfg.enable_multiplexing,
                ),
                ollama_cfg,
                &[],
            )),
            Arc::new(OpenAiCompatProvider::new(
                "openrouter",
                "OpenRouter",
                ctx(
                    "switchboard/0.3",
                    openrouter_cfg.proxy.clone(),
                    openrouter_cfg.enable_multiplexing,
                ),
                openrouter_cfg,
                OPENROUTER_HEADERS,
            )),
            Arc::new(OpenAiCompatProvider::new(
                "kiro",
                "Kiro",
                ctx("switchboard/0.3", kiro_cfg.proxy.clone(), kiro_cfg.enable_multiplexing),
                kiro_cfg,
                &[],
            )),
        ];

        Self { providers }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        let name = normalize_provider_name(name);
        self.providers
            .iter()
            .find(|p| p.config().name == name)
            .cloned()
    }

    /// Providers claiming a bare model name, in registry order.
    pub fn providers_for_model(&self, bare_model: &str) -> Vec<Arc<dyn Provider>> {
        self.providers
            .iter()
            .filter(|p| p.config().supported_models.contains(bare_model))
            .cloned()
            .collect()
    }

    pub fn all(&self) -> &[Arc<dyn Provider>] {
        &self.providers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_normalize_to_copilot() {
        assert_eq!(normalize_provider_name("github-copilot"), "copilot");
        assert_eq!(normalize_provider_name("github_copilot"), "copilot");
        assert_eq!(normalize_provider_name("copilot"), "copilot");
        assert_eq!(normalize_provider_name("codex"), "codex");
    }

    #[test]
    fn closed_set_has_ten_members() {
        assert_eq!(PROVIDER_NAMES.len(), 10);
        assert!(PROVIDER_NAMES.contains(&"antigravity"));
        assert!(PROVIDER_NAMES.contains(&"kiro"));
    }
}
