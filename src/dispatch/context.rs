use std::sync::Arc;

use crate::session;
use crate::toolschema::ToolSchemaMap;
use switchboard_schema::openai::ChatCompletionRequest;

/// Per-request state assembled by the dispatcher and threaded through the
/// provider call.
#[derive(Clone)]
pub struct RequestContext {
    /// Model exactly as the caller sent it (`provider/model` allowed).
    pub requested_model: String,

    /// Model with any `provider/` prefix stripped; providers apply their
    /// own hard aliases on top of this.
    pub bare_model: String,

    /// Stable per-conversation id (SHA-256 of the first user message).
    pub session_id: String,

    /// Fresh `agent-<uuid>` per upstream call.
    pub request_id: String,

    pub stream: bool,

    pub include_reasoning: bool,

    /// Declared tool parameter types, captured once per request.
    pub schemas: Arc<ToolSchemaMap>,
}

impl RequestContext {
    pub fn from_request(request: &ChatCompletionRequest) -> Self {
        let requested_model = request.model.clone();
        let bare_model = strip_provider_prefix(&requested_model).1.to_string();

        Self {
            requested_model,
            bare_model,
            session_id: session::session_id(&request.messages),
            request_id: session::request_id(),
            stream: request.stream.unwrap_or(false),
            include_reasoning: request.wants_reasoning(),
            schemas: Arc::new(ToolSchemaMap::from_tools(request.tools.as_deref())),
        }
    }

    /// New upstream request id for a retry on another account.
    pub fn next_attempt(&self) -> Self {
        Self {
            request_id: session::request_id(),
            ..self.clone()
        }
    }
}

/// Split an optional `provider/` prefix off a model name. Only known
/// provider names count as prefixes, so `meta/llama-3.3-70b-instruct`
/// stays intact.
pub fn strip_provider_prefix(model: &str) -> (Option<&str>, &str) {
    if let Some((prefix, rest)) = model.split_once('/') {
        let normalized = crate::providers::normalize_provider_name(prefix);
        if crate::providers::registry::PROVIDER_NAMES
            .iter()
            .any(|name| *name == normalized)
        {
            return (Some(normalized), rest);
        }
    }
    (None, model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn provider_prefix_is_stripped_only_for_known_providers() {
        assert_eq!(
            strip_provider_prefix("antigravity/claude-sonnet-4-5"),
            (Some("antigravity"), "claude-sonnet-4-5")
        );
        assert_eq!(
            strip_provider_prefix("github-copilot/gpt-4.1"),
            (Some("copilot"), "gpt-4.1")
        );
        assert_eq!(
            strip_provider_prefix("meta/llama-3.3-70b-instruct"),
            (None, "meta/llama-3.3-70b-instruct")
        );
        assert_eq!(strip_provider_prefix("gpt-5"), (None, "gpt-5"));
    }

    #[test]
    fn context_captures_stream_and_reasoning_flags() {
        let request: ChatCompletionRequest = serde_json::from_value(json!({
            "model": "codex/gpt-5",
            "stream": true,
            "reasoning_effort": "low",
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap();

        let ctx = RequestContext::from_request(&request);
        assert_eq!(ctx.bare_model, "gpt-5");
        assert!(ctx.stream);
        assert!(ctx.include_reasoning);
        assert!(ctx.request_id.starts_with("agent-"));
    }

    #[test]
    fn retry_regenerates_the_request_id_only() {
        let request: ChatCompletionRequest = serde_json::from_value(json!({
            "model": "gpt-5",
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap();

        let ctx = RequestContext::from_request(&request);
        let retry = ctx.next_attempt();
        assert_ne!(ctx.request_id, retry.request_id);
        assert_eq!(ctx.session_id, retry.session_id);
    }
}
