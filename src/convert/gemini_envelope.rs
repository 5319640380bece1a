use std::sync::Arc;

use switchboard_schema::gemini::GenerateContentRequest;
use switchboard_thoughtsig::{KeyScope, PatchStats, SignatureStore, patch_request};

/// Hardening instruction injected whenever tools are declared. The Gemini
/// CLI backend drifts into prose-wrapped function calls without it.
pub(crate) const TOOL_HARDENING_INSTRUCTION: &str = "When calling a declared function, respond with the function call only. Emit arguments as strict JSON matching the declared schema: no comments, no trailing commas, no prose around the call. Never invent function names that are not declared.";

/// Shape a converted Gemini payload for the Gemini-routed Code Assist path:
/// tool hardening plus thought-signature replay.
pub fn apply_gemini_envelope(
    request: &mut GenerateContentRequest,
    store: &Arc<SignatureStore>,
    scope: &KeyScope,
) -> PatchStats {
    if request.has_function_declarations() {
        // prepend_system_text is idempotent, so re-requests stay clean.
        request.prepend_system_text(TOOL_HARDENING_INSTRUCTION);
    }

    patch_request(store, scope, request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(value: serde_json::Value) -> GenerateContentRequest {
        serde_json::from_value(value).expect("request must parse")
    }

    fn scope() -> KeyScope {
        KeyScope::new("gemini-pro", "session-1")
    }

    #[test]
    fn hardening_instruction_requires_declared_tools() {
        let store = Arc::new(SignatureStore::default());

        let mut bare = request(json!({
            "contents": [{"role": "user", "parts": [{"text": "hi"}]}]
        }));
        apply_gemini_envelope(&mut bare, &store, &scope());
        assert!(bare.system_instruction.is_none());

        let mut with_tools = request(json!({
            "contents": [{"role": "user", "parts": [{"text": "hi"}]}],
            "tools": [{"functionDeclarations": [{"name": "f"}]}]
        }));
        apply_gemini_envelope(&mut with_tools, &store, &scope());
        assert_eq!(
            with_tools.system_instruction.as_ref().unwrap().parts[0]
                .text
                .as_deref(),
            Some(TOOL_HARDENING_INSTRUCTION)
        );
    }

    #[test]
    fn instruction_is_not_duplicated_on_re_request() {
        let store = Arc::new(SignatureStore::default());
        let mut req = request(json!({
            "contents": [{"role": "user", "parts": [{"text": "hi"}]}],
            "tools": [{"functionDeclarations": [{"name": "f"}]}]
        }));

        apply_gemini_envelope(&mut req, &store, &scope());
        apply_gemini_envelope(&mut req, &store, &scope());

        let count = req
            .system_instruction
            .as_ref()
            .unwrap()
            .parts
            .iter()
            .filter(|p| p.text.as_deref() == Some(TOOL_HARDENING_INSTRUCTION))
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn cached_signature_is_replayed_and_unknown_thought_dropped() {
        let store = Arc::new(SignatureStore::default());
        let scope = scope();
        store.put(
            scope.cache_key("known thought").unwrap(),
            Arc::from("sig_k"),
        );

        let mut req = request(json!({
            "contents": [
                {"role": "model", "parts": [
                    {"thought": true, "text": "known thought"},
                    {"thought": true, "text": "unknown thought"},
                    {"functionCall": {"id": "A", "name": "f", "args": {}}}
                ]},
                {"role": "user", "parts": [{"text": "go on"}]}
            ]
        }));

        let stats = apply_gemini_envelope(&mut req, &store, &scope);
        assert_eq!(stats.thoughts_patched, 1);
        assert_eq!(stats.thoughts_dropped, 1);
        assert_eq!(stats.calls_stamped, 1);

        let parts = &req.contents[0].parts;
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].thought_signature.as_deref(), Some("sig_k"));
        assert_eq!(parts[1].thought_signature.as_deref(), Some("sig_k"));
    }
}
