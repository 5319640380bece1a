use crate::{KeyScope, SignatureStore, ThoughtSignature};
use std::sync::Arc;
use switchboard_schema::gemini::GenerateContentResponse;

/// Harvests thought signatures from a response stream into the store.
///
/// Thought text arrives as deltas; the signature usually arrives on the last
/// delta of the run. The sniffer buffers text per candidate and writes the
/// (scope, accumulated text) -> signature mapping when a signature shows up
/// or the candidate finishes.
pub struct SignatureSniffer {
    store: Arc<SignatureStore>,
    scope: KeyScope,
    thought_buffer: String,
    pending_signature: Option<String>,
}

impl SignatureSniffer {
    pub fn new(store: Arc<SignatureStore>, scope: KeyScope) -> Self {
        Self {
            store,
            scope,
            thought_buffer: String::new(),
            pending_signature: None,
        }
    }

    pub fn inspect(&mut self, response: &GenerateContentResponse) {
        for candidate in &response.candidates {
            if let Some(content) = &candidate.content {
                for part in &content.parts {
                    if part.is_thought() {
                        if let Some(text) = &part.text {
                            self.thought_buffer.push_str(text);
                        }
                        if let Some(signature) = &part.thought_signature {
                            self.pending_signature = Some(signature.clone());
                        }
                    } else if part.text.is_some() || part.function_call.is_some() {
                        // A non-thought part ends the current thought run.
                        self.flush();
                    }
                }
            }

            if candidate.finish_reason.is_some() {
                self.flush();
            }
        }
    }

    fn flush(&mut self) {
        let signature = self
            .pending_signature
            .take()
            .filter(|s| !s.is_empty());
        let text = std::mem::take(&mut self.thought_buffer);

        let (Some(signature), false) = (signature, text.trim().is_empty()) else {
            return;
        };

        if let Some(key) = self.scope.cache_key(&text) {
            let signature: ThoughtSignature = Arc::from(signature.as_str());
            self.store.put(key, signature);
        }
    }
}

impl Drop for SignatureSniffer {
    fn drop(&mut self) {
        // Streams can end without a finish frame; keep whatever we saw.
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chunk(value: serde_json::Value) -> GenerateContentResponse {
        serde_json::from_value(value).expect("chunk must parse")
    }

    #[test]
    fn signature_spanning_deltas_is_stored_for_full_text() {
        let store = Arc::new(SignatureStore::default());
        let scope = KeyScope::new("claude", "s1");
        let mut sniffer = SignatureSniffer::new(store.clone(), scope.clone());

        sniffer.inspect(&chunk(json!({
            "candidates": [{"content": {"parts": [{"thought": true, "text": "alpha "}]}}]
        })));
        sniffer.inspect(&chunk(json!({
            "candidates": [{"content": {"parts": [
                {"thought": true, "text": "beta", "thoughtSignature": "sig_001"}
            ]}}]
        })));
        sniffer.inspect(&chunk(json!({
            "candidates": [{"finishReason": "STOP"}]
        })));

        let key = scope.cache_key("alpha beta").unwrap();
        assert_eq!(store.get(key).as_deref(), Some("sig_001"));
    }

    #[test]
    fn run_without_signature_stores_nothing() {
        let store = Arc::new(SignatureStore::default());
        let scope = KeyScope::new("claude", "s1");
        let mut sniffer = SignatureSniffer::new(store.clone(), scope.clone());

        sniffer.inspect(&chunk(json!({
            "candidates": [{"content": {"parts": [{"thought": true, "text": "alpha"}]}},]
        })));
        sniffer.inspect(&chunk(json!({
            "candidates": [{"finishReason": "STOP"}]
        })));

        assert!(store.get(scope.cache_key("alpha").unwrap()).is_none());
    }

    #[test]
    fn answer_text_ends_the_thought_run() {
        let store = Arc::new(SignatureStore::default());
        let scope = KeyScope::new("gemini-pro", "s2");
        let mut sniffer = SignatureSniffer::new(store.clone(), scope.clone());

        sniffer.inspect(&chunk(json!({
            "candidates": [{"content": {"parts": [
                {"thought": true, "text": "think", "thoughtSignature": "sig_t"},
                {"text": "answer"}
            ]}}]
        })));

        assert_eq!(
            store.get(scope.cache_key("think").unwrap()).as_deref(),
            Some("sig_t")
        );
        // The plain answer text is not a thought and must not be keyed.
        assert!(store.get(scope.cache_key("answer").unwrap()).is_none());
    }
}
