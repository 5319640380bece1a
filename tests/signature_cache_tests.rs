use serde_json::json;
use std::sync::Arc;

use switchboard::convert::apply_gemini_envelope;
use switchboard_schema::gemini::GenerateContentRequest;
use switchboard_thoughtsig::{KeyScope, SKIP_SIGNATURE_SENTINEL, SignatureSniffer, SignatureStore};

fn gemini_request(value: serde_json::Value) -> GenerateContentRequest {
    serde_json::from_value(value).expect("request must parse")
}

/// Sniff a streamed response, then replay the same thought in the next
/// turn's request: the cached signature must come back.
#[test]
fn sniff_then_patch_round_trip() {
    let store = Arc::new(SignatureStore::default());
    let scope = KeyScope::new("gemini-pro", "session-42");

    let mut sniffer = SignatureSniffer::new(store.clone(), scope.clone());
    for frame in [
        json!({"candidates": [{"content": {"parts": [{"thought": true, "text": "step one, "}]}}]}),
        json!({"candidates": [{"content": {"parts": [
            {"thought": true, "text": "step two", "thoughtSignature": "sig_steps"}
        ]}}]}),
        json!({"candidates": [{"finishReason": "STOP"}]}),
    ] {
        sniffer.inspect(&serde_json::from_value(frame).unwrap());
    }
    drop(sniffer);

    let mut next_turn = gemini_request(json!({
        "contents": [
            {"role": "model", "parts": [
                {"thought": true, "text": "step one, step two"},
                {"functionCall": {"id": "A", "name": "f", "args": {}}}
            ]},
            {"role": "user", "parts": [{"text": "continue"}]}
        ]
    }));

    let stats = apply_gemini_envelope(&mut next_turn, &store, &scope);
    assert_eq!(stats.thoughts_patched, 1);
    assert_eq!(stats.thoughts_dropped, 0);

    let parts = &next_turn.contents[0].parts;
    assert_eq!(parts[0].thought_signature.as_deref(), Some("sig_steps"));
    // The functionCall inherits the resolved signature rather than the sentinel.
    assert_eq!(parts[1].thought_signature.as_deref(), Some("sig_steps"));
}

#[test]
fn other_sessions_never_see_the_signature() {
    let store = Arc::new(SignatureStore::default());
    let scope_a = KeyScope::new("gemini-pro", "session-a");
    let scope_b = KeyScope::new("gemini-pro", "session-b");

    store.put(scope_a.cache_key("thought").unwrap(), Arc::from("sig_a"));

    let mut request = gemini_request(json!({
        "contents": [{"role": "model", "parts": [{"thought": true, "text": "thought"}]}]
    }));

    let stats = apply_gemini_envelope(&mut request, &store, &scope_b);
    assert_eq!(stats.thoughts_dropped, 1);
    assert!(request.contents.is_empty());
}

#[test]
fn function_calls_fall_back_to_the_sentinel() {
    let store = Arc::new(SignatureStore::default());
    let scope = KeyScope::new("claude", "session-1");

    let mut request = gemini_request(json!({
        "contents": [{"role": "model", "parts": [
            {"functionCall": {"id": "A", "name": "f", "args": {}}}
        ]}]
    }));

    apply_gemini_envelope(&mut request, &store, &scope);
    assert_eq!(
        request.contents[0].parts[0].thought_signature.as_deref(),
        Some(SKIP_SIGNATURE_SENTINEL)
    );
}

/// Entries written within the TTL window are retrievable; entries past the
/// TTL are gone after one maintenance sweep.
#[test]
fn ttl_expiry_after_sweep() {
    let store = SignatureStore::new(1, 64);
    let scope = KeyScope::new("claude", "s");
    let key = scope.cache_key("short-lived").unwrap();

    store.put(key, Arc::from("sig"));
    assert_eq!(store.get(key).as_deref(), Some("sig"));

    std::thread::sleep(std::time::Duration::from_millis(1100));
    store.sweep();

    assert!(store.get(key).is_none());
    assert!(store.is_empty());
}
