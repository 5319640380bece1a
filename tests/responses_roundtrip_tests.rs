use serde_json::json;

use switchboard::convert::{chat_to_responses_request, responses_input_to_messages};
use switchboard_schema::openai::ChatCompletionRequest;

fn request(value: serde_json::Value) -> ChatCompletionRequest {
    serde_json::from_value(value).expect("request must parse")
}

/// chat.completions -> Responses input -> chat.completions preserves
/// content strings and tool_calls bit-for-bit (ids included here, since
/// the originals carried ids).
#[test]
fn tool_loop_round_trips_bit_for_bit() {
    let original = request(json!({
        "model": "gpt-5-codex",
        "messages": [
            {"role": "system", "content": "rules"},
            {"role": "user", "content": "list the files"},
            {"role": "assistant", "content": "running ls",
             "tool_calls": [
                 {"id": "call_ls", "type": "function",
                  "function": {"name": "shell", "arguments": "{\"cmd\":[\"ls\"]}"}},
                 {"id": "call_pwd", "type": "function",
                  "function": {"name": "shell", "arguments": "{\"cmd\":[\"pwd\"]}"}}
             ]},
            {"role": "tool", "tool_call_id": "call_ls", "content": "a.rs\nb.rs"},
            {"role": "tool", "tool_call_id": "call_pwd", "content": "/work"},
            {"role": "assistant", "content": "two files in /work"}
        ]
    }));

    let responses = chat_to_responses_request(&original, "gpt-5-codex");
    let back = responses_input_to_messages(&responses.input);

    let original_texts: Vec<Option<String>> =
        original.messages.iter().map(|m| m.text()).collect();
    let back_texts: Vec<Option<String>> = back.iter().map(|m| m.text()).collect();
    assert_eq!(original_texts, back_texts);

    let original_roles: Vec<&str> = original.messages.iter().map(|m| m.role.as_str()).collect();
    let back_roles: Vec<&str> = back.iter().map(|m| m.role.as_str()).collect();
    assert_eq!(original_roles, back_roles);

    let original_calls = original.messages[2].tool_calls.as_ref().unwrap();
    let back_calls = back[2].tool_calls.as_ref().unwrap();
    assert_eq!(original_calls.len(), back_calls.len());
    for (a, b) in original_calls.iter().zip(back_calls) {
        assert_eq!(a.id, b.id);
        assert_eq!(a.function.name, b.function.name);
        assert_eq!(a.function.arguments, b.function.arguments);
    }

    assert_eq!(back[3].tool_call_id.as_deref(), Some("call_ls"));
    assert_eq!(back[4].tool_call_id.as_deref(), Some("call_pwd"));
}

#[test]
fn calls_without_ids_get_fresh_ones_and_still_pair_up() {
    let original = request(json!({
        "model": "gpt-5",
        "messages": [
            {"role": "assistant",
             "tool_calls": [{"type": "function",
                             "function": {"name": "f", "arguments": "{}"}}]}
        ]
    }));

    let responses = chat_to_responses_request(&original, "gpt-5");
    let item = &responses.input[0];
    assert_eq!(item.kind.as_deref(), Some("function_call"));
    let call_id = item.call_id.as_deref().expect("generated call_id");
    assert!(call_id.starts_with("call_"));
    assert_eq!(item.id.as_deref(), Some(format!("fc_{call_id}").as_str()));
}

#[test]
fn upstream_constraints_are_pinned() {
    let original = request(json!({
        "model": "gpt-5",
        "temperature": 0.9,
        "top_p": 0.5,
        "stream": false,
        "messages": [{"role": "user", "content": "hi"}],
        "tools": [{"type": "function",
                   "function": {"name": "f", "parameters": {"type": "object"}}}]
    }));

    let responses = chat_to_responses_request(&original, "gpt-5");
    let wire = serde_json::to_value(&responses).unwrap();

    // The upstream rejects sampling knobs; they must not serialize at all.
    assert!(wire.get("temperature").is_none());
    assert!(wire.get("top_p").is_none());
    assert_eq!(wire["store"], json!(false));
    assert_eq!(wire["stream"], json!(true));
    assert_eq!(wire["include"], json!(["reasoning.encrypted_content"]));
}
