use serde_json::json;

use switchboard::convert::chat_to_gemini_request;
use switchboard_schema::gemini::GenerateContentRequest;
use switchboard_schema::openai::ChatCompletionRequest;

fn convert(messages: serde_json::Value) -> GenerateContentRequest {
    let request: ChatCompletionRequest =
        serde_json::from_value(json!({"model": "claude-sonnet-4-5", "messages": messages}))
            .expect("request must parse");
    chat_to_gemini_request(&request)
}

/// Structural invariants every converted history must satisfy.
fn assert_invariants(request: &GenerateContentRequest) {
    use std::collections::HashMap;

    let mut call_index: HashMap<String, usize> = HashMap::new();
    let mut response_index: HashMap<String, usize> = HashMap::new();

    for (index, content) in request.contents.iter().enumerate() {
        assert!(!content.parts.is_empty(), "message with empty parts survived");

        if content.is_model() {
            let has_call = content.parts.iter().any(|p| p.function_call.is_some());
            let has_other = content
                .parts
                .iter()
                .any(|p| p.function_call.is_none());
            assert!(
                !(has_call && has_other),
                "model message mixes functionCall with text/thought"
            );
        }

        for part in &content.parts {
            if let Some(call) = &part.function_call {
                call_index
                    .entry(call.id.clone().expect("calls keep ids"))
                    .or_insert(index);
            }
            if let Some(response) = &part.function_response {
                response_index.insert(response.id.clone().expect("responses keep ids"), index);
            }
        }
    }

    for (id, call_at) in &call_index {
        let response_at = response_index
            .get(id)
            .unwrap_or_else(|| panic!("functionCall {id} has no response"));
        assert!(response_at > call_at, "response for {id} precedes its call");
    }
    for id in response_index.keys() {
        assert!(call_index.contains_key(id), "functionResponse {id} has no call");
    }
}

#[test]
fn unanswered_call_is_dropped_and_pair_survives() {
    let out = convert(json!([
        {"role": "assistant", "tool_calls": [
            {"id": "A", "type": "function", "function": {"name": "f", "arguments": "{}"}},
            {"id": "B", "type": "function", "function": {"name": "g", "arguments": "{}"}}
        ]},
        {"role": "tool", "tool_call_id": "A", "name": "f", "content": "ok"}
    ]));

    assert_invariants(&out);

    let call_ids: Vec<String> = out
        .contents
        .iter()
        .flat_map(|c| c.parts.iter())
        .filter_map(|p| p.function_call.as_ref().and_then(|c| c.id.clone()))
        .collect();
    let response_ids: Vec<String> = out
        .contents
        .iter()
        .flat_map(|c| c.parts.iter())
        .filter_map(|p| p.function_response.as_ref().and_then(|r| r.id.clone()))
        .collect();

    assert_eq!(call_ids, vec!["A"]);
    assert_eq!(response_ids, vec!["A"]);
}

#[test]
fn invariants_hold_over_assorted_histories() {
    let histories = [
        // Plain conversation, no tools.
        json!([
            {"role": "system", "content": "s"},
            {"role": "user", "content": "q"},
            {"role": "assistant", "content": "a"}
        ]),
        // Healthy tool loop.
        json!([
            {"role": "user", "content": "go"},
            {"role": "assistant", "content": "on it", "tool_calls": [
                {"id": "c1", "type": "function", "function": {"name": "f", "arguments": "{\"k\":1}"}}
            ]},
            {"role": "tool", "tool_call_id": "c1", "content": "r1"},
            {"role": "assistant", "content": "done"}
        ]),
        // Two calls answered across two tool messages.
        json!([
            {"role": "assistant", "tool_calls": [
                {"id": "x", "type": "function", "function": {"name": "f", "arguments": "{}"}},
                {"id": "y", "type": "function", "function": {"name": "g", "arguments": "{}"}}
            ]},
            {"role": "tool", "tool_call_id": "x", "content": "rx"},
            {"role": "tool", "tool_call_id": "y", "content": "ry"}
        ]),
        // Result orphaned by an intervening user turn.
        json!([
            {"role": "assistant", "tool_calls": [
                {"id": "z", "type": "function", "function": {"name": "f", "arguments": "{}"}}
            ]},
            {"role": "user", "content": "changed my mind"},
            {"role": "tool", "tool_call_id": "z", "content": "late"}
        ]),
        // Anthropic-style result block plus trailing text.
        json!([
            {"role": "assistant", "tool_calls": [
                {"id": "t1", "type": "function", "function": {"name": "f", "arguments": "{}"}}
            ]},
            {"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": "t1", "content": "ok"},
                {"type": "text", "text": "and continue"}
            ]}
        ]),
        // Tool response that answers nothing at all.
        json!([
            {"role": "user", "content": "hello"},
            {"role": "tool", "tool_call_id": "ghost", "content": "??"}
        ]),
        // Empty assistant content between turns.
        json!([
            {"role": "user", "content": "a"},
            {"role": "assistant", "content": ""},
            {"role": "user", "content": "b"}
        ]),
    ];

    for history in histories {
        let out = convert(history.clone());
        assert_invariants(&out);
    }
}

#[test]
fn tool_result_user_message_drops_its_text_parts() {
    let out = convert(json!([
        {"role": "assistant", "tool_calls": [
            {"id": "t1", "type": "function", "function": {"name": "f", "arguments": "{}"}}
        ]},
        {"role": "user", "content": [
            {"type": "tool_result", "tool_use_id": "t1", "content": "ok"},
            {"type": "text", "text": "commentary"}
        ]}
    ]));

    let result_message = out
        .contents
        .iter()
        .find(|c| c.parts.iter().any(|p| p.function_response.is_some()))
        .expect("result message present");
    assert!(result_message.parts.iter().all(|p| p.text.is_none()));
}
