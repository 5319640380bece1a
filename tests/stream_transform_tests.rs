use serde_json::json;
use std::sync::Arc;

use switchboard::convert::GeminiSseState;
use switchboard::toolschema::ToolSchemaMap;
use switchboard_schema::codeassist::unwrap_response;
use switchboard_schema::openai::ChatCompletionChunk;

fn state() -> GeminiSseState {
    GeminiSseState::new("claude-sonnet-4-5", false, Arc::new(ToolSchemaMap::default()))
}

/// Feed the literal Code Assist frames of a streamed "hello" exchange and
/// check every observable of the downstream chunk sequence.
#[test]
fn streamed_hello_end_to_end() {
    let frames = [
        json!({"response": {"candidates": [{"content": {"parts": [{"text": "he"}]}}]}}),
        json!({"response": {"candidates": [{"content": {"parts": [{"text": "llo"}]}}]}}),
        json!({"response": {"candidates": [{"finishReason": "STOP"}],
               "usageMetadata": {"promptTokenCount": 1, "candidatesTokenCount": 2, "totalTokenCount": 3}}}),
    ];

    let mut state = state();
    let mut chunks: Vec<ChatCompletionChunk> = Vec::new();
    for frame in frames {
        let response = unwrap_response(frame).expect("frame must unwrap");
        chunks.extend(state.transform_chunk(&response));
    }

    // First chunk: role + first text delta.
    assert_eq!(chunks[0].choices[0].delta.role.as_deref(), Some("assistant"));
    assert_eq!(chunks[0].choices[0].delta.content.as_deref(), Some("he"));

    // Second: text only, no role.
    assert!(chunks[1].choices[0].delta.role.is_none());
    assert_eq!(chunks[1].choices[0].delta.content.as_deref(), Some("llo"));

    // Third: empty delta with mapped finish reason.
    let last = &chunks[2].choices[0];
    assert_eq!(last.finish_reason.as_deref(), Some("stop"));
    assert!(last.delta.content.is_none());
    assert!(last.delta.tool_calls.is_none());

    // Usage rides a dedicated terminal chunk, exactly once.
    let usage_chunk = state.flush().expect("usage chunk expected");
    let usage = usage_chunk.usage.as_ref().unwrap();
    assert_eq!(
        (usage.prompt_tokens, usage.completion_tokens, usage.total_tokens),
        (1, 2, 3)
    );
    assert!(state.flush().is_none());

    // All chunks share one completion id.
    let ids: std::collections::BTreeSet<&str> =
        chunks.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids.len(), 1);
}

/// Whatever way the upstream splits text across frames, the concatenated
/// downstream text is identical and the role appears exactly once.
#[test]
fn text_is_preserved_across_arbitrary_chunkings() {
    let full_text = "The quick brown fox jumps over the lazy dog";
    let chunkings: &[&[usize]] = &[&[43], &[1, 42], &[10, 10, 10, 13], &[2; 21]];

    for sizes in chunkings {
        let mut state = state();
        let mut collected = String::new();
        let mut role_count = 0;
        let mut cursor = 0usize;

        for size in sizes.iter() {
            let end = (cursor + size).min(full_text.len());
            let piece = &full_text[cursor..end];
            cursor = end;

            let response = unwrap_response(json!({
                "response": {"candidates": [{"content": {"parts": [{"text": piece}]}}]}
            }))
            .unwrap();

            for chunk in state.transform_chunk(&response) {
                for choice in &chunk.choices {
                    if choice.delta.role.is_some() {
                        role_count += 1;
                    }
                    if let Some(text) = &choice.delta.content {
                        collected.push_str(text);
                    }
                }
            }
        }

        assert_eq!(collected, &full_text[..cursor]);
        assert_eq!(role_count, 1, "role must be emitted exactly once");
    }
}

#[test]
fn interleaved_thought_text_and_calls_keep_ordering() {
    let mut state = GeminiSseState::new(
        "gemini-2.5-pro",
        true,
        Arc::new(ToolSchemaMap::default()),
    );

    let response = unwrap_response(json!({
        "response": {"candidates": [{"content": {"parts": [
            {"thought": true, "text": "plan"},
            {"text": "answer"},
            {"functionCall": {"id": "A", "name": "f", "args": {"x": 1}}}
        ]}}]}
    }))
    .unwrap();

    let chunks = state.transform_chunk(&response);
    assert_eq!(chunks.len(), 3);
    assert_eq!(
        chunks[0].choices[0].delta.reasoning_content.as_deref(),
        Some("plan")
    );
    assert_eq!(chunks[1].choices[0].delta.content.as_deref(), Some("answer"));
    let call = &chunks[2].choices[0].delta.tool_calls.as_ref().unwrap()[0];
    assert_eq!(call.id.as_deref(), Some("A"));
    assert_eq!(call.function.arguments.as_deref(), Some("{\"x\":1}"));
}

#[test]
fn malformed_frames_are_not_decodable_as_responses() {
    assert!(unwrap_response(json!("just a string")).is_none());
    assert!(unwrap_response(json!({"unrelated": true})).is_none());
    assert!(unwrap_response(json!([1, 2, 3])).is_none());
}
