use ahash::AHashMap;
use serde_json::Value;
use uuid::Uuid;

use switchboard_schema::openai::{
    ChatCompletionChunk, ChatCompletionRequest, ChatMessage, ChunkChoice, ChunkDelta,
    MessageContent, Reasoning, ResponseItem, ResponseItemContent, ResponsesRequest, ResponsesSseEvent,
    ResponsesTool, ToolCall, ToolCallDelta, ToolCallDeltaFunction, ToolCallFunction, Usage,
};

const DEFAULT_INSTRUCTIONS: &str = "You are Codex, an expert coding assistant.";
const ENCRYPTED_REASONING: &str = "reasoning.encrypted_content";

/// Convert a chat.completions request into an OpenAI Responses request
/// (the Codex upstream dialect).
///
/// Sampling parameters are deliberately omitted: the Codex backend rejects
/// `temperature`/`top_p`. `store` is always false; stateless replay relies
/// on `reasoning.encrypted_content` being included.
pub fn chat_to_responses_request(request: &ChatCompletionRequest, model: &str) -> ResponsesRequest {
    // Callers already speaking the Responses dialect can tunnel their input
    // through `_responsesInput` untouched.
    let passthrough: Option<Vec<ResponseItem>> = request
        .extra
        .get("_responsesInput")
        .and_then(|v| serde_json::from_value(v.clone()).ok());

    let input = passthrough.unwrap_or_else(|| messages_to_input(&request.messages));

    let instructions = derive_instructions(&request.messages);

    let tools: Option<Vec<ResponsesTool>> = request.tools.as_ref().map(|tools| {
        tools
            .iter()
            .filter(|t| t.kind == "function")
            .map(|t| ResponsesTool {
                kind: "function".to_string(),
                name: t.function.name.clone(),
                description: t.function.description.clone(),
                parameters: t.function.parameters.clone(),
            })
            .collect()
    });

    let reasoning = request.effort().map(|effort| Reasoning {
        effort: Some(effort.to_string()),
        extra: Default::default(),
    });

    // store=false drops server-side state; encrypted reasoning is the only
    // way tool loops keep their chain of thought.
    let include = (reasoning.is_some() || tools.as_ref().is_some_and(|t| !t.is_empty()))
        .then(|| vec![ENCRYPTED_REASONING.to_string()]);

    ResponsesRequest {
        model: model.to_string(),
        input,
        instructions,
        include,
        reasoning,
        tools,
        tool_choice: None,
        parallel_tool_calls: true,
        store: false,
        stream: true,
        extra: Default::default(),
    }
}

fn derive_instructions(messages: &[ChatMessage]) -> String {
    let joined = messages
        .iter()
        .filter(|m| m.role == "system" || m.role == "developer")
        .filter_map(ChatMessage::text)
        .filter(|t| !t.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");

    if joined.is_empty() {
        DEFAULT_INSTRUCTIONS.to_string()
    } else {
        joined
    }
}

fn messages_to_input(messages: &[ChatMessage]) -> Vec<ResponseItem> {
    let mut items = Vec::new();

    for message in messages {
        match message.role.as_str() {
            "system" | "developer" => {
                if let Some(text) = message.text() {
                    items.push(message_item("developer", text));
                }
            }
            "assistant" => {
                if let Some(text) = message.text()
                    && !text.is_empty()
                {
                    items.push(message_item("assistant", text));
                }
                for call in message.tool_calls.iter().flatten() {
                    let call_id = call.id.clone().unwrap_or_else(fresh_call_id);
                    items.push(ResponseItem {
                        kind: Some("function_call".to_string()),
                        id: Some(format!("fc_{call_id}")),
                        call_id: Some(call_id),
                        name: Some(call.function.name.clone()),
                        arguments: Some(call.function.arguments.clone()),
                        ..ResponseItem::default()
                    });
                }
            }
            "tool" => {
                items.push(ResponseItem {
                    kind: Some("function_call_output".to_string()),
                    call_id: message.tool_call_id.clone(),
                    output: message.text(),
                    ..ResponseItem::default()
                });
            }
            _ => {
                if let Some(text) = message.text() {
                    items.push(message_item("user", text));
                }
            }
        }
    }

    items
}

fn message_item(role: &str, text: String) -> ResponseItem {
    ResponseItem {
        kind: Some("message".to_string()),
        role: Some(role.to_string()),
        content: Some(ResponseItemContent::Text(text)),
        ..ResponseItem::default()
    }
}

fn fresh_call_id() -> String {
    format!("call_{}", Uuid::new_v4())
}

/// Inverse mapping: Responses input items back into chat messages.
///
/// function_call items fold into the preceding assistant message;
/// developer messages come back as system messages.
pub fn responses_input_to_messages(items: &[ResponseItem]) -> Vec<ChatMessage> {
    let mut messages: Vec<ChatMessage> = Vec::new();

    for item in items {
        match item.kind.as_deref() {
            Some("function_call") => {
                let call = ToolCall {
                    id: item.call_id.clone(),
                    kind: Some("function".to_string()),
                    function: ToolCallFunction {
                        name: item.name.clone().unwrap_or_default(),
                        arguments: item.arguments.clone().unwrap_or_default(),
                    },
                };

                match messages.last_mut() {
                    Some(last) if last.role == "assistant" && last.tool_call_id.is_none() => {
                        last.tool_calls.get_or_insert_with(Vec::new).push(call);
                    }
                    _ => messages.push(ChatMessage {
                        role: "assistant".to_string(),
                        content: None,
                        tool_calls: Some(vec![call]),
                        tool_call_id: None,
                        name: None,
                        reasoning_content: None,
                        extra: Default::default(),
                    }),
                }
            }
            Some("function_call_output") => {
                messages.push(ChatMessage {
                    role: "tool".to_string(),
                    content: item.output.clone().map(MessageContent::Text),
                    tool_calls: None,
                    tool_call_id: item.call_id.clone(),
                    name: None,
                    reasoning_content: None,
                    extra: Default::default(),
                });
            }
            _ => {
                let role = match item.role.as_deref() {
                    Some("developer") => "system",
                    Some(other) => other,
                    None => continue,
                };
                messages.push(ChatMessage {
                    role: role.to_string(),
                    content: item
                        .content
                        .as_ref()
                        .map(|c| MessageContent::Text(c.text())),
                    tool_calls: None,
                    tool_call_id: None,
                    name: None,
                    reasoning_content: None,
                    extra: Default::default(),
                });
            }
        }
    }

    messages
}

/// Pull-based transform state: Responses SSE events in,
/// chat.completion.chunk frames out.
pub struct ResponsesSseState {
    completion_id: String,
    created: i64,
    model: String,
    include_reasoning: bool,
    is_first_chunk: bool,
    /// output_index -> allocated tool-call index.
    call_index_of: AHashMap<u32, u32>,
    next_call_index: u32,
    last_call_index: Option<u32>,
    finished: bool,
}

impl ResponsesSseState {
    pub fn new(model: &str, include_reasoning: bool) -> Self {
        Self {
            completion_id: format!("chatcmpl-{}", Uuid::new_v4()),
            created: chrono::Utc::now().timestamp(),
            model: model.to_string(),
            include_reasoning,
            is_first_chunk: true,
            call_index_of: AHashMap::new(),
            next_call_index: 0,
            last_call_index: None,
            finished: false,
        }
    }

    fn emit(&mut self, mut delta: ChunkDelta, finish_reason: Option<String>) -> ChatCompletionChunk {
        if self.is_first_chunk {
            delta.role = Some("assistant".to_string());
            self.is_first_chunk = false;
        }
        let mut chunk = ChatCompletionChunk::new(&self.completion_id, self.created, &self.model);
        chunk.choices.push(ChunkChoice {
            index: 0,
            delta,
            finish_reason,
        });
        chunk
    }

    pub fn transform_event(&mut self, event: &ResponsesSseEvent) -> Vec<ChatCompletionChunk> {
        match event.kind.as_str() {
            "response.output_text.delta" => {
                let Some(text) = &event.delta else {
                    return Vec::new();
                };
                vec![self.emit(
                    ChunkDelta {
                        content: Some(text.clone()),
                        ..ChunkDelta::default()
                    },
                    None,
                )]
            }

            kind if kind.starts_with("response.reasoning") && kind.ends_with(".delta") => {
                let Some(text) = &event.delta else {
                    return Vec::new();
                };
                if !self.include_reasoning {
                    return Vec::new();
                }
                vec![self.emit(
                    ChunkDelta {
                        reasoning_content: Some(text.clone()),
                        ..ChunkDelta::default()
                    },
                    None,
                )]
            }

            "response.output_item.added" => {
                let Some(item) = &event.item else {
                    return Vec::new();
                };
                if item.kind.as_deref() != Some("function_call") {
                    return Vec::new();
                }

                let call_index = self.next_call_index;
                self.next_call_index += 1;
                if let Some(output_index) = event.output_index {
                    self.call_index_of.insert(output_index, call_index);
                }
                self.last_call_index = Some(call_index);

                let id = item
                    .call_id
                    .clone()
                    .or_else(|| item.id.clone())
                    .unwrap_or_else(fresh_call_id);

                vec![self.emit(
                    ChunkDelta {
                        tool_calls: Some(vec![ToolCallDelta {
                            index: call_index,
                            id: Some(id),
                            kind: Some("function".to_string()),
                            function: ToolCallDeltaFunction {
                                name: item.name.clone(),
                                arguments: Some(String::new()),
                            },
                        }]),
                        ..ChunkDelta::default()
                    },
                    None,
                )]
            }

            "response.function_call_arguments.delta" => {
                let Some(fragment) = &event.delta else {
                    return Vec::new();
                };
                let call_index = event
                    .output_index
                    .and_then(|idx| self.call_index_of.get(&idx).copied())
                    .or(self.last_call_index);
                let Some(call_index) = call_index else {
                    return Vec::new();
                };

                vec![self.emit(
                    ChunkDelta {
                        tool_calls: Some(vec![ToolCallDelta {
                            index: call_index,
                            id: None,
                            kind: None,
                            function: ToolCallDeltaFunction {
                                name: None,
                                arguments: Some(fragment.clone()),
                            },
                        }]),
                        ..ChunkDelta::default()
                    },
                    None,
                )]
            }

            "response.completed" | "response.done" => {
                if self.finished {
                    return Vec::new();
                }
                self.finished = true;

                let status = event
                    .response
                    .as_ref()
                    .and_then(|r| r.get("status"))
                    .and_then(Value::as_str);

                let finish_reason = if status == Some("incomplete") {
                    "length"
                } else if self.next_call_index > 0 {
                    "tool_calls"
                } else {
                    "stop"
                };

                let usage = event
                    .response
                    .as_ref()
                    .and_then(|r| r.get("usage"))
                    .map(|u| Usage {
                        prompt_tokens: u.get("input_tokens").and_then(Value::as_u64).unwrap_or(0),
                        completion_tokens: u
                            .get("output_tokens")
                            .and_then(Value::as_u64)
                            .unwrap_or(0),
                        total_tokens: u.get("total_tokens").and_then(Value::as_u64).unwrap_or(0),
                    });

                let mut chunk = self.emit(ChunkDelta::default(), Some(finish_reason.to_string()));
                chunk.usage = usage;
                vec![chunk]
            }

            // Lifecycle noise (created, in_progress, output_item.done, ...).
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(value: serde_json::Value) -> ChatCompletionRequest {
        serde_json::from_value(value).expect("request must parse")
    }

    fn event(value: serde_json::Value) -> ResponsesSseEvent {
        serde_json::from_value(value).expect("event must parse")
    }

    #[test]
    fn fixed_flags_and_default_instructions() {
        let req = request(json!({
            "model": "gpt-5-codex",
            "messages": [{"role": "user", "content": "hi"}]
        }));

        let out = chat_to_responses_request(&req, "gpt-5-codex");
        assert!(!out.store);
        assert!(out.stream);
        assert!(out.parallel_tool_calls);
        assert_eq!(out.instructions, DEFAULT_INSTRUCTIONS);
        assert!(out.include.is_none());
        // temperature/top_p never serialize: the struct has no such fields.
        let value = serde_json::to_value(&out).unwrap();
        assert!(value.get("temperature").is_none());
        assert!(value.get("top_p").is_none());
    }

    #[test]
    fn system_text_feeds_instructions_and_developer_message() {
        let req = request(json!({
            "model": "gpt-5",
            "messages": [
                {"role": "system", "content": "be terse"},
                {"role": "user", "content": "hi"}
            ]
        }));

        let out = chat_to_responses_request(&req, "gpt-5");
        assert_eq!(out.instructions, "be terse");
        assert_eq!(out.input[0].role.as_deref(), Some("developer"));
        assert_eq!(out.input[1].role.as_deref(), Some("user"));
    }

    #[test]
    fn tool_calls_become_function_call_items() {
        let req = request(json!({
            "model": "gpt-5",
            "messages": [
                {"role": "assistant", "content": "checking",
                 "tool_calls": [{"id": "call_1", "type": "function",
                                 "function": {"name": "f", "arguments": "{\"x\":1}"}}]},
                {"role": "tool", "tool_call_id": "call_1", "content": "ok"}
            ]
        }));

        let out = chat_to_responses_request(&req, "gpt-5");
        assert_eq!(out.input[0].kind.as_deref(), Some("message"));
        assert_eq!(out.input[1].kind.as_deref(), Some("function_call"));
        assert_eq!(out.input[1].call_id.as_deref(), Some("call_1"));
        assert_eq!(out.input[2].kind.as_deref(), Some("function_call_output"));
        assert_eq!(out.input[2].output.as_deref(), Some("ok"));
    }

    #[test]
    fn reasoning_or_tools_pull_in_encrypted_content() {
        let req = request(json!({
            "model": "gpt-5",
            "messages": [{"role": "user", "content": "hi"}],
            "reasoning_effort": "high"
        }));
        let out = chat_to_responses_request(&req, "gpt-5");
        assert_eq!(
            out.include.as_deref(),
            Some(&[ENCRYPTED_REASONING.to_string()][..])
        );
        assert_eq!(
            out.reasoning.as_ref().and_then(|r| r.effort.as_deref()),
            Some("high")
        );
    }

    #[test]
    fn round_trip_preserves_content_and_tool_calls() {
        let req = request(json!({
            "model": "gpt-5",
            "messages": [
                {"role": "system", "content": "sys"},
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "look",
                 "tool_calls": [{"id": "call_1", "type": "function",
                                 "function": {"name": "f", "arguments": "{\"x\":1}"}}]},
                {"role": "tool", "tool_call_id": "call_1", "content": "ok"},
                {"role": "assistant", "content": "done"}
            ]
        }));

        let responses = chat_to_responses_request(&req, "gpt-5");
        let back = responses_input_to_messages(&responses.input);

        assert_eq!(back.len(), 5);
        assert_eq!(back[0].role, "system");
        assert_eq!(back[0].text().as_deref(), Some("sys"));
        assert_eq!(back[1].text().as_deref(), Some("hi"));
        assert_eq!(back[2].role, "assistant");
        assert_eq!(back[2].text().as_deref(), Some("look"));
        let calls = back[2].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id.as_deref(), Some("call_1"));
        assert_eq!(calls[0].function.name, "f");
        assert_eq!(calls[0].function.arguments, "{\"x\":1}");
        assert_eq!(back[3].role, "tool");
        assert_eq!(back[3].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(back[4].text().as_deref(), Some("done"));
    }

    #[test]
    fn responses_passthrough_input_wins() {
        let req = request(json!({
            "model": "gpt-5",
            "messages": [{"role": "user", "content": "ignored"}],
            "_responsesInput": [
                {"type": "message", "role": "user", "content": "tunneled"}
            ]
        }));

        let out = chat_to_responses_request(&req, "gpt-5");
        assert_eq!(out.input.len(), 1);
        assert_eq!(
            out.input[0].content.as_ref().map(|c| c.text()),
            Some("tunneled".to_string())
        );
    }

    #[test]
    fn stream_text_deltas_and_completion() {
        let mut state = ResponsesSseState::new("gpt-5", false);

        let first = state.transform_event(&event(json!({
            "type": "response.output_text.delta", "delta": "he"
        })));
        assert_eq!(first[0].choices[0].delta.role.as_deref(), Some("assistant"));
        assert_eq!(first[0].choices[0].delta.content.as_deref(), Some("he"));

        let done = state.transform_event(&event(json!({
            "type": "response.completed",
            "response": {"status": "completed",
                         "usage": {"input_tokens": 3, "output_tokens": 5, "total_tokens": 8}}
        })));
        assert_eq!(done[0].choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(done[0].usage.as_ref().unwrap().total_tokens, 8);
    }

    #[test]
    fn stream_function_call_open_and_argument_deltas() {
        let mut state = ResponsesSseState::new("gpt-5", false);

        let opened = state.transform_event(&event(json!({
            "type": "response.output_item.added",
            "output_index": 2,
            "item": {"type": "function_call", "call_id": "call_9", "name": "f"}
        })));
        let tc = &opened[0].choices[0].delta.tool_calls.as_ref().unwrap()[0];
        assert_eq!(tc.index, 0);
        assert_eq!(tc.id.as_deref(), Some("call_9"));
        assert_eq!(tc.function.name.as_deref(), Some("f"));
        assert_eq!(tc.function.arguments.as_deref(), Some(""));

        let delta = state.transform_event(&event(json!({
            "type": "response.function_call_arguments.delta",
            "output_index": 2,
            "delta": "{\"x\":"
        })));
        let tc = &delta[0].choices[0].delta.tool_calls.as_ref().unwrap()[0];
        assert_eq!(tc.index, 0);
        assert_eq!(tc.function.arguments.as_deref(), Some("{\"x\":"));

        let done = state.transform_event(&event(json!({
            "type": "response.completed", "response": {"status": "completed"}
        })));
        assert_eq!(
            done[0].choices[0].finish_reason.as_deref(),
            Some("tool_calls")
        );
    }

    #[test]
    fn incomplete_status_maps_to_length() {
        let mut state = ResponsesSseState::new("gpt-5", false);
        let done = state.transform_event(&event(json!({
            "type": "response.completed", "response": {"status": "incomplete"}
        })));
        assert_eq!(done[0].choices[0].finish_reason.as_deref(), Some("length"));
    }

    #[test]
    fn reasoning_deltas_respect_include_flag() {
        let reasoning_event = json!({
            "type": "response.reasoning_summary_text.delta", "delta": "thinking"
        });

        let mut silent = ResponsesSseState::new("gpt-5", false);
        assert!(silent.transform_event(&event(reasoning_event.clone())).is_empty());

        let mut verbose = ResponsesSseState::new("gpt-5", true);
        let chunks = verbose.transform_event(&event(reasoning_event));
        assert_eq!(
            chunks[0].choices[0].delta.reasoning_content.as_deref(),
            Some("thinking")
        );
    }

    #[test]
    fn lifecycle_events_are_ignored() {
        let mut state = ResponsesSseState::new("gpt-5", false);
        assert!(state.transform_event(&event(json!({"type": "response.created"}))).is_empty());
        assert!(
            state
                .transform_event(&event(json!({"type": "response.output_item.done", "item": {}})))
                .is_empty()
        );
    }
}
