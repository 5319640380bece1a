use axum::{
    Json,
    extract::State,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::StreamExt;
use futures::stream;
use serde_json::{Value, json};
use std::convert::Infallible;
use uuid::Uuid;

use crate::error::ProxyError;
use crate::providers::{ChunkStream, ProviderResponse};
use crate::server::guards::auth::AuthedUser;
use crate::server::router::AppState;
use switchboard_schema::openai::{ChatCompletion, ChatCompletionRequest, ToolCallDelta};

/// POST /v1/messages
///
/// Thin Anthropic-dialect adapter: the body is rewritten into a
/// chat.completions request, dispatched normally, and the response is
/// rendered back in Anthropic shape.
pub async fn messages(
    State(state): State<AppState>,
    user: AuthedUser,
    Json(body): Json<Value>,
) -> Result<Response, ProxyError> {
    let request = anthropic_to_chat(&body)?;

    let response = state.dispatcher.dispatch(&user.user_id, &request).await?;

    match response {
        ProviderResponse::Completion(completion) => {
            Ok(Json(chat_to_anthropic(&completion)).into_response())
        }
        ProviderResponse::Stream(chunks) => Ok(anthropic_sse(chunks, &request.model)),
    }
}

fn anthropic_to_chat(body: &Value) -> Result<ChatCompletionRequest, ProxyError> {
    let model = body
        .get("model")
        .and_then(Value::as_str)
        .ok_or_else(|| ProxyError::InvalidRequest("model is required".to_string()))?;

    let mut messages: Vec<Value> = Vec::new();

    if let Some(system) = body.get("system") {
        let text = match system {
            Value::String(s) => s.clone(),
            Value::Array(blocks) => blocks
                .iter()
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n"),
            _ => String::new(),
        };
        if !text.is_empty() {
            messages.push(json!({"role": "system", "content": text}));
        }
    }

    for message in body
        .get("messages")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        let role = message.get("role").and_then(Value::as_str).unwrap_or("user");
        match message.get("content") {
            Some(Value::String(text)) => {
                messages.push(json!({"role": role, "content": text}));
            }
            Some(Value::Array(blocks)) => {
                messages.extend(map_anthropic_blocks(role, blocks));
            }
            _ => {}
        }
    }

    let tools: Option<Vec<Value>> = body.get("tools").and_then(Value::as_array).map(|tools| {
        tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.get("name").and_then(Value::as_str).unwrap_or_default(),
                        "description": t.get("description"),
                        "parameters": t.get("input_schema"),
                    }
                })
            })
            .collect()
    });

    let mut request = json!({
        "model": model,
        "messages": messages,
        "stream": body.get("stream").and_then(Value::as_bool).unwrap_or(false),
    });
    for key in ["max_tokens", "temperature", "top_p"] {
        if let Some(value) = body.get(key) {
            request[key] = value.clone();
        }
    }
    if let Some(stop) = body.get("stop_sequences") {
        request["stop"] = stop.clone();
    }
    if let Some(tools) = tools {
        request["tools"] = Value::Array(tools);
    }
    if let Some(thinking) = body.get("thinking")
        && thinking.get("type").and_then(Value::as_str) == Some("enabled")
    {
        if let Some(budget) = thinking.get("budget_tokens") {
            request["thinking_budget"] = budget.clone();
        }
        request["include_thoughts"] = json!(true);
    }

    serde_json::from_value(request)
        .map_err(|e| ProxyError::InvalidRequest(format!("invalid messages body: {e}")))
}

/// One Anthropic message can carry blocks that land in different OpenAI
/// roles (tool_use on the assistant, tool_result on a tool message).
fn map_anthropic_blocks(role: &str, blocks: &[Value]) -> Vec<Value> {
    let mut out = Vec::new();
    let mut text_parts: Vec<Value> = Vec::new();
    let mut tool_calls: Vec<Value> = Vec::new();

    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => text_parts.push(json!({
                "type": "text",
                "text": block.get("text").and_then(Value::as_str).unwrap_or_default()
            })),
            Some("image") => {
                if let Some(source) = block.get("source") {
                    let url = match source.get("type").and_then(Value::as_str) {
                        Some("base64") => format!(
                            "data:{};base64,{}",
                            source.get("media_type").and_then(Value::as_str).unwrap_or("image/png"),
                            source.get("data").and_then(Value::as_str).unwrap_or_default()
                        ),
                        _ => source
                            .get("url")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                    };
                    text_parts.push(json!({"type": "image_url", "image_url": {"url": url}}));
                }
            }
            Some("tool_use") => tool_calls.push(json!({
                "id": block.get("id"),
                "type": "function",
                "function": {
                    "name": block.get("name").and_then(Value::as_str).unwrap_or_default(),
                    "arguments": serde_json::to_string(block.get("input").unwrap_or(&json!({})))
                        .unwrap_or_else(|_| "{}".to_string()),
                }
            })),
            Some("tool_result") => {
                let content = match block.get("content") {
                    Some(Value::String(s)) => Value::String(s.clone()),
                    Some(Value::Array(parts)) => Value::String(
                        parts
                            .iter()
                            .filter_map(|p| p.get("text").and_then(Value::as_str))
                            .collect::<Vec<_>>()
                            .join("\n"),
                    ),
                    _ => Value::Null,
                };
                out.push(json!({
                    "role": "tool",
                    "tool_call_id": block.get("tool_use_id"),
                    "content": content,
                }));
            }
            _ => {}
        }
    }

    if !text_parts.is_empty() || !tool_calls.is_empty() {
        let mut message = json!({"role": role});
        if !text_parts.is_empty() {
            message["content"] = Value::Array(text_parts);
        }
        if !tool_calls.is_empty() {
            message["tool_calls"] = Value::Array(tool_calls);
        }
        // Tool calls belong to the assistant turn; results were emitted
        // above as their own tool messages.
        out.insert(0, message);
    }

    out
}

fn map_stop_reason(finish_reason: Option<&str>) -> &'static str {
    match finish_reason {
        Some("length") => "max_tokens",
        Some("tool_calls") => "tool_use",
        _ => "end_turn",
    }
}

fn chat_to_anthropic(completion: &ChatCompletion) -> Value {
    let mut content: Vec<Value> = Vec::new();
    let mut stop_reason = "end_turn";

    if let Some(choice) = completion.choices.first() {
        if let Some(reasoning) = &choice.message.reasoning_content {
            content.push(json!({"type": "thinking", "thinking": reasoning}));
        }
        if let Some(text) = &choice.message.content {
            content.push(json!({"type": "text", "text": text}));
        }
        for call in choice.message.tool_calls.iter().flatten() {
            content.push(json!({
                "type": "tool_use",
                "id": call.id.clone().unwrap_or_else(|| format!("toolu_{}", Uuid::new_v4())),
                "name": call.function.name,
                "input": serde_json::from_str::<Value>(&call.function.arguments)
                    .unwrap_or_else(|_| json!({})),
            }));
        }
        stop_reason = map_stop_reason(choice.finish_reason.as_deref());
    }

    json!({
        "id": completion.id,
        "type": "message",
        "role": "assistant",
        "model": completion.model,
        "content": content,
        "stop_reason": stop_reason,
        "usage": {
            "input_tokens": completion.usage.as_ref().map_or(0, |u| u.prompt_tokens),
            "output_tokens": completion.usage.as_ref().map_or(0, |u| u.completion_tokens),
        }
    })
}

/// The content block currently streaming, if any. Exactly one block is
/// open at a time; every block must be closed with `content_block_stop`
/// before the next one starts and before the message finishes.
#[derive(Clone, Copy)]
enum OpenBlock {
    Text { index: u32 },
    /// `call_index` is the upstream `tool_calls[].index`, so argument
    /// deltas for the same logical call route to the same block.
    ToolUse { index: u32, call_index: u32 },
}

/// Render a chat.completion.chunk stream as Anthropic SSE events.
fn anthropic_sse(chunks: ChunkStream, model: &str) -> Response {
    struct SseState {
        chunks: ChunkStream,
        pending: std::collections::VecDeque<Event>,
        open_block: Option<OpenBlock>,
        next_block_index: u32,
        started: bool,
        finished: bool,
        message_id: String,
        model: String,
    }

    impl SseState {
        fn event(name: &str, data: Value) -> Event {
            Event::default()
                .event(name)
                .data(serde_json::to_string(&data).unwrap_or_default())
        }

        fn start_events(&mut self) {
            self.started = true;
            self.pending.push_back(Self::event(
                "message_start",
                json!({"type": "message_start", "message": {
                    "id": self.message_id, "type": "message", "role": "assistant",
                    "model": self.model, "content": [], "stop_reason": null,
                    "usage": {"input_tokens": 0, "output_tokens": 0}
                }}),
            ));
        }

        fn close_open_block(&mut self) {
            if let Some(block) = self.open_block.take() {
                let index = match block {
                    OpenBlock::Text { index } | OpenBlock::ToolUse { index, .. } => index,
                };
                self.pending.push_back(Self::event(
                    "content_block_stop",
                    json!({"type": "content_block_stop", "index": index}),
                ));
            }
        }

        /// Block index for a text delta, opening a fresh text block (and
        /// closing whatever was open) when needed.
        fn text_block_index(&mut self) -> u32 {
            if let Some(OpenBlock::Text { index }) = self.open_block {
                return index;
            }

            self.close_open_block();
            let index = self.next_block_index;
            self.next_block_index += 1;
            self.pending.push_back(Self::event(
                "content_block_start",
                json!({"type": "content_block_start",
                       "index": index,
                       "content_block": {"type": "text", "text": ""}}),
            ));
            self.open_block = Some(OpenBlock::Text { index });
            index
        }

        /// Block index for a tool-call delta. A delta for a new upstream
        /// call index closes the open block and starts a tool_use block at
        /// a fresh index; continuations reuse the open one.
        fn tool_block_index(&mut self, call: &ToolCallDelta) -> u32 {
            if let Some(OpenBlock::ToolUse { index, call_index }) = self.open_block
                && call_index == call.index
            {
                return index;
            }

            self.close_open_block();
            let index = self.next_block_index;
            self.next_block_index += 1;
            self.pending.push_back(Self::event(
                "content_block_start",
                json!({"type": "content_block_start",
                       "index": index,
                       "content_block": {"type": "tool_use",
                           "id": call.id,
                           "name": call.function.name,
                           "input": {}}}),
            ));
            self.open_block = Some(OpenBlock::ToolUse {
                index,
                call_index: call.index,
            });
            index
        }

        fn finish_events(&mut self, stop_reason: &str) {
            self.close_open_block();
            self.pending.push_back(Self::event(
                "message_delta",
                json!({"type": "message_delta",
                       "delta": {"stop_reason": stop_reason},
                       "usage": {"output_tokens": 0}}),
            ));
            self.pending
                .push_back(Self::event("message_stop", json!({"type": "message_stop"})));
            self.finished = true;
        }
    }

    let state = SseState {
        chunks,
        pending: std::collections::VecDeque::new(),
        open_block: None,
        next_block_index: 0,
        started: false,
        finished: false,
        message_id: format!("msg_{}", Uuid::new_v4()),
        model: model.to_string(),
    };

    let events = stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((event, state));
            }
            if state.finished {
                return None;
            }
            if !state.started {
                state.start_events();
                continue;
            }

            match state.chunks.next().await {
                Some(Ok(chunk)) => {
                    for choice in &chunk.choices {
                        if let Some(text) = &choice.delta.content {
                            let index = state.text_block_index();
                            state.pending.push_back(SseState::event(
                                "content_block_delta",
                                json!({"type": "content_block_delta",
                                       "index": index,
                                       "delta": {"type": "text_delta", "text": text}}),
                            ));
                        }
                        for call in choice.delta.tool_calls.iter().flatten() {
                            let index = state.tool_block_index(call);
                            if let Some(arguments) = &call.function.arguments
                                && !arguments.is_empty()
                            {
                                state.pending.push_back(SseState::event(
                                    "content_block_delta",
                                    json!({"type": "content_block_delta",
                                           "index": index,
                                           "delta": {"type": "input_json_delta",
                                                     "partial_json": arguments}}),
                                ));
                            }
                        }
                        if let Some(reason) = &choice.finish_reason {
                            let stop = map_stop_reason(Some(reason.as_str())).to_string();
                            state.finish_events(&stop);
                        }
                    }
                }
                Some(Err(err)) => {
                    state.pending.push_back(SseState::event(
                        "error",
                        json!({"type": "error",
                               "error": {"type": "api_error", "message": err.to_string()}}),
                    ));
                    state.finished = true;
                }
                None => {
                    if !state.finished {
                        state.finish_events("end_turn");
                    }
                }
            }
        }
    })
    .map(Ok::<Event, Infallible>);

    Sse::new(events).keep_alive(KeepAlive::default()).into_response()
}
