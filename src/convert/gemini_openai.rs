use ahash::AHashMap;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use switchboard_schema::gemini::{Candidate, GenerateContentResponse, UsageMetadata};
use switchboard_schema::openai::{
    AssistantMessage, ChatChoice, ChatCompletion, ChatCompletionChunk, ChunkChoice, ChunkDelta,
    ToolCall, ToolCallDelta, ToolCallDeltaFunction, ToolCallFunction, Usage,
};

use crate::toolschema::ToolSchemaMap;

fn map_finish_reason(upstream: &str, has_tool_calls: bool) -> String {
    match upstream {
        "STOP" if has_tool_calls => "tool_calls".to_string(),
        "STOP" => "stop".to_string(),
        "MAX_TOKENS" => "length".to_string(),
        "TOOL_CALLS" => "tool_calls".to_string(),
        _ => "stop".to_string(),
    }
}

fn map_usage(usage: &UsageMetadata) -> Usage {
    Usage {
        prompt_tokens: usage.prompt_token_count.unwrap_or(0),
        completion_tokens: usage.candidates_token_count.unwrap_or(0),
        total_tokens: usage.total_token_count.unwrap_or(0),
    }
}

fn fresh_call_id() -> String {
    format!("call_{}", Uuid::new_v4())
}

/// Convert a buffered Gemini response into a `chat.completion` body.
pub fn gemini_to_chat_completion(
    response: &GenerateContentResponse,
    id: &str,
    created: i64,
    model: &str,
    include_reasoning: bool,
    schemas: &ToolSchemaMap,
) -> ChatCompletion {
    let choices = response
        .candidates
        .iter()
        .enumerate()
        .map(|(index, candidate)| map_candidate(candidate, index as u32, include_reasoning, schemas))
        .collect();

    ChatCompletion {
        id: id.to_string(),
        object: "chat.completion".to_string(),
        created,
        model: model.to_string(),
        choices,
        usage: response.usage_metadata.as_ref().map(map_usage),
        extra: Default::default(),
    }
}

fn map_candidate(
    candidate: &Candidate,
    index: u32,
    include_reasoning: bool,
    schemas: &ToolSchemaMap,
) -> ChatChoice {
    let mut content = String::new();
    let mut reasoning = String::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    for part in candidate.content.iter().flat_map(|c| c.parts.iter()) {
        if let Some(text) = &part.text {
            if part.is_thought() {
                reasoning.push_str(text);
            } else {
                content.push_str(text);
            }
        }

        if let Some(call) = &part.function_call {
            let args = schemas.normalize_args(&call.name, call.args.clone().unwrap_or(json!({})));
            tool_calls.push(ToolCall {
                id: Some(call.id.clone().unwrap_or_else(fresh_call_id)),
                kind: Some("function".to_string()),
                function: ToolCallFunction {
                    name: call.name.clone(),
                    arguments: serde_json::to_string(&args).unwrap_or_else(|_| "{}".to_string()),
                },
            });
        }
    }

    let has_tool_calls = !tool_calls.is_empty();
    let finish_reason = candidate
        .finish_reason
        .as_deref()
        .map(|r| map_finish_reason(r, has_tool_calls))
        .or_else(|| has_tool_calls.then(|| "tool_calls".to_string()));

    ChatChoice {
        index,
        message: AssistantMessage {
            role: "assistant".to_string(),
            content: (!content.is_empty()).then_some(content),
            reasoning_content: (include_reasoning && !reasoning.is_empty()).then_some(reasoning),
            tool_calls: has_tool_calls.then_some(tool_calls),
        },
        finish_reason,
    }
}

struct ToolCallSlot {
    index: u32,
    id: String,
}

/// Pull-based transform state: Gemini SSE frames in, chat.completion.chunk
/// frames out. One instance per response stream.
pub struct GeminiSseState {
    completion_id: String,
    created: i64,
    model: String,
    include_reasoning: bool,
    schemas: Arc<ToolSchemaMap>,
    is_first_chunk: bool,
    tool_call_index: u32,
    has_tool_calls: bool,
    /// name -> allocated (index, id); repeated deltas for the same logical
    /// call share both.
    tool_call_slots: AHashMap<String, ToolCallSlot>,
    usage: Option<Usage>,
}

impl GeminiSseState {
    pub fn new(model: &str, include_reasoning: bool, schemas: Arc<ToolSchemaMap>) -> Self {
        Self {
            completion_id: format!("chatcmpl-{}", Uuid::new_v4()),
            created: chrono::Utc::now().timestamp(),
            model: model.to_string(),
            include_reasoning,
            schemas,
            is_first_chunk: true,
            tool_call_index: 0,
            has_tool_calls: false,
            tool_call_slots: AHashMap::new(),
            usage: None,
        }
    }

    pub fn completion_id(&self) -> &str {
        &self.completion_id
    }

    fn base_chunk(&self) -> ChatCompletionChunk {
        ChatCompletionChunk::new(&self.completion_id, self.created, &self.model)
    }

    fn emit(&mut self, mut delta: ChunkDelta, finish_reason: Option<String>) -> ChatCompletionChunk {
        if self.is_first_chunk {
            delta.role = Some("assistant".to_string());
            self.is_first_chunk = false;
        }

        let mut chunk = self.base_chunk();
        chunk.choices.push(ChunkChoice {
            index: 0,
            delta,
            finish_reason,
        });
        chunk
    }

    /// Transform one upstream frame into zero or more downstream chunks.
    pub fn transform_chunk(&mut self, response: &GenerateContentResponse) -> Vec<ChatCompletionChunk> {
        if let Some(usage) = &response.usage_metadata {
            self.usage = Some(map_usage(usage));
        }

        let mut chunks = Vec::new();

        for candidate in &response.candidates {
            for part in candidate.content.iter().flat_map(|c| c.parts.iter()) {
                if let Some(text) = &part.text
                    && !text.is_empty()
                {
                    if part.is_thought() {
                        if self.include_reasoning {
                            chunks.push(self.emit(
                                ChunkDelta {
                                    reasoning_content: Some(text.clone()),
                                    ..ChunkDelta::default()
                                },
                                None,
                            ));
                        }
                    } else {
                        chunks.push(self.emit(
                            ChunkDelta {
                                content: Some(text.clone()),
                                ..ChunkDelta::default()
                            },
                            None,
                        ));
                    }
                }

                if let Some(call) = &part.function_call {
                    chunks.push(self.emit_tool_call(
                        &call.name,
                        call.id.clone(),
                        call.args.clone().unwrap_or(json!({})),
                    ));
                }
            }

            if let Some(reason) = &candidate.finish_reason {
                let mapped = map_finish_reason(reason, self.has_tool_calls);
                chunks.push(self.emit(ChunkDelta::default(), Some(mapped)));
            }
        }

        chunks
    }

    fn emit_tool_call(
        &mut self,
        name: &str,
        id: Option<String>,
        args: serde_json::Value,
    ) -> ChatCompletionChunk {
        self.has_tool_calls = true;

        if !self.tool_call_slots.contains_key(name) {
            let slot = ToolCallSlot {
                index: self.tool_call_index,
                id: id.unwrap_or_else(fresh_call_id),
            };
            self.tool_call_index += 1;
            self.tool_call_slots.insert(name.to_string(), slot);
        }
        let (slot_index, slot_id) = {
            let slot = &self.tool_call_slots[name];
            (slot.index, slot.id.clone())
        };

        let normalized = self.schemas.normalize_args(name, args);
        let arguments = serde_json::to_string(&normalized).unwrap_or_else(|_| "{}".to_string());

        let delta = ChunkDelta {
            tool_calls: Some(vec![ToolCallDelta {
                index: slot_index,
                id: Some(slot_id),
                kind: Some("function".to_string()),
                function: ToolCallDeltaFunction {
                    name: Some(name.to_string()),
                    arguments: Some(arguments),
                },
            }]),
            ..ChunkDelta::default()
        };

        self.emit(delta, None)
    }

    /// Terminal chunk carrying usage, emitted right before `[DONE]`.
    pub fn flush(&mut self) -> Option<ChatCompletionChunk> {
        let usage = self.usage.take()?;
        let mut chunk = self.base_chunk();
        chunk.usage = Some(usage);
        Some(chunk)
    }
}

/// Fold a buffered chunk sequence into a single `chat.completion` body.
///
/// Used for Claude models where the upstream only streams: the proxy
/// buffers the stream and answers the caller's non-streaming request.
pub fn merge_buffered_chunks(
    chunks: &[ChatCompletionChunk],
    model: &str,
) -> ChatCompletion {
    let mut content = String::new();
    let mut reasoning = String::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();
    let mut slot_of: AHashMap<u32, usize> = AHashMap::new();
    let mut finish_reason = None;
    let mut usage = None;
    let mut id = format!("chatcmpl-{}", Uuid::new_v4());
    let mut created = chrono::Utc::now().timestamp();

    for chunk in chunks {
        id.clone_from(&chunk.id);
        created = chunk.created;
        if let Some(u) = &chunk.usage {
            usage = Some(u.clone());
        }

        for choice in &chunk.choices {
            if let Some(text) = &choice.delta.content {
                content.push_str(text);
            }
            if let Some(text) = &choice.delta.reasoning_content {
                reasoning.push_str(text);
            }
            for delta in choice.delta.tool_calls.iter().flatten() {
                let slot = *slot_of.entry(delta.index).or_insert_with(|| {
                    tool_calls.push(ToolCall {
                        id: delta.id.clone(),
                        kind: Some("function".to_string()),
                        function: ToolCallFunction {
                            name: String::new(),
                            arguments: String::new(),
                        },
                    });
                    tool_calls.len() - 1
                });

                let call = &mut tool_calls[slot];
                if let Some(name) = &delta.function.name
                    && call.function.name.is_empty()
                {
                    call.function.name.clone_from(name);
                }
                if let Some(arguments) = &delta.function.arguments {
                    if call.function.arguments.is_empty() {
                        call.function.arguments.clone_from(arguments);
                    } else {
                        call.function.arguments.push_str(arguments);
                    }
                }
            }
            if let Some(reason) = &choice.finish_reason {
                finish_reason = Some(reason.clone());
            }
        }
    }

    let has_tool_calls = !tool_calls.is_empty();
    ChatCompletion {
        id,
        object: "chat.completion".to_string(),
        created,
        model: model.to_string(),
        choices: vec![ChatChoice {
            index: 0,
            message: AssistantMessage {
                role: "assistant".to_string(),
                content: (!content.is_empty()).then_some(content),
                reasoning_content: (!reasoning.is_empty()).then_some(reasoning),
                tool_calls: has_tool_calls.then_some(tool_calls),
            },
            finish_reason,
        }],
        usage,
        extra: Default::default(),
    }
}
