use ahash::{AHashMap, AHashSet};
use serde_json::{Value, json};

use switchboard_schema::gemini::{
    Blob, Content, FileData, FunctionCall, FunctionDeclaration, FunctionResponse, GeminiTool,
    GenerateContentRequest, GenerationConfig, Part, ThinkingConfig,
};
use switchboard_schema::openai::{
    ChatCompletionRequest, ChatMessage, ContentPart, MessageContent, StopSequences,
};

/// Effort-to-budget table for the unified reasoning knob.
fn effort_budget(effort: &str) -> Option<u32> {
    match effort {
        "none" => Some(0),
        "low" => Some(1024),
        "medium" => Some(10_000),
        "high" => Some(32_000),
        _ => None,
    }
}

/// Convert an OpenAI chat.completions request into a Gemini
/// `generateContent` request.
///
/// The message walk is preceded by three passes that decide which tool
/// calls and tool results survive: the upstream rejects histories with
/// unanswered tool calls or results that answer nothing.
pub fn chat_to_gemini_request(request: &ChatCompletionRequest) -> GenerateContentRequest {
    let plan = ToolPlan::build(&request.messages);

    let mut system_texts: Vec<String> = Vec::new();
    let mut contents: Vec<Content> = Vec::new();

    for message in &request.messages {
        match message.role.as_str() {
            "system" | "developer" => {
                if let Some(text) = message.text() {
                    system_texts.push(text);
                }
            }
            "assistant" => {
                if let Some(content) = map_assistant_message(message, &plan) {
                    contents.push(content);
                }
            }
            "tool" => {
                if let Some(content) = map_tool_message(message, &plan) {
                    contents.push(content);
                }
            }
            _ => {
                if let Some(content) = map_user_message(message, &plan) {
                    contents.push(content);
                }
            }
        }
    }

    sanitize_orphan_tool_parts(&mut contents);
    group_consecutive_tool_results(&mut contents);
    split_mixed_model_messages(&mut contents);

    let system_instruction = if system_texts.is_empty() {
        None
    } else {
        Some(Content {
            role: None,
            parts: vec![Part::text(system_texts.join("\n"))],
        })
    };

    GenerateContentRequest {
        contents,
        system_instruction,
        generation_config: map_generation_config(request),
        tools: map_tools(request),
        tool_config: None,
        extra: Default::default(),
    }
}

/// Which tool ids survive conversion, decided over three passes.
struct ToolPlan {
    /// Every tool_call_id that has a response somewhere.
    completed: AHashSet<String>,
    /// Every id appearing in an assistant `tool_calls[]`.
    tool_use: AHashSet<String>,
    /// Result ids answering the immediately-preceding assistant batch.
    valid_results: AHashSet<String>,
    /// id -> declared function name, for results that omit the name.
    names: AHashMap<String, String>,
}

impl ToolPlan {
    fn build(messages: &[ChatMessage]) -> Self {
        let mut completed = AHashSet::new();
        let mut tool_use = AHashSet::new();
        let mut names = AHashMap::new();

        for message in messages {
            match message.role.as_str() {
                "tool" => {
                    if let Some(id) = &message.tool_call_id {
                        completed.insert(id.clone());
                    }
                }
                "assistant" => {
                    for call in message.tool_calls.iter().flatten() {
                        if let Some(id) = &call.id {
                            tool_use.insert(id.clone());
                            names.insert(id.clone(), call.function.name.clone());
                        }
                    }
                }
                "user" => {
                    for part in tool_result_parts(message) {
                        if let Some(id) = &part.tool_use_id {
                            completed.insert(id.clone());
                        }
                    }
                }
                _ => {}
            }
        }

        // A result is only valid when it answers the nearest assistant batch:
        // the window resets on system messages and on plain user messages.
        let mut valid_results = AHashSet::new();
        let mut window: AHashSet<String> = AHashSet::new();
        for message in messages {
            match message.role.as_str() {
                "system" | "developer" => window.clear(),
                "assistant" => {
                    window = message
                        .tool_calls
                        .iter()
                        .flatten()
                        .filter_map(|c| c.id.clone())
                        .collect();
                }
                "tool" => {
                    if let Some(id) = &message.tool_call_id
                        && window.contains(id)
                    {
                        valid_results.insert(id.clone());
                    }
                }
                "user" => {
                    let results: Vec<&ContentPart> = tool_result_parts(message).collect();
                    if results.is_empty() {
                        window.clear();
                    } else {
                        for part in results {
                            if let Some(id) = &part.tool_use_id
                                && window.contains(id)
                            {
                                valid_results.insert(id.clone());
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        Self {
            completed,
            tool_use,
            valid_results,
            names,
        }
    }

    fn keeps_call(&self, id: &str) -> bool {
        self.completed.contains(id)
    }

    fn keeps_result(&self, id: &str) -> bool {
        self.valid_results.contains(id) && self.tool_use.contains(id)
    }

    fn name_for(&self, id: &str) -> String {
        self.names.get(id).cloned().unwrap_or_else(|| id.to_string())
    }
}

fn tool_result_parts(message: &ChatMessage) -> impl Iterator<Item = &ContentPart> {
    let parts = match &message.content {
        Some(MessageContent::Parts(parts)) => parts.as_slice(),
        _ => &[],
    };
    parts.iter().filter(|p| p.kind == "tool_result")
}

fn map_user_message(message: &ChatMessage, plan: &ToolPlan) -> Option<Content> {
    let mut parts = Vec::new();

    match &message.content {
        Some(MessageContent::Text(text)) => {
            if !text.is_empty() {
                parts.push(Part::text(text.clone()));
            }
        }
        Some(MessageContent::Parts(blocks)) => {
            for block in blocks {
                match block.kind.as_str() {
                    "text" => {
                        if let Some(text) = &block.text
                            && !text.is_empty()
                        {
                            parts.push(Part::text(text.clone()));
                        }
                    }
                    "image_url" => {
                        if let Some(image) = &block.image_url
                            && let Some(part) = map_image_url(&image.url)
                        {
                            parts.push(part);
                        }
                    }
                    "tool_result" => {
                        if let Some(id) = &block.tool_use_id
                            && plan.keeps_result(id)
                        {
                            parts.push(function_response_part(
                                id,
                                plan.name_for(id),
                                block.content.clone().unwrap_or(Value::Null),
                            ));
                        }
                    }
                    _ => {}
                }
            }
        }
        None => {}
    }

    if parts.is_empty() {
        None
    } else {
        Some(Content::user(parts))
    }
}

fn map_assistant_message(message: &ChatMessage, plan: &ToolPlan) -> Option<Content> {
    let mut parts = Vec::new();

    if let Some(text) = message.text()
        && !text.is_empty()
    {
        parts.push(Part::text(text));
    }

    for call in message.tool_calls.iter().flatten() {
        let Some(id) = &call.id else { continue };
        // Never replay an unanswered tool call upstream.
        if !plan.keeps_call(id) {
            continue;
        }

        let args = parse_arguments(&call.function.arguments);
        parts.push(Part {
            function_call: Some(FunctionCall {
                id: Some(id.clone()),
                name: call.function.name.clone(),
                args: Some(args),
            }),
            ..Part::default()
        });
    }

    if parts.is_empty() {
        None
    } else {
        Some(Content::model(parts))
    }
}

fn map_tool_message(message: &ChatMessage, plan: &ToolPlan) -> Option<Content> {
    let id = message.tool_call_id.as_deref()?;
    if !plan.keeps_result(id) {
        return None;
    }

    let result = message
        .text()
        .map_or(Value::Null, Value::String);

    Some(Content::user(vec![function_response_part(
        id,
        message
            .name
            .clone()
            .unwrap_or_else(|| plan.name_for(id)),
        result,
    )]))
}

fn function_response_part(id: &str, name: String, content: Value) -> Part {
    Part {
        function_response: Some(FunctionResponse {
            id: Some(id.to_string()),
            name,
            response: json!({ "result": content }),
        }),
        ..Part::default()
    }
}

fn parse_arguments(arguments: &str) -> Value {
    if arguments.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(arguments).unwrap_or_else(|_| json!({}))
}

fn map_image_url(url: &str) -> Option<Part> {
    if let Some((mime, data)) = parse_data_url(url) {
        return Some(Part {
            inline_data: Some(Blob {
                mime_type: mime,
                data,
            }),
            ..Part::default()
        });
    }

    Some(Part {
        file_data: Some(FileData {
            mime_type: None,
            file_uri: url.to_string(),
        }),
        ..Part::default()
    })
}

fn parse_data_url(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let (meta, data) = rest.split_once(',')?;
    let (mime, encoding) = meta.split_once(';')?;
    if encoding != "base64" {
        return None;
    }
    Some((mime.to_string(), data.to_string()))
}

/// Drop functionCall parts without a strictly later functionResponse and
/// functionResponse parts without a strictly earlier functionCall, then
/// drop messages emptied by the removals.
pub fn sanitize_orphan_tool_parts(contents: &mut Vec<Content>) {
    let mut call_index: AHashMap<String, usize> = AHashMap::new();
    let mut response_index: AHashMap<String, usize> = AHashMap::new();

    for (index, content) in contents.iter().enumerate() {
        for part in &content.parts {
            if let Some(call) = &part.function_call
                && let Some(id) = &call.id
            {
                call_index.entry(id.clone()).or_insert(index);
            }
            if let Some(response) = &part.function_response
                && let Some(id) = &response.id
            {
                // Last response wins: it must still come after the call.
                response_index.insert(id.clone(), index);
            }
        }
    }

    let id_is_paired = |id: &str| -> bool {
        match (call_index.get(id), response_index.get(id)) {
            (Some(call), Some(response)) => response > call,
            _ => false,
        }
    };

    for content in contents.iter_mut() {
        content.parts.retain(|part| {
            if let Some(call) = &part.function_call {
                return call.id.as_deref().is_some_and(&id_is_paired);
            }
            if let Some(response) = &part.function_response {
                return response.id.as_deref().is_some_and(&id_is_paired);
            }
            true
        });
    }

    contents.retain(|content| !content.parts.is_empty());
}

/// Merge consecutive user messages carrying functionResponse parts:
/// one assistant tool_use batch needs all its results in one user message.
fn group_consecutive_tool_results(contents: &mut Vec<Content>) {
    let mut merged: Vec<Content> = Vec::with_capacity(contents.len());

    for content in contents.drain(..) {
        let is_result_user = !content.is_model()
            && content.parts.iter().any(|p| p.function_response.is_some());

        if is_result_user
            && let Some(previous) = merged.last_mut()
            && !previous.is_model()
            && previous.parts.iter().any(|p| p.function_response.is_some())
        {
            previous.parts.extend(content.parts);
            continue;
        }

        merged.push(content);
    }

    *contents = merged;
}

/// Model messages must not mix text/thought with functionCall parts; split
/// them with text first. User messages carrying functionResponse parts drop
/// their text parts.
fn split_mixed_model_messages(contents: &mut Vec<Content>) {
    let mut result: Vec<Content> = Vec::with_capacity(contents.len());

    for mut content in contents.drain(..) {
        if content.is_model() {
            let has_calls = content.parts.iter().any(|p| p.function_call.is_some());
            let has_text = content
                .parts
                .iter()
                .any(|p| p.function_call.is_none());

            if has_calls && has_text {
                let (calls, text): (Vec<Part>, Vec<Part>) = content
                    .parts
                    .into_iter()
                    .partition(|p| p.function_call.is_some());
                result.push(Content::model(text));
                result.push(Content::model(calls));
                continue;
            }
        } else if content.parts.iter().any(|p| p.function_response.is_some()) {
            content.parts.retain(|p| p.text.is_none());
        }

        result.push(content);
    }

    *contents = result;
}

fn map_generation_config(request: &ChatCompletionRequest) -> Option<GenerationConfig> {
    let stop_sequences = request.stop.clone().map(StopSequences::into_vec);

    let thinking_config = map_thinking_config(request);

    if request.temperature.is_none()
        && request.top_p.is_none()
        && request.max_tokens.is_none()
        && stop_sequences.is_none()
        && thinking_config.is_none()
    {
        return None;
    }

    Some(GenerationConfig {
        temperature: request.temperature,
        top_p: request.top_p,
        max_output_tokens: request.max_tokens,
        stop_sequences,
        thinking_config,
        extra: Default::default(),
    })
}

fn map_thinking_config(request: &ChatCompletionRequest) -> Option<ThinkingConfig> {
    let budget = request
        .thinking_budget
        .or_else(|| request.effort().and_then(effort_budget));

    let config = ThinkingConfig {
        thinking_budget: budget,
        include_thoughts: request.include_thoughts,
    };

    (!config.is_empty()).then_some(config)
}

fn map_tools(request: &ChatCompletionRequest) -> Option<Vec<GeminiTool>> {
    let tools = request.tools.as_ref()?;
    let declarations: Vec<FunctionDeclaration> = tools
        .iter()
        .filter(|t| t.kind == "function")
        .map(|t| FunctionDeclaration {
            name: t.function.name.clone(),
            description: t.function.description.clone(),
            parameters: None,
            parameters_json_schema: t.function.parameters.clone(),
        })
        .collect();

    if declarations.is_empty() {
        None
    } else {
        Some(vec![GeminiTool {
            function_declarations: declarations,
        }])
    }
}
