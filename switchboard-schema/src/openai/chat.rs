use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Inbound OpenAI `chat.completions` request body.
///
/// Only the fields the proxy inspects are modeled; everything else is kept in
/// `extra` so caller extensions (e.g. a raw Responses-API `input` passthrough)
/// survive untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,

    #[serde(default)]
    pub messages: Vec<ChatMessage>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<StopSequences>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,

    /// Unified reasoning object (`{"effort": "high"}` style).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningOptions>,

    /// Flat variant of the same knob, as emitted by several OpenAI SDKs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,

    /// Explicit thinking budget override (tokens). Wins over effort mapping.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_thoughts: Option<bool>,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ChatCompletionRequest {
    /// Effort string from either the nested or the flat field.
    pub fn effort(&self) -> Option<&str> {
        self.reasoning
            .as_ref()
            .and_then(|r| r.effort.as_deref())
            .or(self.reasoning_effort.as_deref())
    }

    /// Whether the caller asked for reasoning output at all.
    pub fn wants_reasoning(&self) -> bool {
        self.reasoning.is_some()
            || self.reasoning_effort.is_some()
            || self.thinking_budget.is_some()
            || self.include_thoughts == Some(true)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effort: Option<String>,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// `stop` accepts a single string or a list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StopSequences {
    Single(String),
    Many(Vec<String>),
}

impl StopSequences {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            StopSequences::Single(s) => vec![s],
            StopSequences::Many(v) => v,
        }
    }
}

/// One conversation message in OpenAI chat shape.
///
/// Kept permissive (all-optional fields rather than a tagged enum) because
/// clients mix dialects freely: Anthropic-style `tool_result` blocks arrive
/// inside `role="user"` content, tool responses arrive as `role="tool"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,

    /// Set on `role="tool"` responses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ChatMessage {
    /// Flattened text of the message content (parts joined, non-text skipped).
    pub fn text(&self) -> Option<String> {
        match self.content.as_ref()? {
            MessageContent::Text(s) => Some(s.clone()),
            MessageContent::Parts(parts) => {
                let texts: Vec<&str> = parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .filter(|t| !t.is_empty())
                    .collect();
                if texts.is_empty() {
                    None
                } else {
                    Some(texts.join("\n"))
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// A single content block. `type` discriminates; unknown block types keep
/// their payload in `extra` and are ignored by converters.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<ImageUrl>,

    /// Anthropic-style tool result reference (`type="tool_result"`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    pub function: ToolCallFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallFunction {
    pub name: String,

    /// JSON-encoded argument object. May be empty or malformed; converters
    /// fall back to `{}`.
    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub kind: String,

    pub function: FunctionDecl,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_and_parts_content_both_parse() {
        let req: ChatCompletionRequest = serde_json::from_value(json!({
            "model": "m",
            "messages": [
                {"role": "user", "content": "hi"},
                {"role": "user", "content": [
                    {"type": "text", "text": "a"},
                    {"type": "image_url", "image_url": {"url": "https://x/y.png"}}
                ]}
            ]
        }))
        .unwrap();

        assert_eq!(req.messages[0].text().as_deref(), Some("hi"));
        match req.messages[1].content.as_ref().unwrap() {
            MessageContent::Parts(parts) => {
                assert_eq!(parts.len(), 2);
                assert_eq!(parts[1].kind, "image_url");
            }
            MessageContent::Text(_) => panic!("expected parts"),
        }
    }

    #[test]
    fn effort_prefers_nested_reasoning_object() {
        let req: ChatCompletionRequest = serde_json::from_value(json!({
            "model": "m",
            "messages": [],
            "reasoning": {"effort": "high"},
            "reasoning_effort": "low"
        }))
        .unwrap();
        assert_eq!(req.effort(), Some("high"));
        assert!(req.wants_reasoning());
    }

    #[test]
    fn unknown_fields_survive_in_extra() {
        let req: ChatCompletionRequest = serde_json::from_value(json!({
            "model": "m",
            "messages": [],
            "_responsesInput": [{"role": "user", "content": "hi"}]
        }))
        .unwrap();
        assert!(req.extra.contains_key("_responsesInput"));
    }

    #[test]
    fn stop_accepts_string_or_array() {
        let single: StopSequences = serde_json::from_value(json!("END")).unwrap();
        let many: StopSequences = serde_json::from_value(json!(["a", "b"])).unwrap();
        assert_eq!(single.into_vec(), vec!["END"]);
        assert_eq!(many.into_vec(), vec!["a", "b"]);
    }
}
