use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// OpenAI Responses-API request body (the Codex upstream dialect).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesRequest {
    pub model: String,

    pub input: Vec<ResponseItem>,

    pub instructions: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub include: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<Reasoning>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ResponsesTool>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ResponsesToolChoice>,

    pub parallel_tool_calls: bool,

    pub store: bool,

    pub stream: bool,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reasoning {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effort: Option<String>,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// One Responses-API input item.
///
/// `type` distinguishes `message`, `function_call`, and
/// `function_call_output`; the remaining fields apply per type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseItem {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<ResponseItemContent>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseItemContent {
    Text(String),
    Parts(Vec<Value>),
}

impl ResponseItemContent {
    /// Joined text of all text-like parts.
    pub fn text(&self) -> String {
        match self {
            ResponseItemContent::Text(s) => s.clone(),
            ResponseItemContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    Value::String(s) => Some(s.as_str()),
                    Value::Object(o) => o.get("text").and_then(Value::as_str),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesTool {
    #[serde(rename = "type")]
    pub kind: String,

    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponsesToolChoice {
    Mode(String),
    Spec(Value),
}

/// One Responses-API SSE event, decoded just far enough to transform.
///
/// `type` is the event discriminator (`response.output_text.delta`,
/// `response.function_call_arguments.delta`, `response.output_item.added`,
/// `response.completed`, ...); the payload fields are all optional.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponsesSseEvent {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub delta: Option<String>,

    #[serde(default)]
    pub item: Option<ResponseItem>,

    #[serde(default)]
    pub output_index: Option<u32>,

    #[serde(default)]
    pub response: Option<Value>,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}
