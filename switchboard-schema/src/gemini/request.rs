use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::content::Content;

/// Gemini `generateContent` request body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<GeminiTool>>,

    /// Kept loose: the Claude envelope forces
    /// `functionCallingConfig.mode = "VALIDATED"` which is not part of the
    /// public Gemini surface.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_config: Option<Value>,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl GenerateContentRequest {
    /// Whether any tool declarations are present.
    pub fn has_function_declarations(&self) -> bool {
        self.tools
            .as_ref()
            .is_some_and(|tools| tools.iter().any(|t| !t.function_declarations.is_empty()))
    }

    /// Insert a text part at the very front of the system instruction,
    /// creating the instruction when absent. Idempotent per text.
    pub fn prepend_system_text(&mut self, text: &str) {
        let instruction = self.system_instruction.get_or_insert_with(Content::default);
        if instruction
            .parts
            .first()
            .and_then(|p| p.text.as_deref())
            .is_some_and(|t| t == text)
        {
            return;
        }
        instruction.parts.insert(0, super::Part::text(text));
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_config: Option<ThinkingConfig>,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThinkingConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_thoughts: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<u32>,
}

impl ThinkingConfig {
    pub fn is_empty(&self) -> bool {
        self.include_thoughts.is_none() && self.thinking_budget.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiTool {
    #[serde(default)]
    pub function_declarations: Vec<FunctionDeclaration>,
}

/// A single tool declaration.
///
/// Gemini-routed requests carry the raw JSON schema in
/// `parametersJsonSchema`; the Claude envelope rewrites it into
/// `parameters` with Claude's expectations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDeclaration {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters_json_schema: Option<Value>,
}
