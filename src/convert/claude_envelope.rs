use ahash::AHashMap;
use serde_json::{Value, json};

use switchboard_schema::gemini::GenerateContentRequest;

use super::openai_gemini::sanitize_orphan_tool_parts;

/// Base system instruction the Antigravity upstream validates against.
///
/// WARNING: validation is strict text matching; any character change
/// (including missing spaces) fails validation and surfaces as HTTP 429.
pub(crate) const ANTIGRAVITY_SYSTEM_PREAMBLE: &str = "You are Antigravity, a powerful agentic AI coding assistant designed by the Google Deepmind team working on Advanced Agentic Coding. You are pair programming with a USER to solve their coding task. The task may require creating a new codebase, modifying or debugging an existing codebase, or simply answering a question.**Absolute paths only****Proactiveness**";

const THINKING_DEFAULT_BUDGET: u32 = 16_384;
const THINKING_MAX_OUTPUT_TOKENS: u32 = 64_000;

fn wants_preamble(model: &str) -> bool {
    model.contains("claude") || model.contains("gemini-3-pro") || model.contains("gemini-3-flash")
}

fn is_thinking_variant(model: &str) -> bool {
    model.ends_with("-thinking")
}

/// Shape a converted Gemini payload for the Claude-behind-Code-Assist route.
pub fn apply_claude_envelope(request: &mut GenerateContentRequest, model: &str) {
    if wants_preamble(model) {
        request.prepend_system_text(ANTIGRAVITY_SYSTEM_PREAMBLE);
    }

    request.tool_config = Some(json!({
        "functionCallingConfig": { "mode": "VALIDATED" }
    }));

    if is_thinking_variant(model) {
        let config = request.generation_config.get_or_insert_with(Default::default);
        let thinking = config.thinking_config.get_or_insert_with(Default::default);
        if thinking.thinking_budget.is_none() {
            thinking.thinking_budget = Some(THINKING_DEFAULT_BUDGET);
        }
        if thinking.include_thoughts.is_none() {
            thinking.include_thoughts = Some(true);
        }
        if config.max_output_tokens.unwrap_or(0) < THINKING_MAX_OUTPUT_TOKENS {
            config.max_output_tokens = Some(THINKING_MAX_OUTPUT_TOKENS);
        }
    }

    rewrite_tool_schemas(request);
    inherit_function_response_ids(request);
    sanitize_orphan_tool_parts(&mut request.contents);
    strip_empty_text_parts(request);
}

/// Claude expects `parameters` (not Gemini's `parametersJsonSchema`), an
/// explicit object type with `properties`, and no `$schema` marker. Tool
/// names may not start with a digit.
fn rewrite_tool_schemas(request: &mut GenerateContentRequest) {
    for tool in request.tools.iter_mut().flatten() {
        for declaration in &mut tool.function_declarations {
            let mut schema = declaration
                .parameters_json_schema
                .take()
                .or_else(|| declaration.parameters.take())
                .unwrap_or_else(|| json!({}));

            if let Value::Object(map) = &mut schema {
                map.remove("$schema");
                map.entry("type").or_insert_with(|| json!("object"));
                map.entry("properties").or_insert_with(|| json!({}));
            }

            declaration.parameters = Some(schema);
            declaration.name = sanitize_tool_name(&declaration.name);
        }
    }

    for content in &mut request.contents {
        for part in &mut content.parts {
            if let Some(call) = &mut part.function_call {
                call.name = sanitize_tool_name(&call.name);
            }
            if let Some(response) = &mut part.function_response {
                response.name = sanitize_tool_name(&response.name);
            }
        }
    }
}

fn sanitize_tool_name(name: &str) -> String {
    if name.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        format!("t_{name}")
    } else {
        name.to_string()
    }
}

/// functionResponse parts missing an id inherit the id of the matching
/// (same-name) functionCall that precedes them.
fn inherit_function_response_ids(request: &mut GenerateContentRequest) {
    let mut last_call_id_by_name: AHashMap<String, String> = AHashMap::new();

    for content in &mut request.contents {
        for part in &mut content.parts {
            if let Some(call) = &part.function_call
                && let Some(id) = &call.id
            {
                last_call_id_by_name.insert(call.name.clone(), id.clone());
            }

            if let Some(response) = &mut part.function_response
                && response.id.is_none()
                && let Some(id) = last_call_id_by_name.get(&response.name)
            {
                response.id = Some(id.clone());
            }
        }
    }
}

fn strip_empty_text_parts(request: &mut GenerateContentRequest) {
    for content in &mut request.contents {
        content
            .parts
            .retain(|p| p.text.as_deref() != Some(""));
    }
    request.contents.retain(|c| !c.parts.is_empty());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(value: serde_json::Value) -> GenerateContentRequest {
        serde_json::from_value(value).expect("request must parse")
    }

    #[test]
    fn preamble_lands_first_for_claude_models() {
        let mut req = request(json!({
            "contents": [{"role": "user", "parts": [{"text": "hi"}]}],
            "systemInstruction": {"parts": [{"text": "user system"}]}
        }));

        apply_claude_envelope(&mut req, "claude-sonnet-4-5");

        let instruction = req.system_instruction.as_ref().unwrap();
        assert_eq!(
            instruction.parts[0].text.as_deref(),
            Some(ANTIGRAVITY_SYSTEM_PREAMBLE)
        );
        assert_eq!(instruction.parts[1].text.as_deref(), Some("user system"));
    }

    #[test]
    fn preamble_is_idempotent_on_re_request() {
        let mut req = request(json!({
            "contents": [{"role": "user", "parts": [{"text": "hi"}]}]
        }));

        apply_claude_envelope(&mut req, "claude-sonnet-4-5");
        apply_claude_envelope(&mut req, "claude-sonnet-4-5");

        let instruction = req.system_instruction.as_ref().unwrap();
        let preamble_count = instruction
            .parts
            .iter()
            .filter(|p| p.text.as_deref() == Some(ANTIGRAVITY_SYSTEM_PREAMBLE))
            .count();
        assert_eq!(preamble_count, 1);
    }

    #[test]
    fn gpt_models_do_not_get_the_preamble() {
        let mut req = request(json!({
            "contents": [{"role": "user", "parts": [{"text": "hi"}]}]
        }));
        apply_claude_envelope(&mut req, "gemini-2.5-pro");
        assert!(req.system_instruction.is_none());
    }

    #[test]
    fn tool_config_is_forced_to_validated() {
        let mut req = request(json!({
            "contents": [{"role": "user", "parts": [{"text": "hi"}]}]
        }));
        apply_claude_envelope(&mut req, "claude-sonnet-4-5");
        assert_eq!(
            req.tool_config,
            Some(json!({"functionCallingConfig": {"mode": "VALIDATED"}}))
        );
    }

    #[test]
    fn thinking_variant_gets_defaults_and_output_headroom() {
        let mut req = request(json!({
            "contents": [{"role": "user", "parts": [{"text": "hi"}]}],
            "generationConfig": {"maxOutputTokens": 1000}
        }));

        apply_claude_envelope(&mut req, "claude-sonnet-4-5-thinking");

        let config = req.generation_config.as_ref().unwrap();
        assert_eq!(config.max_output_tokens, Some(THINKING_MAX_OUTPUT_TOKENS));
        let thinking = config.thinking_config.as_ref().unwrap();
        assert_eq!(thinking.thinking_budget, Some(THINKING_DEFAULT_BUDGET));
        assert_eq!(thinking.include_thoughts, Some(true));
    }

    #[test]
    fn existing_thinking_budget_is_kept() {
        let mut req = request(json!({
            "contents": [{"role": "user", "parts": [{"text": "hi"}]}],
            "generationConfig": {"thinkingConfig": {"thinkingBudget": 2048}}
        }));

        apply_claude_envelope(&mut req, "claude-opus-4-5-thinking");

        let thinking = req
            .generation_config
            .as_ref()
            .unwrap()
            .thinking_config
            .as_ref()
            .unwrap();
        assert_eq!(thinking.thinking_budget, Some(2048));
        assert_eq!(thinking.include_thoughts, Some(true));
    }

    #[test]
    fn tool_schema_rewrites_to_claude_shape() {
        let mut req = request(json!({
            "contents": [{"role": "user", "parts": [{"text": "hi"}]}],
            "tools": [{"functionDeclarations": [{
                "name": "f",
                "parametersJsonSchema": {"$schema": "http://json-schema.org/draft-07/schema#",
                                          "type": "object",
                                          "properties": {"x": {"type": "number"}}}
            }]}]
        }));

        apply_claude_envelope(&mut req, "claude-sonnet-4-5");

        let declaration = &req.tools.as_ref().unwrap()[0].function_declarations[0];
        assert!(declaration.parameters_json_schema.is_none());
        let parameters = declaration.parameters.as_ref().unwrap();
        assert!(parameters.get("$schema").is_none());
        assert_eq!(parameters["type"], json!("object"));
        assert_eq!(parameters["properties"]["x"]["type"], json!("number"));
    }

    #[test]
    fn schemaless_declaration_gets_object_defaults() {
        let mut req = request(json!({
            "contents": [{"role": "user", "parts": [{"text": "hi"}]}],
            "tools": [{"functionDeclarations": [{"name": "f"}]}]
        }));

        apply_claude_envelope(&mut req, "claude-sonnet-4-5");

        let parameters = req.tools.as_ref().unwrap()[0].function_declarations[0]
            .parameters
            .as_ref()
            .unwrap();
        assert_eq!(parameters, &json!({"type": "object", "properties": {}}));
    }

    #[test]
    fn digit_leading_tool_names_are_prefixed() {
        let mut req = request(json!({
            "contents": [
                {"role": "model", "parts": [{"functionCall": {"id": "A", "name": "7zip", "args": {}}}]},
                {"role": "user", "parts": [{"functionResponse": {"id": "A", "name": "7zip", "response": {}}}]}
            ],
            "tools": [{"functionDeclarations": [{"name": "7zip"}]}]
        }));

        apply_claude_envelope(&mut req, "claude-sonnet-4-5");

        assert_eq!(
            req.tools.as_ref().unwrap()[0].function_declarations[0].name,
            "t_7zip"
        );
        assert_eq!(
            req.contents[0].parts[0].function_call.as_ref().unwrap().name,
            "t_7zip"
        );
        assert_eq!(
            req.contents[1].parts[0]
                .function_response
                .as_ref()
                .unwrap()
                .name,
            "t_7zip"
        );
    }

    #[test]
    fn function_response_inherits_matching_call_id() {
        let mut req = request(json!({
            "contents": [
                {"role": "model", "parts": [{"functionCall": {"id": "A", "name": "f", "args": {}}}]},
                {"role": "user", "parts": [{"functionResponse": {"name": "f", "response": {}}}]}
            ]
        }));

        apply_claude_envelope(&mut req, "claude-sonnet-4-5");

        assert_eq!(
            req.contents[1].parts[0]
                .function_response
                .as_ref()
                .unwrap()
                .id
                .as_deref(),
            Some("A")
        );
    }

    #[test]
    fn orphans_are_resanitized_and_empty_text_stripped() {
        let mut req = request(json!({
            "contents": [
                {"role": "model", "parts": [
                    {"text": ""},
                    {"functionCall": {"id": "orphan", "name": "f", "args": {}}}
                ]},
                {"role": "user", "parts": [{"text": "hi"}]}
            ]
        }));

        apply_claude_envelope(&mut req, "claude-sonnet-4-5");

        assert_eq!(req.contents.len(), 1);
        assert_eq!(req.contents[0].parts[0].text.as_deref(), Some("hi"));
    }
}
