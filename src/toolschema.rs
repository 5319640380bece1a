use ahash::AHashMap;
use serde_json::Value;

use switchboard_schema::openai::ToolDefinition;

/// Declared JSON-schema type of one tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Array,
    Object,
    Other,
}

impl ParamKind {
    fn from_schema_type(value: &Value) -> Self {
        match value.as_str() {
            Some("string") => ParamKind::String,
            Some("array") => ParamKind::Array,
            Some("object") => ParamKind::Object,
            _ => ParamKind::Other,
        }
    }
}

/// Per-request map of tool name -> parameter name -> declared type.
///
/// Captured once from the request's tool declarations and consulted when
/// re-serialising tool-call arguments coming back from an upstream: models
/// frequently return structured values as JSON-encoded strings, and whether
/// to re-parse them depends on what the schema declared.
#[derive(Debug, Default)]
pub struct ToolSchemaMap {
    tools: AHashMap<String, AHashMap<String, ParamKind>>,
}

impl ToolSchemaMap {
    pub fn from_tools(tools: Option<&[ToolDefinition]>) -> Self {
        let mut map = Self::default();
        for tool in tools.unwrap_or_default() {
            let mut params = AHashMap::new();
            if let Some(properties) = tool
                .function
                .parameters
                .as_ref()
                .and_then(|p| p.get("properties"))
                .and_then(Value::as_object)
            {
                for (name, schema) in properties {
                    let kind = schema
                        .get("type")
                        .map_or(ParamKind::Other, ParamKind::from_schema_type);
                    params.insert(name.clone(), kind);
                }
            }
            map.tools.insert(tool.function.name.clone(), params);
        }
        map
    }

    fn kind_of(&self, tool_name: &str, param: &str) -> ParamKind {
        self.tools
            .get(tool_name)
            .and_then(|params| params.get(param))
            .copied()
            .unwrap_or(ParamKind::Other)
    }

    /// Normalise one tool call's argument object.
    ///
    /// - declared `string`: control-char unescape only. Never re-parsed as
    ///   JSON, so a value that happens to look like JSON stays a string.
    /// - declared `array`/`object` with a string value: attempt a JSON
    ///   parse, fall back to control-char unescape.
    /// - anything else: control-char unescape.
    pub fn normalize_args(&self, tool_name: &str, args: Value) -> Value {
        let Value::Object(fields) = args else {
            return args;
        };

        let fields = fields
            .into_iter()
            .map(|(name, value)| {
                let normalized = match value {
                    Value::String(s) => match self.kind_of(tool_name, &name) {
                        ParamKind::String => Value::String(unescape_control(&s)),
                        ParamKind::Array | ParamKind::Object => serde_json::from_str(&s)
                            .unwrap_or_else(|_| Value::String(unescape_control(&s))),
                        ParamKind::Other => Value::String(unescape_control(&s)),
                    },
                    other => other,
                };
                (name, normalized)
            })
            .collect();

        Value::Object(fields)
    }
}

/// Undo doubled control-character escapes (`\\n` -> newline, `\\t` -> tab)
/// without touching anything else.
fn unescape_control(s: &str) -> String {
    if !s.contains("\\n") && !s.contains("\\t") {
        return s.to_string();
    }
    s.replace("\\n", "\n").replace("\\t", "\t")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema_map(parameters: Value) -> ToolSchemaMap {
        let tools: Vec<ToolDefinition> = vec![
            serde_json::from_value(json!({
                "type": "function",
                "function": {"name": "edit", "parameters": parameters}
            }))
            .unwrap(),
        ];
        ToolSchemaMap::from_tools(Some(&tools))
    }

    #[test]
    fn string_param_is_never_json_parsed() {
        let map = schema_map(json!({
            "type": "object",
            "properties": {"content": {"type": "string"}}
        }));

        let out = map.normalize_args("edit", json!({"content": "[1,2,3]"}));
        assert_eq!(out["content"], json!("[1,2,3]"));
    }

    #[test]
    fn string_param_unescapes_control_chars() {
        let map = schema_map(json!({
            "type": "object",
            "properties": {"content": {"type": "string"}}
        }));

        let out = map.normalize_args("edit", json!({"content": "a\\nb\\tc"}));
        assert_eq!(out["content"], json!("a\nb\tc"));
    }

    #[test]
    fn array_param_parses_stringified_json() {
        let map = schema_map(json!({
            "type": "object",
            "properties": {"items": {"type": "array"}}
        }));

        let out = map.normalize_args("edit", json!({"items": "[\"a\",\"b\"]"}));
        assert_eq!(out["items"], json!(["a", "b"]));
    }

    #[test]
    fn array_param_with_broken_json_falls_back_to_unescape() {
        let map = schema_map(json!({
            "type": "object",
            "properties": {"items": {"type": "array"}}
        }));

        let out = map.normalize_args("edit", json!({"items": "[broken\\n"}));
        assert_eq!(out["items"], json!("[broken\n"));
    }

    #[test]
    fn object_param_parses_stringified_object() {
        let map = schema_map(json!({
            "type": "object",
            "properties": {"options": {"type": "object"}}
        }));

        let out = map.normalize_args("edit", json!({"options": "{\"k\":1}"}));
        assert_eq!(out["options"], json!({"k": 1}));
    }

    #[test]
    fn unknown_tool_and_params_pass_through() {
        let map = ToolSchemaMap::default();
        let out = map.normalize_args("nope", json!({"x": "[1]", "y": 2}));
        assert_eq!(out, json!({"x": "[1]", "y": 2}));
    }

    #[test]
    fn non_string_values_are_untouched() {
        let map = schema_map(json!({
            "type": "object",
            "properties": {"items": {"type": "array"}}
        }));

        let out = map.normalize_args("edit", json!({"items": [1, 2]}));
        assert_eq!(out["items"], json!([1, 2]));
    }
}
