use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::gemini::{GenerateContentRequest, GenerateContentResponse};

/// Google Code Assist RPC envelope wrapped around a Gemini payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeAssistEnvelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,

    pub model: String,

    pub user_agent: String,

    pub request_type: String,

    pub request_id: String,

    pub session_id: String,

    pub request: GenerateContentRequest,
}

impl CodeAssistEnvelope {
    pub fn new(
        project: Option<String>,
        model: impl Into<String>,
        request_id: impl Into<String>,
        session_id: impl Into<String>,
        request: GenerateContentRequest,
    ) -> Self {
        Self {
            project,
            model: model.into(),
            user_agent: "antigravity".to_string(),
            request_type: "agent".to_string(),
            request_id: request_id.into(),
            session_id: session_id.into(),
            request,
        }
    }
}

/// Code Assist response wrapper: the Gemini body arrives under `response`,
/// sometimes additionally wrapped in a one-element array.
#[derive(Debug, Clone, Deserialize)]
pub struct CodeAssistResponseBody {
    #[serde(default)]
    pub response: Option<GenerateContentResponse>,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Strip the `response:` envelope and any array wrapping from a raw frame.
///
/// Returns `None` when the value decodes but carries no Gemini body; callers
/// treat undecodable frames as protocol noise and drop them.
pub fn unwrap_response(value: Value) -> Option<GenerateContentResponse> {
    let value = match value {
        Value::Array(mut items) => {
            if items.len() == 1 {
                items.remove(0)
            } else {
                return None;
            }
        }
        other => other,
    };

    if let Ok(wrapped) = serde_json::from_value::<CodeAssistResponseBody>(value.clone())
        && let Some(inner) = wrapped.response
    {
        return Some(inner);
    }

    serde_json::from_value::<GenerateContentResponse>(value)
        .ok()
        .filter(|resp| !resp.candidates.is_empty() || resp.usage_metadata.is_some())
}

/// `v1internal:loadCodeAssist` response, reduced to the onboarding fields.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadCodeAssistResponse {
    pub cloudaicompanion_project: Option<String>,

    #[serde(default)]
    pub current_tier: Option<AllowedTier>,

    #[serde(default)]
    pub allowed_tiers: Vec<AllowedTier>,
}

impl LoadCodeAssistResponse {
    /// Effective tier id: current tier, else the default allowed tier.
    pub fn tier_id(&self) -> Option<&str> {
        self.current_tier
            .as_ref()
            .and_then(|t| t.id.as_deref())
            .or_else(|| {
                self.allowed_tiers
                    .iter()
                    .find(|t| t.is_default)
                    .and_then(|t| t.id.as_deref())
            })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowedTier {
    pub id: Option<String>,

    #[serde(default)]
    pub is_default: bool,
}
