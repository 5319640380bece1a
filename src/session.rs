use sha2::{Digest, Sha256};
use uuid::Uuid;

use switchboard_schema::openai::ChatMessage;

/// Stable per-conversation identifier: SHA-256 over the first user message
/// text, rendered in UUID format. Every follow-up turn of the same
/// conversation replays the same first message, so the id stays stable
/// without persisting anything.
pub fn session_id(messages: &[ChatMessage]) -> String {
    let seed = messages
        .iter()
        .find(|m| m.role == "user")
        .and_then(ChatMessage::text)
        .unwrap_or_default();

    session_id_from_text(&seed)
}

pub(crate) fn session_id_from_text(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let hex: String = digest.iter().take(16).map(|b| format!("{b:02x}")).collect();
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

/// Fresh per-upstream-call identifier, included in the Code Assist envelope.
pub fn request_id() -> String {
    format!("agent-{}", Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(role: &str, content: &str) -> ChatMessage {
        serde_json::from_value(json!({"role": role, "content": content})).unwrap()
    }

    #[test]
    fn session_id_is_uuid_shaped_and_stable() {
        let messages = vec![message("system", "sys"), message("user", "hello world")];
        let a = session_id(&messages);
        let b = session_id(&messages);

        assert_eq!(a, b);
        assert_eq!(a.len(), 36);
        assert_eq!(a.matches('-').count(), 4);
    }

    #[test]
    fn different_first_user_message_changes_the_id() {
        let a = session_id(&[message("user", "one")]);
        let b = session_id(&[message("user", "two")]);
        assert_ne!(a, b);
    }

    #[test]
    fn later_turns_do_not_change_the_id() {
        let first = vec![message("user", "hello")];
        let mut longer = first.clone();
        longer.push(message("assistant", "hi there"));
        longer.push(message("user", "follow-up"));

        assert_eq!(session_id(&first), session_id(&longer));
    }

    #[test]
    fn request_id_carries_agent_prefix() {
        let id = request_id();
        assert!(id.starts_with("agent-"));
        assert_eq!(id.len(), "agent-".len() + 36);
    }
}
