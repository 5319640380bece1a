use axum::{
    Json,
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use chrono::Utc;
use serde_json::json;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::server::router::AppState;

/// Resolves the calling user from a proxy API key
/// (`Authorization: Bearer`, `x-api-key`, or a `?key=` query parameter for
/// browser-driven OAuth entry points).
#[derive(Debug, Clone)]
pub struct AuthedUser {
    pub user_id: String,
}

fn extract_header_token(headers: &axum::http::HeaderMap) -> Option<String> {
    if let Some(k) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        return Some(k.to_string());
    }
    headers
        .typed_get::<Authorization<Bearer>>()
        .map(|auth| auth.token().to_string())
}

fn extract_query_token(query: Option<&str>) -> Option<String> {
    query.and_then(|q| {
        url::form_urlencoded::parse(q.as_bytes())
            .find(|(k, _)| k == "key")
            .map(|(_, v)| v.into_owned())
    })
}

pub(crate) fn hash_key(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// First eight characters of the key, stored alongside the hash so users
/// can tell their keys apart.
pub(crate) fn key_preview(key: &str) -> String {
    key.chars().take(8).collect()
}

impl FromRequestParts<AppState> for AuthedUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_header_token(&parts.headers)
            .or_else(|| extract_query_token(parts.uri.query()))
            .ok_or(AuthError::MissingKey)?;

        let hash = hash_key(&token);
        let row = state
            .db
            .lookup_proxy_key(&hash)
            .await
            .map_err(|_| AuthError::Internal)?
            .ok_or(AuthError::InvalidKey)?;

        // Re-compare the stored hash in constant time.
        if !bool::from(row.key_hash.as_bytes().ct_eq(hash.as_bytes())) {
            return Err(AuthError::InvalidKey);
        }

        if !row.is_usable(Utc::now()) {
            return Err(AuthError::InvalidKey);
        }

        Ok(AuthedUser {
            user_id: row.user_id,
        })
    }
}

pub enum AuthError {
    MissingKey,
    InvalidKey,
    Internal,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, reason) = match self {
            AuthError::MissingKey => (StatusCode::UNAUTHORIZED, "Missing API key"),
            AuthError::InvalidKey => (StatusCode::UNAUTHORIZED, "Invalid API key"),
            AuthError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "Key lookup failed"),
        };
        (
            status,
            Json(json!({ "error": { "message": reason, "type": "authentication_error" } })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_hex_sha256() {
        let hash = hash_key("sk-proxy-123");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, hash_key("sk-proxy-123"));
        assert_ne!(hash, hash_key("sk-proxy-124"));
    }

    #[test]
    fn preview_is_first_eight_chars() {
        assert_eq!(key_preview("sk-proxy-123"), "sk-proxy");
        assert_eq!(key_preview("abc"), "abc");
    }

    #[test]
    fn query_token_extraction() {
        assert_eq!(
            extract_query_token(Some("key=sk-1&x=2")),
            Some("sk-1".to_string())
        );
        assert_eq!(extract_query_token(Some("x=2")), None);
        assert_eq!(extract_query_token(None), None);
    }
}
