use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::IntoResponse,
};
use serde::Serialize;
use thiserror::Error as ThisError;

use super::IsRetryable;
use super::oauth::OauthError;

/// Top-level error surface of the proxy.
///
/// Each variant maps to exactly one downstream HTTP status; the mapping is
/// the contract, not an implementation detail.
#[derive(Debug, ThisError)]
pub enum ProxyError {
    /// 400: body shape or parameters unacceptable upstream.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// 401: credential refresh failed past expiry; account needs re-auth.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// 403: provider denies scope/tier.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// 429: upstream rate limit after all accounts were tried.
    #[error("Rate limited upstream")]
    RateLimited {
        retry_after_ms: u64,
        message: Option<String>,
    },

    /// 503: no selectable account for the requested model.
    #[error("No account available for the requested model")]
    QuotaExhausted { retry_after_ms: u64 },

    /// 502: network failure or upstream 5xx past the retry budget.
    #[error("Upstream transient failure: {0}")]
    UpstreamTransient(String),

    /// 500: malformed upstream frame that could not be recovered.
    #[error("Upstream protocol mismatch: {0}")]
    ProtocolMismatch(String),

    #[error(transparent)]
    Oauth(#[from] OauthError),

    #[error("HTTP request error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Actor error: {0}")]
    Actor(String),

    #[error("Unexpected error: {0}")]
    Internal(String),
}

impl ProxyError {
    /// Stable machine-readable type string for the JSON error body.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::InvalidRequest(_) => "invalid_request_error",
            ProxyError::Unauthorized(_) => "authentication_error",
            ProxyError::Forbidden(_) | ProxyError::Oauth(OauthError::Flow { .. }) => {
                "permission_error"
            }
            ProxyError::RateLimited { .. } => "rate_limit_error",
            ProxyError::QuotaExhausted { .. } => "quota_exhausted_error",
            ProxyError::UpstreamTransient(_)
            | ProxyError::Reqwest(_)
            | ProxyError::Oauth(_) => "upstream_error",
            ProxyError::ProtocolMismatch(_) => "protocol_error",
            ProxyError::Database(_) | ProxyError::Actor(_) | ProxyError::Internal(_) => {
                "api_error"
            }
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ProxyError::Forbidden(_) | ProxyError::Oauth(OauthError::Flow { .. }) => {
                StatusCode::FORBIDDEN
            }
            ProxyError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ProxyError::QuotaExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::UpstreamTransient(_)
            | ProxyError::Reqwest(_)
            | ProxyError::Oauth(_) => StatusCode::BAD_GATEWAY,
            ProxyError::ProtocolMismatch(_)
            | ProxyError::Database(_)
            | ProxyError::Actor(_)
            | ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn retry_after_secs(&self) -> Option<u64> {
        match self {
            ProxyError::RateLimited { retry_after_ms, .. }
            | ProxyError::QuotaExhausted { retry_after_ms } => {
                Some(retry_after_ms.div_ceil(1000).max(1))
            }
            _ => None,
        }
    }

    /// Public message. Internal variants are not echoed verbatim.
    fn public_message(&self) -> String {
        match self {
            ProxyError::InvalidRequest(m)
            | ProxyError::Unauthorized(m)
            | ProxyError::Forbidden(m) => m.clone(),
            ProxyError::RateLimited { message, .. } => message
                .clone()
                .unwrap_or_else(|| "Upstream rate limit exceeded.".to_string()),
            ProxyError::QuotaExhausted { .. } => {
                "No available account to process the request.".to_string()
            }
            ProxyError::UpstreamTransient(_) | ProxyError::Reqwest(_) => {
                "Upstream service error.".to_string()
            }
            ProxyError::ProtocolMismatch(_) => "Upstream returned a malformed response.".to_string(),
            ProxyError::Oauth(e) => e.to_string(),
            ProxyError::Database(_) | ProxyError::Actor(_) | ProxyError::Internal(_) => {
                "An internal server error occurred.".to_string()
            }
        }
    }

    /// Error body for a mid-stream SSE frame.
    pub fn to_stream_frame(&self) -> ApiErrorBody {
        ApiErrorBody {
            inner: ApiErrorObject {
                message: self.public_message(),
                kind: self.kind().to_string(),
            },
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> axum::response::Response {
        if matches!(
            self,
            ProxyError::Database(_) | ProxyError::Actor(_) | ProxyError::Internal(_)
        ) {
            tracing::error!(error = %self, "Internal proxy error");
        }

        let status = self.status();
        let retry_after = self.retry_after_secs();
        let body = Json(self.to_stream_frame());

        let mut resp = (status, body).into_response();
        if let Some(secs) = retry_after
            && let Ok(value) = HeaderValue::from_str(&secs.to_string())
        {
            resp.headers_mut().insert(RETRY_AFTER, value);
        }
        resp
    }
}

impl IsRetryable for ProxyError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProxyError::RateLimited { .. }
                | ProxyError::UpstreamTransient(_)
                | ProxyError::Reqwest(_)
        )
    }
}

/// Standardized `{"error": {...}}` payload.
#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    #[serde(rename = "error")]
    pub inner: ApiErrorObject,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorObject {
    pub message: String,

    #[serde(rename = "type")]
    pub kind: String,
}
