use axum::{Json, extract::State, response::Response};

use crate::error::ProxyError;
use crate::server::guards::auth::AuthedUser;
use crate::server::respond::provider_response;
use crate::server::router::AppState;
use switchboard_schema::openai::ChatCompletionRequest;

/// POST /v1/chat/completions
pub async fn chat_completions(
    State(state): State<AppState>,
    user: AuthedUser,
    Json(request): Json<ChatCompletionRequest>,
) -> Result<Response, ProxyError> {
    if request.model.trim().is_empty() {
        return Err(ProxyError::InvalidRequest("model is required".to_string()));
    }
    if request.messages.is_empty() {
        return Err(ProxyError::InvalidRequest(
            "messages must not be empty".to_string(),
        ));
    }

    let response = state.dispatcher.dispatch(&user.user_id, &request).await?;
    Ok(provider_response(response))
}
