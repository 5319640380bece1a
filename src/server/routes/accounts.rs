use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::NewAccount;
use crate::error::ProxyError;
use crate::providers::compat::OpenAiCompatProvider;
use crate::providers::normalize_provider_name;
use crate::secrets::CredentialCipher as _;
use crate::server::guards::auth::{AuthedUser, key_preview};
use crate::server::router::AppState;

/// Redacted account view for the management surface. No token material.
#[derive(Debug, Serialize)]
pub struct AccountView {
    pub id: i64,
    pub provider: String,
    pub email: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
    pub project_id: Option<String>,
    pub tier: Option<String>,
    pub created_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}

/// GET /accounts
pub async fn list_accounts(
    State(state): State<AppState>,
    user: AuthedUser,
) -> Result<Json<Vec<AccountView>>, ProxyError> {
    let rows = state.db.list_accounts_for_user(&user.user_id).await?;

    Ok(Json(
        rows.into_iter()
            .map(|row| AccountView {
                id: row.id,
                provider: row.provider,
                email: row.email,
                expires_at: row.expires_at,
                is_active: row.is_active,
                project_id: row.project_id,
                tier: row.tier,
                created_at: row.created_at,
                used_at: row.used_at,
            })
            .collect(),
    ))
}

#[derive(Debug, Deserialize)]
pub struct SubmitApiKey {
    pub provider: String,
    pub api_key: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// POST /accounts/api_key
///
/// Create an API-key account: the key doubles as the refresh token and the
/// expiry is stamped a year out.
pub async fn submit_api_key(
    State(state): State<AppState>,
    user: AuthedUser,
    Json(body): Json<SubmitApiKey>,
) -> Result<(StatusCode, Json<serde_json::Value>), ProxyError> {
    let provider = normalize_provider_name(&body.provider).to_string();
    let api_key = body.api_key.trim();
    if api_key.is_empty() {
        return Err(ProxyError::InvalidRequest("api_key is required".to_string()));
    }

    if state.dispatcher.registry().get(&provider).is_none() {
        return Err(ProxyError::InvalidRequest(format!(
            "unknown provider '{}'",
            body.provider
        )));
    }

    let result = OpenAiCompatProvider::api_key_oauth_result(api_key);
    let cipher = state.cipher.as_ref();

    let id = state
        .db
        .create_account(NewAccount {
            user_id: user.user_id,
            provider: provider.clone(),
            identity: format!("key:{}", key_preview(api_key)),
            email: body.email,
            access_token: cipher.encrypt(&result.access_token),
            refresh_token: cipher.encrypt(&result.refresh_token),
            expires_at: result.expires_at,
            project_id: None,
            tier: None,
            api_key: result.api_key.as_deref().map(|k| cipher.encrypt(k)),
            account_id: None,
            workspace_id: None,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "id": id, "provider": provider })),
    ))
}

/// POST /accounts/{id}/deactivate
pub async fn deactivate_account(
    State(state): State<AppState>,
    user: AuthedUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ProxyError> {
    let account = state.db.get_account(id).await?;
    if account.user_id != user.user_id {
        return Err(ProxyError::Forbidden("not your account".to_string()));
    }

    state.db.set_account_active(id, false).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /accounts/{id}
pub async fn delete_account(
    State(state): State<AppState>,
    user: AuthedUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ProxyError> {
    let account = state.db.get_account(id).await?;
    if account.user_id != user.user_id {
        return Err(ProxyError::Forbidden("not your account".to_string()));
    }

    state.db.delete_account(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
