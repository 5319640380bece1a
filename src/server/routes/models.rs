use axum::{Json, extract::State};
use std::collections::BTreeSet;

use crate::error::ProxyError;
use crate::server::guards::auth::AuthedUser;
use crate::server::router::AppState;
use switchboard_schema::openai::{ModelEntry, ModelList};

/// GET /v1/models
///
/// Union of supported models across the calling user's active accounts.
pub async fn list_models(
    State(state): State<AppState>,
    user: AuthedUser,
) -> Result<Json<ModelList>, ProxyError> {
    let accounts = state.db.list_accounts_for_user(&user.user_id).await?;

    let active_providers: BTreeSet<&str> = accounts
        .iter()
        .filter(|a| a.is_active)
        .map(|a| a.provider.as_str())
        .collect();

    let mut entries = Vec::new();
    let mut seen: BTreeSet<(String, String)> = BTreeSet::new();

    for provider in state.dispatcher.registry().all() {
        let config = provider.config();
        if !active_providers.contains(config.name) {
            continue;
        }
        for model in &config.supported_models {
            if seen.insert((model.clone(), config.name.to_string())) {
                entries.push(ModelEntry::new(model.clone(), config.name));
            }
        }
    }

    Ok(Json(ModelList::new(entries)))
}
