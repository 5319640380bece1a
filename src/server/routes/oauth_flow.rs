use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, PrivateCookieJar, SameSite};
use oauth2::{CsrfToken, PkceCodeChallenge};
use serde::Deserialize;
use serde_json::json;
use time::Duration as CookieDuration;
use tracing::{error, info};

use crate::db::NewAccount;
use crate::error::{OauthError, ProxyError};
use crate::providers::{OAuthResult, Provider};
use crate::secrets::CredentialCipher as _;
use crate::server::guards::auth::AuthedUser;
use crate::server::router::AppState;

const STATE_COOKIE: &str = "oauth_csrf_token";
const PKCE_COOKIE: &str = "oauth_pkce_verifier";
const USER_COOKIE: &str = "oauth_user_id";
const PROVIDER_COOKIE: &str = "oauth_provider";

#[derive(Debug, Deserialize)]
pub struct AuthCallbackQuery {
    pub code: String,
    pub state: String,
}

fn build_cookie(name: &'static str, value: String) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(CookieDuration::minutes(15))
        .build()
}

/// GET /oauth/{provider}/start
///
/// Starts a PKCE auth-code flow and redirects the browser to the identity
/// provider. State and verifier travel in the private cookie jar.
pub async fn oauth_start(
    State(state): State<AppState>,
    user: AuthedUser,
    Path(provider_name): Path<String>,
    jar: PrivateCookieJar,
) -> Result<Response, ProxyError> {
    let provider = state
        .dispatcher
        .registry()
        .get(&provider_name)
        .ok_or_else(|| {
            ProxyError::InvalidRequest(format!("unknown provider '{provider_name}'"))
        })?;

    let (_, verifier) = PkceCodeChallenge::new_random_sha256();
    let csrf = CsrfToken::new_random();

    let auth_url = provider.auth_url(csrf.secret(), Some(verifier.secret()))?;

    let jar = jar
        .add(build_cookie(STATE_COOKIE, csrf.secret().clone()))
        .add(build_cookie(PKCE_COOKIE, verifier.secret().clone()))
        .add(build_cookie(USER_COOKIE, user.user_id))
        .add(build_cookie(
            PROVIDER_COOKIE,
            provider.config().name.to_string(),
        ));

    info!(provider = provider.config().name, "OAuth redirect dispatched");
    Ok((jar, Redirect::temporary(auth_url.as_ref())).into_response())
}

/// GET /oauth/{provider}/callback
pub async fn oauth_callback(
    State(state): State<AppState>,
    Path(provider_name): Path<String>,
    Query(query): Query<AuthCallbackQuery>,
    jar: PrivateCookieJar,
) -> Response {
    finish_callback(state, Some(provider_name), query, jar).await
}

/// GET /oauth2callback
///
/// Fixed-path callback shared by the loopback-registered providers
/// (Antigravity, iFlow); the provider is recovered from the cookie jar.
pub async fn oauth_callback_fixed(
    State(state): State<AppState>,
    Query(query): Query<AuthCallbackQuery>,
    jar: PrivateCookieJar,
) -> Response {
    finish_callback(state, None, query, jar).await
}

async fn finish_callback(
    state: AppState,
    provider_name: Option<String>,
    query: AuthCallbackQuery,
    jar: PrivateCookieJar,
) -> Response {
    let (jar, session) = take_session(jar);

    let result = async {
        let session = session.ok_or_else(|| {
            ProxyError::Oauth(OauthError::Flow {
                code: "OAUTH_SESSION_MISSING".to_string(),
                message: "Missing OAuth session cookies".to_string(),
                details: None,
            })
        })?;

        if query.state != session.csrf {
            return Err(ProxyError::Oauth(OauthError::Flow {
                code: "CSRF_MISMATCH".to_string(),
                message: "CSRF token mismatch".to_string(),
                details: None,
            }));
        }

        let name = provider_name.unwrap_or_else(|| session.provider.clone());
        let provider = state.dispatcher.registry().get(&name).ok_or_else(|| {
            ProxyError::InvalidRequest(format!("unknown provider '{name}'"))
        })?;

        let oauth = provider
            .exchange_code(&query.code, "", Some(&session.verifier))
            .await?;

        let id = persist_account(&state, &session.user_id, provider.as_ref(), &oauth).await?;
        Ok::<_, ProxyError>((provider.config().name, id))
    }
    .await;

    match result {
        Ok((provider, id)) => {
            info!(provider, account_id = id, "OAuth account stored");
            (jar, (StatusCode::OK, "Account connected. You can close this tab."))
                .into_response()
        }
        Err(err) => {
            error!(error = %err, "OAuth callback failed");
            (jar, err.into_response()).into_response()
        }
    }
}

struct OauthSession {
    csrf: String,
    verifier: String,
    user_id: String,
    provider: String,
}

fn take_session(jar: PrivateCookieJar) -> (PrivateCookieJar, Option<OauthSession>) {
    let csrf = jar.get(STATE_COOKIE).map(|c| c.value().to_string());
    let verifier = jar.get(PKCE_COOKIE).map(|c| c.value().to_string());
    let user_id = jar.get(USER_COOKIE).map(|c| c.value().to_string());
    let provider = jar.get(PROVIDER_COOKIE).map(|c| c.value().to_string());

    let jar = jar
        .remove(Cookie::from(STATE_COOKIE))
        .remove(Cookie::from(PKCE_COOKIE))
        .remove(Cookie::from(USER_COOKIE))
        .remove(Cookie::from(PROVIDER_COOKIE));

    match (csrf, verifier, user_id, provider) {
        (Some(csrf), Some(verifier), Some(user_id), Some(provider)) => (
            jar,
            Some(OauthSession {
                csrf,
                verifier,
                user_id,
                provider,
            }),
        ),
        _ => (jar, None),
    }
}

/// POST /oauth/{provider}/device/start
///
/// Returns the user code immediately; the poll-exchange-persist sequence
/// continues in a background task.
pub async fn device_start(
    State(state): State<AppState>,
    user: AuthedUser,
    Path(provider_name): Path<String>,
) -> Result<Json<serde_json::Value>, ProxyError> {
    let provider = state
        .dispatcher
        .registry()
        .get(&provider_name)
        .ok_or_else(|| {
            ProxyError::InvalidRequest(format!("unknown provider '{provider_name}'"))
        })?;

    let authorization = provider.start_device_auth().await?;
    let response = json!({
        "user_code": authorization.user_code,
        "verification_uri": authorization.verification_uri,
        "interval": authorization.interval,
        "expires_in": authorization.expires_in,
    });

    let task_state = state.clone();
    let user_id = user.user_id;
    tokio::spawn(async move {
        match provider.complete_device_auth(&authorization).await {
            Ok(oauth) => {
                match persist_account(&task_state, &user_id, provider.as_ref(), &oauth).await {
                    Ok(id) => info!(
                        provider = provider.config().name,
                        account_id = id,
                        "Device-code account stored"
                    ),
                    Err(err) => error!(error = %err, "Failed to persist device-code account"),
                }
            }
            Err(err) => error!(
                provider = provider.config().name,
                error = %err,
                "Device authorization did not complete"
            ),
        }
    });

    Ok(Json(response))
}

/// Encrypt and upsert an account produced by any OAuth flow.
pub(crate) async fn persist_account(
    state: &AppState,
    user_id: &str,
    provider: &dyn Provider,
    oauth: &OAuthResult,
) -> Result<i64, ProxyError> {
    let cipher = &state.cipher;

    // Stable identity for upsert: prefer the human identity, then the
    // provider-scoped ids, then a digest of the refresh token.
    let identity = oauth
        .email
        .clone()
        .or_else(|| oauth.account_id.clone())
        .or_else(|| oauth.project_id.clone())
        .unwrap_or_else(|| {
            crate::server::guards::auth::hash_key(&oauth.refresh_token)
                .chars()
                .take(16)
                .collect()
        });

    state
        .db
        .create_account(NewAccount {
            user_id: user_id.to_string(),
            provider: provider.config().name.to_string(),
            identity,
            email: oauth.email.clone(),
            access_token: cipher.encrypt(&oauth.access_token),
            refresh_token: cipher.encrypt(&oauth.refresh_token),
            expires_at: oauth.expires_at,
            project_id: oauth.project_id.clone(),
            tier: oauth.tier.clone(),
            api_key: oauth.api_key.as_deref().map(|k| cipher.encrypt(k)),
            account_id: oauth.account_id.clone(),
            workspace_id: oauth.workspace_id.clone(),
        })
        .await
}
