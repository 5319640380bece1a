use chrono::Utc;
use tracing::{info, warn};

use super::{Account, Provider};
use crate::db::TokenRotation;
use crate::error::ProxyError;
use crate::secrets::CredentialCipher as _;

/// Shared refresh path behind `Provider::valid_credentials`.
///
/// Contract (uniform across providers):
/// - inside the refresh buffer, refresh before the upstream call;
/// - a successful refresh persists the rotated access+refresh pair in one
///   statement before the credential is returned;
/// - a failed refresh with a not-yet-expired token falls back to the
///   existing token;
/// - a failed refresh past expiry surfaces as Unauthorized.
pub(crate) async fn ensure_fresh<P: Provider + ?Sized>(
    provider: &P,
    account: &mut Account,
) -> Result<String, ProxyError> {
    let now = Utc::now();

    if !account.needs_refresh(provider.refresh_buffer(), now) {
        return Ok(provider.credential_of(account));
    }

    match provider.refresh_token(&account.refresh_token).await {
        Ok(result) => {
            let ctx = provider.context();

            ctx.db
                .rotate_tokens(TokenRotation {
                    id: account.id,
                    access_token: ctx.cipher.encrypt(&result.access_token),
                    refresh_token: ctx.cipher.encrypt(&result.refresh_token),
                    expires_at: result.expires_at,
                })
                .await?;

            // iFlow hands out a fresh chat key on refresh; keep it if the
            // side-channel produced one, otherwise the stored key stays.
            if let Some(api_key) = &result.api_key {
                ctx.db
                    .update_api_key(account.id, ctx.cipher.encrypt(api_key))
                    .await?;
                account.api_key = Some(api_key.clone());
            }

            info!(
                account_id = account.id,
                provider = provider.config().name,
                expires_at = %result.expires_at,
                "Credential refreshed"
            );

            account.access_token = result.access_token;
            account.refresh_token = result.refresh_token;
            account.expires_at = result.expires_at;

            Ok(provider.credential_of(account))
        }

        Err(err) if !account.is_expired(now) => {
            warn!(
                account_id = account.id,
                provider = provider.config().name,
                error = %err,
                "Refresh failed; falling back to the still-valid token"
            );
            Ok(provider.credential_of(account))
        }

        Err(err) => {
            warn!(
                account_id = account.id,
                provider = provider.config().name,
                error = %err,
                "Refresh failed past expiry; account needs re-authentication"
            );
            Err(ProxyError::Unauthorized(format!(
                "credential refresh failed for account {}",
                account.id
            )))
        }
    }
}
