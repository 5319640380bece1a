use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::db::DbAccount;
use crate::error::ProxyError;
use crate::secrets::CredentialCipher;

/// Decrypted in-memory view of one upstream credential.
///
/// Produced from a [`DbAccount`] via the credential cipher; never
/// serialized, never logged with its token fields.
#[derive(Clone)]
pub struct Account {
    pub id: i64,
    pub user_id: String,
    pub provider: String,
    pub email: Option<String>,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub project_id: Option<String>,
    pub tier: Option<String>,
    pub api_key: Option<String>,
    pub account_id: Option<String>,
    pub workspace_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}

impl Account {
    pub fn from_db(row: DbAccount, cipher: &dyn CredentialCipher) -> Result<Self, ProxyError> {
        let access_token = cipher.decrypt(&row.access_token)?;
        let refresh_token = cipher.decrypt(&row.refresh_token)?;
        let api_key = row
            .api_key
            .as_deref()
            .map(|ct| cipher.decrypt(ct))
            .transpose()?;

        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            provider: row.provider,
            email: row.email,
            access_token,
            refresh_token,
            expires_at: row.expires_at,
            project_id: row.project_id,
            tier: row.tier,
            api_key,
            account_id: row.account_id,
            workspace_id: row.workspace_id,
            created_at: row.created_at,
            used_at: row.used_at,
        })
    }

    /// A credential inside the buffer window counts as expired already.
    pub fn needs_refresh(&self, buffer: ChronoDuration, now: DateTime<Utc>) -> bool {
        now > self.expires_at - buffer
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("provider", &self.provider)
            .field("email", &self.email)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .field("project_id", &self.project_id)
            .field("tier", &self.tier)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account_expiring_at(expires_at: DateTime<Utc>) -> Account {
        Account {
            id: 1,
            user_id: "u".to_string(),
            provider: "antigravity".to_string(),
            email: None,
            access_token: "secret-access-token".to_string(),
            refresh_token: "secret-refresh-token".to_string(),
            expires_at,
            project_id: None,
            tier: None,
            api_key: None,
            account_id: None,
            workspace_id: None,
            created_at: Utc::now(),
            used_at: None,
        }
    }

    #[test]
    fn refresh_buffer_is_applied_before_expiry() {
        let now = Utc::now();
        let account = account_expiring_at(now + ChronoDuration::minutes(30));

        assert!(!account.needs_refresh(ChronoDuration::minutes(5), now));
        assert!(account.needs_refresh(ChronoDuration::minutes(60), now));
        assert!(!account.is_expired(now));
    }

    #[test]
    fn past_expiry_is_both_stale_and_expired() {
        let now = Utc::now();
        let account = account_expiring_at(now - ChronoDuration::seconds(1));

        assert!(account.needs_refresh(ChronoDuration::minutes(5), now));
        assert!(account.is_expired(now));
    }

    #[test]
    fn debug_never_prints_tokens() {
        let account = account_expiring_at(Utc::now());
        let debug = format!("{account:?}");
        assert!(!debug.contains("secret-access-token"));
        assert!(!debug.contains("secret-refresh-token"));
        assert!(debug.contains("<redacted>"));
    }
}
