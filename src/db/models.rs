use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One upstream credential row. Token columns hold ciphertext; plaintext
/// only exists in memory after the credential cipher decrypts it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct DbAccount {
    pub id: i64,
    pub user_id: String,
    pub provider: String,
    pub email: Option<String>,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,

    /// Google Code Assist project (Antigravity / Gemini CLI).
    pub project_id: Option<String>,

    /// Code Assist subscription tier (free-tier, legacy-tier, standard-tier, paid).
    pub tier: Option<String>,

    /// iFlow chat key, encrypted; distinct from the OAuth access token.
    pub api_key: Option<String>,

    /// Codex ChatGPT account id (from JWT claims).
    pub account_id: Option<String>,

    /// Codex workspace id (from JWT claims).
    pub workspace_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}

/// A bearer token callers use to authenticate to the proxy itself.
/// Only the SHA-256 hash of the key is stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct DbProxyApiKey {
    pub id: i64,
    pub user_id: String,
    pub key_hash: String,
    pub key_preview: String,
    pub name: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl DbProxyApiKey {
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.is_none_or(|exp| exp > now)
    }
}
