use crate::db::models::{DbAccount, DbProxyApiKey};
use crate::db::schema::SQLITE_INIT;
use crate::error::ProxyError;
use chrono::{DateTime, Utc};
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use std::{str::FromStr, time::Duration};
use tracing::info;

const ACCOUNT_COLUMNS: &str = "id, user_id, provider, email, access_token, refresh_token, \
     expires_at, is_active, project_id, tier, api_key, account_id, workspace_id, \
     created_at, used_at";

/// Payload for creating (or re-authenticating) an account.
/// Token fields are ciphertext; callers encrypt before handing them over.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub user_id: String,
    pub provider: String,
    /// Provider-specific stable identity (email, JWT sub, account id) used
    /// to upsert instead of duplicating on re-auth.
    pub identity: String,
    pub email: Option<String>,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub project_id: Option<String>,
    pub tier: Option<String>,
    pub api_key: Option<String>,
    pub account_id: Option<String>,
    pub workspace_id: Option<String>,
}

/// Rotated token triple, persisted in one statement.
#[derive(Debug, Clone)]
pub struct TokenRotation {
    pub id: i64,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug)]
pub enum DbActorMessage {
    CreateAccount(NewAccount, RpcReplyPort<Result<i64, ProxyError>>),

    /// Persist a refreshed access+refresh token pair atomically.
    RotateTokens(TokenRotation, RpcReplyPort<Result<(), ProxyError>>),

    /// Replace the stored provider API key (iFlow refresh side-channel).
    UpdateApiKey(i64, String, RpcReplyPort<Result<(), ProxyError>>),

    /// Active accounts of one user for one provider, least-recently-used first.
    ListActiveAccounts(
        String,
        String,
        RpcReplyPort<Result<Vec<DbAccount>, ProxyError>>,
    ),

    /// All accounts of one user across providers (management surface).
    ListAccountsForUser(String, RpcReplyPort<Result<Vec<DbAccount>, ProxyError>>),

    GetAccount(i64, RpcReplyPort<Result<DbAccount, ProxyError>>),

    SetAccountActive(i64, bool, RpcReplyPort<Result<(), ProxyError>>),

    DeleteAccount(i64, RpcReplyPort<Result<(), ProxyError>>),

    TouchAccountUsed(i64, RpcReplyPort<Result<(), ProxyError>>),

    LookupProxyKey(
        String,
        RpcReplyPort<Result<Option<DbProxyApiKey>, ProxyError>>,
    ),

    CreateProxyKey(
        DbProxyApiKey,
        RpcReplyPort<Result<i64, ProxyError>>,
    ),
}

#[derive(Clone)]
pub struct DbActorHandle {
    actor: ActorRef<DbActorMessage>,
}

impl DbActorHandle {
    pub async fn create_account(&self, account: NewAccount) -> Result<i64, ProxyError> {
        ractor::call!(self.actor, DbActorMessage::CreateAccount, account)
            .map_err(|e| ProxyError::Actor(format!("DbActor CreateAccount RPC failed: {e}")))?
    }

    pub async fn rotate_tokens(&self, rotation: TokenRotation) -> Result<(), ProxyError> {
        ractor::call!(self.actor, DbActorMessage::RotateTokens, rotation)
            .map_err(|e| ProxyError::Actor(format!("DbActor RotateTokens RPC failed: {e}")))?
    }

    pub async fn update_api_key(&self, id: i64, api_key: String) -> Result<(), ProxyError> {
        ractor::call!(self.actor, DbActorMessage::UpdateApiKey, id, api_key)
            .map_err(|e| ProxyError::Actor(format!("DbActor UpdateApiKey RPC failed: {e}")))?
    }

    pub async fn list_active_accounts(
        &self,
        user_id: &str,
        provider: &str,
    ) -> Result<Vec<DbAccount>, ProxyError> {
        ractor::call!(
            self.actor,
            DbActorMessage::ListActiveAccounts,
            user_id.to_string(),
            provider.to_string()
        )
        .map_err(|e| ProxyError::Actor(format!("DbActor ListActiveAccounts RPC failed: {e}")))?
    }

    pub async fn list_accounts_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<DbAccount>, ProxyError> {
        ractor::call!(
            self.actor,
            DbActorMessage::ListAccountsForUser,
            user_id.to_string()
        )
        .map_err(|e| ProxyError::Actor(format!("DbActor ListAccountsForUser RPC failed: {e}")))?
    }

    pub async fn get_account(&self, id: i64) -> Result<DbAccount, ProxyError> {
        ractor::call!(self.actor, DbActorMessage::GetAccount, id)
            .map_err(|e| ProxyError::Actor(format!("DbActor GetAccount RPC failed: {e}")))?
    }

    pub async fn set_account_active(&self, id: i64, active: bool) -> Result<(), ProxyError> {
        ractor::call!(self.actor, DbActorMessage::SetAccountActive, id, active)
            .map_err(|e| ProxyError::Actor(format!("DbActor SetAccountActive RPC failed: {e}")))?
    }

    pub async fn delete_account(&self, id: i64) -> Result<(), ProxyError> {
        ractor::call!(self.actor, DbActorMessage::DeleteAccount, id)
            .map_err(|e| ProxyError::Actor(format!("DbActor DeleteAccount RPC failed: {e}")))?
    }

    pub async fn touch_account_used(&self, id: i64) -> Result<(), ProxyError> {
        ractor::call!(self.actor, DbActorMessage::TouchAccountUsed, id)
            .map_err(|e| ProxyError::Actor(format!("DbActor TouchAccountUsed RPC failed: {e}")))?
    }

    pub async fn lookup_proxy_key(
        &self,
        key_hash: &str,
    ) -> Result<Option<DbProxyApiKey>, ProxyError> {
        ractor::call!(
            self.actor,
            DbActorMessage::LookupProxyKey,
            key_hash.to_string()
        )
        .map_err(|e| ProxyError::Actor(format!("DbActor LookupProxyKey RPC failed: {e}")))?
    }

    pub async fn create_proxy_key(&self, key: DbProxyApiKey) -> Result<i64, ProxyError> {
        ractor::call!(self.actor, DbActorMessage::CreateProxyKey, key)
            .map_err(|e| ProxyError::Actor(format!("DbActor CreateProxyKey RPC failed: {e}")))?
    }
}

struct DbActorState {
    pool: SqlitePool,
}

struct DbActor;

#[ractor::async_trait]
impl Actor for DbActor {
    type Msg = DbActorMessage;
    type State = DbActorState;
    type Arguments = String;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        database_url: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let connect_opts = SqliteConnectOptions::from_str(database_url.as_str())
            .map_err(|e| ActorProcessingErr::from(format!("invalid database url: {e}")))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5))
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .connect_with(connect_opts)
            .await
            .map_err(|e| ActorProcessingErr::from(format!("db connect failed: {e}")))?;

        apply_schema(&pool)
            .await
            .map_err(|e| ActorProcessingErr::from(format!("db schema init failed: {e}")))?;

        info!("DbActor initialized");
        Ok(DbActorState { pool })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            DbActorMessage::CreateAccount(account, reply) => {
                let _ = reply.send(create_account(&state.pool, account).await);
            }
            DbActorMessage::RotateTokens(rotation, reply) => {
                let _ = reply.send(rotate_tokens(&state.pool, rotation).await);
            }
            DbActorMessage::UpdateApiKey(id, api_key, reply) => {
                let _ = reply.send(update_api_key(&state.pool, id, &api_key).await);
            }
            DbActorMessage::ListActiveAccounts(user_id, provider, reply) => {
                let _ = reply.send(list_active_accounts(&state.pool, &user_id, &provider).await);
            }
            DbActorMessage::ListAccountsForUser(user_id, reply) => {
                let _ = reply.send(list_accounts_for_user(&state.pool, &user_id).await);
            }
            DbActorMessage::GetAccount(id, reply) => {
                let _ = reply.send(get_account(&state.pool, id).await);
            }
            DbActorMessage::SetAccountActive(id, active, reply) => {
                let _ = reply.send(set_account_active(&state.pool, id, active).await);
            }
            DbActorMessage::DeleteAccount(id, reply) => {
                let _ = reply.send(delete_account(&state.pool, id).await);
            }
            DbActorMessage::TouchAccountUsed(id, reply) => {
                let _ = reply.send(touch_account_used(&state.pool, id).await);
            }
            DbActorMessage::LookupProxyKey(key_hash, reply) => {
                let _ = reply.send(lookup_proxy_key(&state.pool, &key_hash).await);
            }
            DbActorMessage::CreateProxyKey(key, reply) => {
                let _ = reply.send(create_proxy_key(&state.pool, key).await);
            }
        }
        Ok(())
    }
}

async fn create_account(pool: &SqlitePool, account: NewAccount) -> Result<i64, ProxyError> {
    let now = Utc::now();
    let id: i64 = sqlx::query_scalar(
        r#"
    INSERT INTO accounts (
        user_id, provider, email, access_token, refresh_token, expires_at,
        is_active, project_id, tier, api_key, account_id, workspace_id,
        identity, created_at, used_at
    )
    VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?, ?, ?, ?, ?, ?, NULL)
    ON CONFLICT(user_id, provider, identity) DO UPDATE SET
        email = COALESCE(excluded.email, email),
        access_token = excluded.access_token,
        refresh_token = excluded.refresh_token,
        expires_at = excluded.expires_at,
        is_active = 1,
        project_id = COALESCE(excluded.project_id, project_id),
        tier = COALESCE(excluded.tier, tier),
        api_key = COALESCE(excluded.api_key, api_key),
        account_id = COALESCE(excluded.account_id, account_id),
        workspace_id = COALESCE(excluded.workspace_id, workspace_id)
    RETURNING id
    "#,
    )
    .bind(account.user_id)
    .bind(account.provider)
    .bind(account.email)
    .bind(account.access_token)
    .bind(account.refresh_token)
    .bind(account.expires_at)
    .bind(account.project_id)
    .bind(account.tier)
    .bind(account.api_key)
    .bind(account.account_id)
    .bind(account.workspace_id)
    .bind(account.identity)
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(id)
}

/// One UPDATE binding access+refresh+expiry together; partial writes cannot
/// happen.
async fn rotate_tokens(pool: &SqlitePool, rotation: TokenRotation) -> Result<(), ProxyError> {
    sqlx::query(
        r#"
    UPDATE accounts
    SET access_token = ?, refresh_token = ?, expires_at = ?
    WHERE id = ?
    "#,
    )
    .bind(rotation.access_token)
    .bind(rotation.refresh_token)
    .bind(rotation.expires_at)
    .bind(rotation.id)
    .execute(pool)
    .await?;

    Ok(())
}

async fn update_api_key(pool: &SqlitePool, id: i64, api_key: &str) -> Result<(), ProxyError> {
    sqlx::query("UPDATE accounts SET api_key = ? WHERE id = ?")
        .bind(api_key)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

async fn list_active_accounts(
    pool: &SqlitePool,
    user_id: &str,
    provider: &str,
) -> Result<Vec<DbAccount>, ProxyError> {
    let sql = format!(
        "SELECT {ACCOUNT_COLUMNS} FROM accounts \
         WHERE user_id = ? AND provider = ? AND is_active = 1 \
         ORDER BY used_at IS NOT NULL, used_at, created_at, id"
    );
    let rows = sqlx::query_as::<_, DbAccount>(&sql)
        .bind(user_id)
        .bind(provider)
        .fetch_all(pool)
        .await?;

    Ok(rows)
}

async fn list_accounts_for_user(
    pool: &SqlitePool,
    user_id: &str,
) -> Result<Vec<DbAccount>, ProxyError> {
    let sql = format!(
        "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE user_id = ? ORDER BY provider, id"
    );
    let rows = sqlx::query_as::<_, DbAccount>(&sql)
        .bind(user_id)
        .fetch_all(pool)
        .await?;

    Ok(rows)
}

async fn get_account(pool: &SqlitePool, id: i64) -> Result<DbAccount, ProxyError> {
    let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?");
    let row = sqlx::query_as::<_, DbAccount>(&sql)
        .bind(id)
        .fetch_one(pool)
        .await?;

    Ok(row)
}

async fn set_account_active(pool: &SqlitePool, id: i64, active: bool) -> Result<(), ProxyError> {
    sqlx::query("UPDATE accounts SET is_active = ? WHERE id = ?")
        .bind(i64::from(active))
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

async fn delete_account(pool: &SqlitePool, id: i64) -> Result<(), ProxyError> {
    sqlx::query("DELETE FROM accounts WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

async fn touch_account_used(pool: &SqlitePool, id: i64) -> Result<(), ProxyError> {
    sqlx::query("UPDATE accounts SET used_at = ? WHERE id = ?")
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

async fn lookup_proxy_key(
    pool: &SqlitePool,
    key_hash: &str,
) -> Result<Option<DbProxyApiKey>, ProxyError> {
    let row = sqlx::query_as::<_, DbProxyApiKey>(
        r#"
    SELECT id, user_id, key_hash, key_preview, name, expires_at, is_active, created_at
    FROM proxy_api_keys
    WHERE key_hash = ?
    "#,
    )
    .bind(key_hash)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

async fn create_proxy_key(pool: &SqlitePool, key: DbProxyApiKey) -> Result<i64, ProxyError> {
    let id: i64 = sqlx::query_scalar(
        r#"
    INSERT INTO proxy_api_keys (user_id, key_hash, key_preview, name, expires_at, is_active, created_at)
    VALUES (?, ?, ?, ?, ?, ?, ?)
    RETURNING id
    "#,
    )
    .bind(key.user_id)
    .bind(key.key_hash)
    .bind(key.key_preview)
    .bind(key.name)
    .bind(key.expires_at)
    .bind(i64::from(key.is_active))
    .bind(key.created_at)
    .fetch_one(pool)
    .await?;

    Ok(id)
}

/// Spawn the database actor and return a cloneable handle.
pub async fn spawn(database_url: &str) -> DbActorHandle {
    let (actor, _jh) = ractor::Actor::spawn(
        Some("DbActor".to_string()),
        DbActor,
        database_url.to_string(),
    )
    .await
    .expect("failed to spawn DbActor");

    DbActorHandle { actor }
}

async fn apply_schema(pool: &SqlitePool) -> Result<(), ProxyError> {
    for stmt in SQLITE_INIT.split(';') {
        let s = stmt.trim();
        if s.is_empty() {
            continue;
        }
        sqlx::query(s).execute(pool).await?;
    }
    Ok(())
}
