//! SQL DDL for initializing the database schema.
//! SQLite-first design; can be adapted for other RDBMS.

/// SQLite schema:
/// - `accounts`: one upstream credential per row, keyed (user_id, provider,
///   plus a provider-specific identity column) to make OAuth re-auth an
///   upsert rather than a duplicate.
/// - `proxy_api_keys`: inbound bearer keys, stored as SHA-256 hashes.
pub const SQLITE_INIT: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id INTEGER PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    provider TEXT NOT NULL,
    email TEXT NULL,
    access_token TEXT NOT NULL,  -- ciphertext
    refresh_token TEXT NOT NULL, -- ciphertext
    expires_at TEXT NOT NULL,    -- RFC3339
    is_active INTEGER NOT NULL DEFAULT 1,
    project_id TEXT NULL,
    tier TEXT NULL,
    api_key TEXT NULL,           -- ciphertext
    account_id TEXT NULL,
    workspace_id TEXT NULL,
    identity TEXT NOT NULL,      -- provider-specific stable identity (email/sub/account id)
    created_at TEXT NOT NULL,    -- RFC3339
    used_at TEXT NULL,           -- RFC3339
    UNIQUE(user_id, provider, identity)
);

CREATE INDEX IF NOT EXISTS idx_accounts_user_provider ON accounts(user_id, provider, is_active);

CREATE TABLE IF NOT EXISTS proxy_api_keys (
    id INTEGER PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    key_preview TEXT NOT NULL,
    name TEXT NULL,
    expires_at TEXT NULL,        -- RFC3339
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,    -- RFC3339
    UNIQUE(key_hash)
);

CREATE INDEX IF NOT EXISTS idx_proxy_api_keys_active ON proxy_api_keys(is_active);
"#;
