use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::net::{IpAddr, Ipv4Addr};
use url::Url;

/// Basic (core) configuration managed by Figment.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BasicConfig {
    /// HTTP server listen address.
    /// TOML: `basic.listen_addr`. Default: `0.0.0.0`.
    #[serde(default = "default_listen_ip")]
    pub listen_addr: IpAddr,

    /// HTTP server listen port.
    /// TOML: `basic.listen_port`. Default: `8553`.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Database URL for SQLite.
    /// TOML: `basic.database_url`. Default: `sqlite://switchboard.db`.
    /// Env `DATABASE_URL` overrides.
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Log level for tracing subscriber initialization.
    /// TOML: `basic.loglevel`. Default: `info`.
    #[serde(default = "default_loglevel")]
    pub loglevel: String,

    /// Symmetric master key for credential-at-rest encryption (required).
    /// TOML: `basic.master_key`.
    #[serde(default)]
    #[serde(deserialize_with = "deserialize_string_lax")]
    pub master_key: String,

    /// Public base URL used when building OAuth redirect URIs.
    /// TOML: `basic.base_url`. Default: `http://localhost:8553`.
    #[serde(default = "default_base_url")]
    pub base_url: Url,
}

impl Default for BasicConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_ip(),
            listen_port: default_listen_port(),
            database_url: default_database_url(),
            loglevel: default_loglevel(),
            // No insecure default. `Config::from_toml()` enforces non-empty.
            master_key: String::new(),
            base_url: default_base_url(),
        }
    }
}

fn deserialize_string_lax<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;

    match v {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(serde::de::Error::custom(
            "expected a string or a number for basic.master_key",
        )),
    }
}

fn default_listen_ip() -> IpAddr {
    Ipv4Addr::new(0, 0, 0, 0).into()
}

fn default_listen_port() -> u16 {
    8553
}

fn default_database_url() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://switchboard.db".to_string())
}

fn default_loglevel() -> String {
    "info".to_string()
}

fn default_base_url() -> Url {
    Url::parse("http://localhost:8553").expect("default base_url must be a valid URL")
}
