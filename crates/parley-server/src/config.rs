//! Server configuration loaded from environment variables.
//!
//! Every setting has a default so the server starts with zero configuration
//! for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use parley_gateway::GatewayConfig;

const DEV_JWT_SECRET: &str = "dev-secret-change-me";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Env: `PARLEY_HOST` / `PARLEY_PORT`. Default: `0.0.0.0:8000`
    pub addr: SocketAddr,

    /// SQLite file. Env: `PARLEY_DB_PATH`. Default: `parley.db`
    pub db_path: PathBuf,

    /// HS256 signing secret. Env: `PARLEY_JWT_SECRET`
    pub jwt_secret: String,

    /// Env: `PARLEY_TOKEN_TTL_MINUTES`. Default: 1440
    pub token_ttl: chrono::Duration,

    /// Comma-separated CORS origins. Env: `PARLEY_ALLOWED_ORIGINS`.
    /// Empty means permissive.
    pub allowed_origins: Vec<String>,

    pub gateway: GatewayConfig,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key -> value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let host = get("PARLEY_HOST", "0.0.0.0");
        let port = get("PARLEY_PORT", "8000");
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", host, port))?;

        let token_ttl_minutes: i64 = parse(&get("PARLEY_TOKEN_TTL_MINUTES", "1440"), "PARLEY_TOKEN_TTL_MINUTES")?;

        let allowed_origins = get("PARLEY_ALLOWED_ORIGINS", "")
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(String::from)
            .collect();

        let defaults = GatewayConfig::default();
        let gateway = GatewayConfig {
            delivery_timeout: millis(&lookup, "PARLEY_DELIVERY_TIMEOUT_MS", defaults.delivery_timeout)?,
            write_timeout: millis(&lookup, "PARLEY_WRITE_TIMEOUT_MS", defaults.write_timeout)?,
            heartbeat_interval: defaults.heartbeat_interval,
            outbound_queue: match lookup("PARLEY_OUTBOUND_QUEUE") {
                Some(v) => parse(&v, "PARLEY_OUTBOUND_QUEUE")?,
                None => defaults.outbound_queue,
            },
            notify_read_receipts: match lookup("PARLEY_NOTIFY_READ_RECEIPTS") {
                Some(v) => parse(&v, "PARLEY_NOTIFY_READ_RECEIPTS")?,
                None => defaults.notify_read_receipts,
            },
        };

        Ok(Self {
            addr,
            db_path: PathBuf::from(get("PARLEY_DB_PATH", "parley.db")),
            jwt_secret: get("PARLEY_JWT_SECRET", DEV_JWT_SECRET),
            token_ttl: chrono::Duration::minutes(token_ttl_minutes),
            allowed_origins,
            gateway,
        })
    }

    pub fn uses_dev_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }
}

fn parse<T>(value: &str, key: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("{} has invalid value {:?}", key, value))
}

fn millis<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(v) => Ok(Duration::from_millis(parse(&v, key)?)),
        None => Ok(default),
    }
}
