//! Store configuration from the environment.
//!
//! - `DATABASE_URL`: Postgres connection string; unset means the in-memory store
//! - `STOCKLEDGER_DB_MAX_CONNECTIONS`: pool size (default 5)
//! - `STOCKLEDGER_LOCK_TIMEOUT_MS`: max wait for an order row lock (default 5000)

use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub lock_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
        }
    }
}

impl StoreConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let max_connections = match get("STOCKLEDGER_DB_MAX_CONNECTIONS") {
            Some(raw) => parse_positive("STOCKLEDGER_DB_MAX_CONNECTIONS", &raw)?,
            None => DEFAULT_MAX_CONNECTIONS,
        };
        let lock_timeout_ms = match get("STOCKLEDGER_LOCK_TIMEOUT_MS") {
            Some(raw) => parse_positive("STOCKLEDGER_LOCK_TIMEOUT_MS", &raw)?,
            None => DEFAULT_LOCK_TIMEOUT_MS,
        };

        Ok(Self {
            database_url: get("DATABASE_URL"),
            max_connections,
            lock_timeout: Duration::from_millis(lock_timeout_ms),
        })
    }

    pub fn uses_postgres(&self) -> bool {
        self.database_url.is_some()
    }
}

fn parse_positive<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
{
    let invalid = |reason: String| ConfigError::Invalid {
        key,
        value: raw.to_string(),
        reason,
    };
    let value = raw.trim().parse::<T>().map_err(|e| invalid(e.to_string()))?;
    if value <= T::default() {
        return Err(invalid("must be greater than zero".to_string()));
    }
    Ok(value)
}
