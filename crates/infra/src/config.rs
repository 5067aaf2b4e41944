//! Process configuration from environment variables.
//!
//! | variable | default |
//! |----------|---------|
//! | `DATABASE_URL` | unset: in-memory store and lock table |
//! | `BIND_ADDR` | `0.0.0.0:8080` |
//! | `LOCK_TIMEOUT_MS` | unset: wait for locks indefinitely |
//! | `OUTBOX_RELAY_INTERVAL_MS` | `1000` |
//! | `OUTBOX_RELAY_BATCH` | `100` |
//! | `DB_MAX_CONNECTIONS` | `10` |
//! | `DB_LOCK_MAX_CONNECTIONS` | `10` |
//!
//! The relay interval, relay batch and both pool sizes must be positive.
//! `DB_LOCK_MAX_CONNECTIONS` sizes the advisory-lock pool, which is separate
//! from the store pool; it also caps how many writers can wait on a lock at
//! once, the rest queue for a connection.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub database_url: Option<String>,
    pub bind_addr: String,
    pub lock_timeout: Option<Duration>,
    pub relay_interval: Duration,
    pub relay_batch: usize,
    pub db_max_connections: u32,
    pub db_lock_max_connections: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            bind_addr: "0.0.0.0:8080".to_string(),
            lock_timeout: None,
            relay_interval: Duration::from_millis(1000),
            relay_batch: 100,
            db_max_connections: 10,
            db_lock_max_connections: 10,
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Ok(Self {
            database_url: get("DATABASE_URL"),
            bind_addr: get("BIND_ADDR").unwrap_or(defaults.bind_addr),
            lock_timeout: parse::<u64>(get("LOCK_TIMEOUT_MS"), "LOCK_TIMEOUT_MS")?
                .map(Duration::from_millis),
            relay_interval: positive::<u64>(
                get("OUTBOX_RELAY_INTERVAL_MS"),
                "OUTBOX_RELAY_INTERVAL_MS",
            )?
            .map(Duration::from_millis)
            .unwrap_or(defaults.relay_interval),
            relay_batch: positive(get("OUTBOX_RELAY_BATCH"), "OUTBOX_RELAY_BATCH")?
                .unwrap_or(defaults.relay_batch),
            db_max_connections: positive(get("DB_MAX_CONNECTIONS"), "DB_MAX_CONNECTIONS")?
                .unwrap_or(defaults.db_max_connections),
            db_lock_max_connections: positive(
                get("DB_LOCK_MAX_CONNECTIONS"),
                "DB_LOCK_MAX_CONNECTIONS",
            )?
            .unwrap_or(defaults.db_lock_max_connections),
        })
    }
}

fn parse<T: FromStr>(raw: Option<String>, key: &'static str) -> Result<Option<T>, ConfigError> {
    raw.map(|value| {
        value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value })
    })
    .transpose()
}

/// Like [`parse`], but zero is rejected.
fn positive<T>(raw: Option<String>, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr + Default + PartialEq,
{
    match parse::<T>(raw.clone(), key)? {
        Some(v) if v == T::default() => Err(ConfigError::Invalid {
            key,
            value: raw.unwrap_or_default(),
        }),
        other => Ok(other),
    }
}
