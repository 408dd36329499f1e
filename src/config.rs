//! Runtime configuration, read from the environment at startup.
//!
//! Every field has a default so the server runs with nothing but a
//! `DATABASE_URL` (and even that falls back to an on-disk sqlite file).

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind.
    pub bind_address: String,

    /// sqlx connection string for the message log.
    pub database_url: String,

    /// `tracing` filter, e.g. `info` or `debug,sqlx=warn`.
    pub log_filter: String,

    /// How long a relay handshake may wait on the membership oracle
    /// before the socket is closed instead of left half-open.
    pub auth_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            bind_address: env_or("PATTER_BIND", "0.0.0.0:8080"),
            database_url: env_or("DATABASE_URL", "sqlite://patter.db"),
            log_filter: env_or("PATTER_LOG", "info"),
            auth_timeout: Duration::from_millis(parse_env("PATTER_AUTH_TIMEOUT_MS", 3_000)),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
