//! Environment configuration for the server binary and sync sessions.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, anyhow};

use crate::auth::StaticTokenAuthenticator;
use crate::autosave::AutosaveConfig;

pub const DATABASE_URL: &str = "DATABASE_URL";
pub const BIND_ADDRESS: &str = "MINDMAP_BIND";
pub const DB_MAX_CONNECTIONS: &str = "MINDMAP_DB_MAX_CONNECTIONS";
pub const API_TOKENS: &str = "MINDMAP_API_TOKENS";
pub const AUTOSAVE_DELAY_MS: &str = "MINDMAP_AUTOSAVE_DELAY_MS";

const DEFAULT_BIND: &str = "127.0.0.1:3001";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// Postgres connection string; without one the server keeps mind maps in memory.
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub authenticator: StaticTokenAuthenticator,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind", &self.bind)
            .field("database", &self.database_url.as_ref().map(|_| "<redacted>"))
            .field("max_connections", &self.max_connections)
            .field("tokens", &self.authenticator.len())
            .finish()
    }
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let bind = lookup(BIND_ADDRESS)
            .unwrap_or_else(|| DEFAULT_BIND.to_string())
            .parse::<SocketAddr>()
            .with_context(|| format!("{BIND_ADDRESS} must be a socket address"))?;

        let database_url = lookup(DATABASE_URL).filter(|url| !url.trim().is_empty());

        let max_connections = match lookup(DB_MAX_CONNECTIONS) {
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .with_context(|| format!("{DB_MAX_CONNECTIONS} must be a positive integer"))?,
            None => DEFAULT_MAX_CONNECTIONS,
        };
        if max_connections == 0 {
            return Err(anyhow!("{DB_MAX_CONNECTIONS} must be at least 1"));
        }

        let authenticator = match lookup(API_TOKENS) {
            Some(raw) => StaticTokenAuthenticator::parse(&raw)
                .with_context(|| format!("failed to parse {API_TOKENS}"))?,
            None => StaticTokenAuthenticator::new(),
        };

        Ok(Self {
            bind,
            database_url,
            max_connections,
            authenticator,
        })
    }
}

impl AutosaveConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        match lookup(AUTOSAVE_DELAY_MS) {
            Some(raw) => {
                let millis = raw
                    .trim()
                    .parse::<u64>()
                    .with_context(|| format!("{AUTOSAVE_DELAY_MS} must be milliseconds"))?;
                Ok(Self::with_delay(Duration::from_millis(millis)))
            }
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = ServerConfig::from_lookup(lookup(&[])).expect("defaults should load");
        assert_eq!(config.bind, "127.0.0.1:3001".parse::<SocketAddr>().expect("valid address"));
        assert_eq!(config.database_url, None);
        assert_eq!(config.max_connections, 5);
        assert!(config.authenticator.is_empty());

        let autosave = AutosaveConfig::from_lookup(lookup(&[])).expect("defaults should load");
        assert_eq!(autosave.delay, Duration::from_millis(2000));
    }

    #[test]
    fn values_are_read_from_the_environment() {
        let config = ServerConfig::from_lookup(lookup(&[
            (BIND_ADDRESS, "0.0.0.0:8080"),
            (DATABASE_URL, "postgres://localhost/mindmaps"),
            (DB_MAX_CONNECTIONS, "12"),
            (API_TOKENS, "alpha=6f1b8a8e-4d0c-4a53-9d0e-8f7c2b1a0e11"),
        ]))
        .expect("config should load");
        assert_eq!(config.bind.port(), 8080);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/mindmaps")
        );
        assert_eq!(config.max_connections, 12);
        assert_eq!(config.authenticator.len(), 1);
        assert!(!format!("{config:?}").contains("postgres://"));

        let autosave = AutosaveConfig::from_lookup(lookup(&[(AUTOSAVE_DELAY_MS, "750")]))
            .expect("delay should parse");
        assert_eq!(autosave.delay, Duration::from_millis(750));
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert!(ServerConfig::from_lookup(lookup(&[(BIND_ADDRESS, "nowhere")])).is_err());
        assert!(ServerConfig::from_lookup(lookup(&[(DB_MAX_CONNECTIONS, "0")])).is_err());
        assert!(ServerConfig::from_lookup(lookup(&[(API_TOKENS, "missing-user")])).is_err());
        assert!(AutosaveConfig::from_lookup(lookup(&[(AUTOSAVE_DELAY_MS, "soon")])).is_err());
    }
}
