//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use bazaar_shared::constants::{DEFAULT_HISTORY_LIMIT, DEFAULT_MAX_PAYLOAD, DEFAULT_PORT};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP address the marketplace listener binds to.
    /// Env: `LISTEN_ADDR`
    /// Default: `0.0.0.0:5050`
    pub listen_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `None`, meaning the platform data directory.
    pub database_path: Option<PathBuf>,

    /// Idle time after which a silent connection is dropped.
    /// Env: `READ_TIMEOUT_SECS` (0 disables the timeout)
    /// Default: `900`
    pub read_timeout: Option<Duration>,

    /// Largest accepted blob payload in bytes.
    /// Env: `MAX_PAYLOAD_BYTES`
    /// Default: 32 MiB
    pub max_payload_bytes: usize,

    /// Maximum number of concurrently served connections (0 = unlimited).
    /// Env: `MAX_CONNECTIONS`
    /// Default: `0`
    pub max_connections: usize,

    /// Messages returned by chat-history (0 = whole conversation).
    /// Env: `CHAT_HISTORY_LIMIT`
    /// Default: `50`
    pub chat_history_limit: u32,

    /// Whether signup is accepted.
    /// Env: `REGISTRATION_OPEN` (true/false)
    /// Default: `true`
    pub registration_open: bool,

    /// How often the number of online users is logged.
    /// Env: `STATUS_LOG_INTERVAL_SECS` (0 disables the log)
    /// Default: `300`
    pub status_log_interval: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: ([0, 0, 0, 0], DEFAULT_PORT).into(),
            database_path: None,
            read_timeout: Some(Duration::from_secs(900)),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD,
            max_connections: 0,
            chat_history_limit: DEFAULT_HISTORY_LIMIT,
            registration_open: true,
            status_log_interval: Some(Duration::from_secs(300)),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = parse_var::<SocketAddr>(&lookup, "LISTEN_ADDR") {
            config.listen_addr = addr;
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            if !path.trim().is_empty() {
                config.database_path = Some(PathBuf::from(path));
            }
        }

        if let Some(secs) = parse_var::<u64>(&lookup, "READ_TIMEOUT_SECS") {
            config.read_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }

        if let Some(max) = parse_var::<usize>(&lookup, "MAX_PAYLOAD_BYTES") {
            if max > 0 {
                config.max_payload_bytes = max;
            } else {
                tracing::warn!("MAX_PAYLOAD_BYTES must be positive, using default");
            }
        }

        if let Some(n) = parse_var::<usize>(&lookup, "MAX_CONNECTIONS") {
            config.max_connections = n;
        }

        if let Some(n) = parse_var::<u32>(&lookup, "CHAT_HISTORY_LIMIT") {
            config.chat_history_limit = n;
        }

        if let Some(val) = lookup("REGISTRATION_OPEN") {
            config.registration_open = val != "false" && val != "0";
        }

        if let Some(secs) = parse_var::<u64>(&lookup, "STATUS_LOG_INTERVAL_SECS") {
            config.status_log_interval = (secs > 0).then(|| Duration::from_secs(secs));
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

/// Parse one variable, warning and returning `None` when it is malformed.
fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid configuration value, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> ServerConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_addr, ([0, 0, 0, 0], 5050).into());
        assert_eq!(config.read_timeout, Some(Duration::from_secs(900)));
        assert_eq!(config.max_payload_bytes, 32 * 1024 * 1024);
        assert_eq!(config.chat_history_limit, 50);
        assert!(config.registration_open);
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("LISTEN_ADDR", "127.0.0.1:6000"),
            ("DATABASE_PATH", "/tmp/market.db"),
            ("READ_TIMEOUT_SECS", "0"),
            ("MAX_CONNECTIONS", "64"),
            ("REGISTRATION_OPEN", "false"),
        ]);
        assert_eq!(config.listen_addr, ([127, 0, 0, 1], 6000).into());
        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/market.db")));
        assert_eq!(config.read_timeout, None);
        assert_eq!(config.max_connections, 64);
        assert!(!config.registration_open);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = config_from(&[
            ("LISTEN_ADDR", "not an address"),
            ("MAX_PAYLOAD_BYTES", "0"),
            ("CHAT_HISTORY_LIMIT", "-3"),
        ]);
        assert_eq!(config.listen_addr, ServerConfig::default().listen_addr);
        assert_eq!(config.max_payload_bytes, DEFAULT_MAX_PAYLOAD);
        assert_eq!(config.chat_history_limit, DEFAULT_HISTORY_LIMIT);
    }
}
