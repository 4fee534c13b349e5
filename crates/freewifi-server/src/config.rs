//! Server configuration loaded from environment variables.
//!
//! Every setting has a default so the server starts with zero configuration
//! for local development.

use std::net::SocketAddr;
use std::time::Duration;

use freewifi_shared::constants::{
    DEFAULT_APP_ID, DEFAULT_FEED_CAPACITY, DEFAULT_HTTP_PORT, DEFAULT_INSTANT_API_URI,
    DEFAULT_POLL_INTERVAL_MS,
};
use freewifi_store::{AdminToken, InstantConfig, ReadErrorPolicy, StoreConfig};
use uuid::Uuid;

/// Where network records are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// The hosted InstantDB app named by `APP_ID`.
    #[default]
    Instant,
    /// In-process store. Everything is lost on restart.
    Memory,
}

impl BackendKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "instant" | "remote" => Some(Self::Instant),
            "memory" => Some(Self::Memory),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP API.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Store backend.
    /// Env: `STORE_BACKEND` (`instant` | `memory`)
    /// Default: `instant`
    pub backend: BackendKind,

    /// Application id the network records belong to.
    /// Env: `APP_ID`
    pub app_id: Uuid,

    /// Base URL of the hosted store's HTTP API.
    /// Env: `INSTANT_API_URI`
    pub instant_api_uri: String,

    /// Admin token for the hosted app, if its permissions need one.
    /// Env: `INSTANT_ADMIN_TOKEN`
    pub instant_admin_token: Option<AdminToken>,

    /// How often live queries re-read the hosted store.
    /// Env: `POLL_INTERVAL_MS`
    /// Default: `2000`
    pub poll_interval: Duration,

    /// What live subscriptions do on a read error.
    /// Env: `READ_ERROR_POLICY` (`empty` | `surface`)
    /// Default: `empty`
    pub read_error_policy: ReadErrorPolicy,

    /// Snapshots buffered per subscription.
    /// Env: `FEED_CAPACITY`
    /// Default: `16`
    pub feed_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            backend: BackendKind::default(),
            app_id: Uuid::parse_str(DEFAULT_APP_ID).unwrap_or_else(|_| Uuid::nil()),
            instant_api_uri: DEFAULT_INSTANT_API_URI.to_string(),
            instant_admin_token: None,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            read_error_policy: ReadErrorPolicy::default(),
            feed_capacity: DEFAULT_FEED_CAPACITY,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default"),
            }
        }

        if let Some(backend) = lookup("STORE_BACKEND") {
            match BackendKind::parse(&backend) {
                Some(parsed) => config.backend = parsed,
                None => tracing::warn!(
                    value = %backend,
                    "Invalid STORE_BACKEND (expected 'instant' or 'memory'), using default"
                ),
            }
        }

        if let Some(id) = lookup("APP_ID") {
            match Uuid::parse_str(id.trim()) {
                Ok(parsed) => config.app_id = parsed,
                Err(e) => tracing::warn!(value = %id, error = %e, "Invalid APP_ID, using default"),
            }
        }

        if let Some(uri) = lookup("INSTANT_API_URI") {
            let uri = uri.trim();
            if uri.starts_with("http://") || uri.starts_with("https://") {
                config.instant_api_uri = uri.to_string();
            } else {
                tracing::warn!(value = %uri, "Invalid INSTANT_API_URI, using default");
            }
        }

        config.instant_admin_token = lookup("INSTANT_ADMIN_TOKEN")
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
            .map(AdminToken::new);

        if let Some(val) = lookup("POLL_INTERVAL_MS") {
            match val.parse::<u64>() {
                Ok(ms) if ms > 0 => config.poll_interval = Duration::from_millis(ms),
                _ => tracing::warn!(value = %val, "Invalid POLL_INTERVAL_MS, using default"),
            }
        }

        if let Some(policy) = lookup("READ_ERROR_POLICY") {
            match ReadErrorPolicy::parse(&policy) {
                Some(parsed) => config.read_error_policy = parsed,
                None => tracing::warn!(
                    value = %policy,
                    "Invalid READ_ERROR_POLICY (expected 'empty' or 'surface'), using default"
                ),
            }
        }

        if let Some(val) = lookup("FEED_CAPACITY") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.feed_capacity = n,
                _ => tracing::warn!(value = %val, "Invalid FEED_CAPACITY, using default"),
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }

    pub fn instant_config(&self) -> InstantConfig {
        InstantConfig {
            api_uri: self.instant_api_uri.clone(),
            admin_token: self.instant_admin_token.clone(),
            poll_interval: self.poll_interval,
            ..InstantConfig::new(self.app_id)
        }
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            app_id: self.app_id,
            read_error_policy: self.read_error_policy,
            feed_capacity: self.feed_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> ServerConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.app_id.to_string(), DEFAULT_APP_ID);
        assert_eq!(config.read_error_policy, ReadErrorPolicy::DeliverEmpty);
        assert_eq!(config.backend, BackendKind::Instant);
        assert!(config.instant_admin_token.is_none());
    }

    #[test]
    fn test_instant_settings() {
        let config = load(&[
            ("STORE_BACKEND", "memory"),
            ("APP_ID", "00000000-0000-0000-0000-000000000001"),
            ("INSTANT_API_URI", "http://127.0.0.1:8888"),
            ("INSTANT_ADMIN_TOKEN", " tok "),
            ("POLL_INTERVAL_MS", "250"),
        ]);
        assert_eq!(config.backend, BackendKind::Memory);

        let instant = config.instant_config();
        assert_eq!(instant.app_id, config.app_id);
        assert_eq!(instant.api_uri, "http://127.0.0.1:8888");
        assert_eq!(instant.admin_token, Some(AdminToken::new("tok")));
        assert_eq!(instant.poll_interval, Duration::from_millis(250));
        assert!(!format!("{config:?}").contains("\"tok\""));
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("HTTP_ADDR", "127.0.0.1:3000"),
            ("READ_ERROR_POLICY", "surface"),
            ("FEED_CAPACITY", "4"),
        ]);
        assert_eq!(config.http_addr, ([127, 0, 0, 1], 3000).into());
        assert_eq!(config.read_error_policy, ReadErrorPolicy::Surface);

        let store = config.store_config();
        assert_eq!(store.feed_capacity, 4);
        assert_eq!(store.read_error_policy, ReadErrorPolicy::Surface);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = load(&[
            ("HTTP_ADDR", "not-an-addr"),
            ("APP_ID", "wifi"),
            ("READ_ERROR_POLICY", "crash"),
            ("FEED_CAPACITY", "0"),
            ("STORE_BACKEND", "postgres"),
            ("INSTANT_API_URI", "ftp://store"),
            ("POLL_INTERVAL_MS", "soon"),
        ]);
        let default = ServerConfig::default();
        assert_eq!(config.http_addr, default.http_addr);
        assert_eq!(config.app_id, default.app_id);
        assert_eq!(config.read_error_policy, default.read_error_policy);
        assert_eq!(config.feed_capacity, default.feed_capacity);
        assert_eq!(config.backend, default.backend);
        assert_eq!(config.instant_api_uri, default.instant_api_uri);
        assert_eq!(config.poll_interval, default.poll_interval);
    }
}
