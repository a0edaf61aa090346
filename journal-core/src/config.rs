//! Client-side sync configuration.
//!
//! A plain `serde`-serializable settings struct, not a `clap` CLI: the sync
//! core embeds in a mobile app, so configuration arrives from the app's own
//! settings store rather than process arguments. Defaults mirror the
//! teacher's pattern of sensible constants with `#[serde(default = "...")]`
//! escape hatches (see `ConfigYaml` in the original `config.rs`).

use serde::{Deserialize, Serialize};
use thiserror::Error;

const fn default_wifi_threshold() -> u64 {
    5 * 1024 * 1024
}
const fn default_true() -> bool {
    true
}
const fn default_debounce_ms() -> u64 {
    500
}
const fn default_max_queue_batch() -> usize {
    10
}
fn default_queue_retry_delays() -> Vec<u64> {
    vec![1_000, 5_000, 15_000, 60_000, 300_000]
}
fn default_asset_retry_delays() -> Vec<u64> {
    vec![1_000, 5_000, 15_000]
}
const fn default_access_token_ttl() -> i64 {
    900
}
const fn default_refresh_token_ttl_days() -> i64 {
    90
}
const fn default_pbkdf2_iterations() -> u32 {
    600_000
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("server_url must not be empty")]
    EmptyServerUrl,
    #[error("server_url is not a valid URL: {0}")]
    InvalidServerUrl(String),
    #[error("retry delay schedules must not be empty")]
    EmptyRetrySchedule,
}

/// Sync settings persisted by the host app, typically alongside its other
/// account settings (serverUrl, email, userId, enabled, thresholds).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub server_url: String,

    #[serde(default = "default_wifi_threshold")]
    pub wifi_only_threshold_bytes: u64,

    #[serde(default = "default_true")]
    pub auto_sync_enabled: bool,

    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    #[serde(default = "default_max_queue_batch")]
    pub max_queue_batch: usize,

    #[serde(default = "default_queue_retry_delays")]
    pub queue_retry_delays_ms: Vec<u64>,

    #[serde(default = "default_asset_retry_delays")]
    pub asset_retry_delays_ms: Vec<u64>,

    #[serde(default = "default_access_token_ttl")]
    pub access_token_ttl_s: i64,

    #[serde(default = "default_refresh_token_ttl_days")]
    pub refresh_token_ttl_days: i64,

    #[serde(default = "default_pbkdf2_iterations")]
    pub pbkdf2_iterations: u32,
}

impl SyncConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            wifi_only_threshold_bytes: default_wifi_threshold(),
            auto_sync_enabled: default_true(),
            debounce_ms: default_debounce_ms(),
            max_queue_batch: default_max_queue_batch(),
            queue_retry_delays_ms: default_queue_retry_delays(),
            asset_retry_delays_ms: default_asset_retry_delays(),
            access_token_ttl_s: default_access_token_ttl(),
            refresh_token_ttl_days: default_refresh_token_ttl_days(),
            pbkdf2_iterations: default_pbkdf2_iterations(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_url.trim().is_empty() {
            return Err(ConfigError::EmptyServerUrl);
        }
        url::Url::parse(&self.server_url)
            .map_err(|e| ConfigError::InvalidServerUrl(e.to_string()))?;
        if self.queue_retry_delays_ms.is_empty() || self.asset_retry_delays_ms.is_empty() {
            return Err(ConfigError::EmptyRetrySchedule);
        }
        Ok(())
    }

    /// `http(s)://...` -> `ws(s)://...`, trailing slash stripped. Used by
    /// `SyncClient` to build WebSocket URLs from the configured REST base.
    pub fn websocket_base(&self) -> String {
        let trimmed = self.server_url.trim_end_matches('/');
        if let Some(rest) = trimmed.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = trimmed.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            trimmed.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = SyncConfig::new("https://sync.example.com");
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.wifi_only_threshold_bytes, 5 * 1024 * 1024);
        assert_eq!(cfg.pbkdf2_iterations, 600_000);
    }

    #[test]
    fn rejects_empty_server_url() {
        let cfg = SyncConfig::new("");
        assert!(matches!(cfg.validate(), Err(ConfigError::EmptyServerUrl)));
    }

    #[test]
    fn websocket_scheme_transform() {
        let cfg = SyncConfig::new("https://sync.example.com/");
        assert_eq!(cfg.websocket_base(), "wss://sync.example.com");
        let cfg = SyncConfig::new("http://localhost:8080");
        assert_eq!(cfg.websocket_base(), "ws://localhost:8080");
    }
}
