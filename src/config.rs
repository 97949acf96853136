//! Softphone configuration
//!
//! Tunables for reconnection, debouncing, transfer timeouts and local
//! persistence, loaded from environment variables.

use std::path::PathBuf;
use serde::{Deserialize, Serialize};

/// Softphone engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoftphoneConfig {
    /// Backend base URL (e.g., "http://localhost:3000")
    pub backend_url: String,

    /// This agent's extension (e.g., "1001")
    pub extension: String,

    /// Display name presented to remote parties
    pub display_name: String,

    /// First reconnect delay in milliseconds
    pub reconnect_base_delay_ms: u64,

    /// Reconnect delay cap in milliseconds
    pub reconnect_max_delay_ms: u64,

    /// Give up after this many reconnect attempts (manual restart required)
    pub reconnect_max_attempts: u32,

    /// Collapse registration-state bursts inside this window
    pub registration_debounce_ms: u64,

    /// Transport liveness probe interval in seconds
    pub health_check_interval_secs: u64,

    /// How long to wait for a transfer confirmation before assuming success
    pub transfer_confirm_timeout_ms: u64,

    /// Roster pull-fallback interval in seconds
    pub roster_poll_interval_secs: u64,

    /// Most-recent-N bound on the transfer history side-table
    pub transfer_history_limit: usize,

    /// Most-recent-N bound on the local call log
    pub call_log_limit: usize,

    /// Seconds a user-facing notification stays visible
    pub notification_ttl_secs: u64,

    /// Directory for persisted JSON side-tables (favorites, history, log)
    pub data_dir: PathBuf,
}

impl Default for SoftphoneConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:3000".to_string(),
            extension: String::new(),
            display_name: String::new(),
            reconnect_base_delay_ms: 1000,
            reconnect_max_delay_ms: 10_000,
            reconnect_max_attempts: 8,
            registration_debounce_ms: 300,
            health_check_interval_secs: 5,
            transfer_confirm_timeout_ms: 5000,
            roster_poll_interval_secs: 30,
            transfer_history_limit: 100,
            call_log_limit: 500,
            notification_ttl_secs: 5,
            data_dir: PathBuf::from("./softphone-data"),
        }
    }
}

impl SoftphoneConfig {
    /// Create config from environment variables
    pub fn from_env() -> Option<Self> {
        let extension = std::env::var("SOFTPHONE_EXTENSION").ok()?;
        let backend_url = std::env::var("BACKEND_URL")
            .unwrap_or_else(|_| "http://localhost:3000".to_string());

        let defaults = Self::default();

        Some(Self {
            backend_url,
            display_name: std::env::var("SOFTPHONE_DISPLAY_NAME")
                .unwrap_or_else(|_| extension.clone()),
            extension,
            reconnect_base_delay_ms: env_u64(
                "SOFTPHONE_RECONNECT_BASE_MS",
                defaults.reconnect_base_delay_ms,
            ),
            reconnect_max_delay_ms: env_u64(
                "SOFTPHONE_RECONNECT_MAX_MS",
                defaults.reconnect_max_delay_ms,
            ),
            reconnect_max_attempts: env_u64(
                "SOFTPHONE_RECONNECT_MAX_ATTEMPTS",
                defaults.reconnect_max_attempts as u64,
            ) as u32,
            registration_debounce_ms: env_u64(
                "SOFTPHONE_REGISTRATION_DEBOUNCE_MS",
                defaults.registration_debounce_ms,
            ),
            health_check_interval_secs: env_u64(
                "SOFTPHONE_HEALTH_INTERVAL_SECS",
                defaults.health_check_interval_secs,
            ),
            transfer_confirm_timeout_ms: env_u64(
                "SOFTPHONE_TRANSFER_TIMEOUT_MS",
                defaults.transfer_confirm_timeout_ms,
            ),
            roster_poll_interval_secs: env_u64(
                "SOFTPHONE_ROSTER_POLL_SECS",
                defaults.roster_poll_interval_secs,
            ),
            transfer_history_limit: env_u64(
                "SOFTPHONE_TRANSFER_HISTORY_LIMIT",
                defaults.transfer_history_limit as u64,
            ) as usize,
            call_log_limit: env_u64("SOFTPHONE_CALL_LOG_LIMIT", defaults.call_log_limit as u64)
                as usize,
            notification_ttl_secs: env_u64(
                "SOFTPHONE_NOTIFICATION_TTL_SECS",
                defaults.notification_ttl_secs,
            ),
            data_dir: std::env::var("SOFTPHONE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.extension.is_empty() {
            return Err("agent extension is required".to_string());
        }
        if self.backend_url.is_empty() {
            return Err("backend URL is required".to_string());
        }
        if self.reconnect_base_delay_ms == 0 {
            return Err("reconnect base delay must be positive".to_string());
        }
        if self.reconnect_base_delay_ms > self.reconnect_max_delay_ms {
            return Err("reconnect delay cap is below the base delay".to_string());
        }
        if self.transfer_history_limit == 0 {
            return Err("transfer history limit must be positive".to_string());
        }
        Ok(())
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_validates_with_extension() {
        let mut config = SoftphoneConfig::default();
        assert!(config.validate().is_err());

        config.extension = "1001".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_inverted_backoff_range_rejected() {
        let config = SoftphoneConfig {
            extension: "1001".to_string(),
            reconnect_base_delay_ms: 20_000,
            reconnect_max_delay_ms: 10_000,
            ..SoftphoneConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
