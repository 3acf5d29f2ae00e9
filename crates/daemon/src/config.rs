//! Daemon settings
//!
//! Layered: built-in defaults, then an optional TOML file (`SHOPGUARD_CONFIG`,
//! default `shopguard.toml`), then `SHOPGUARD_*` environment variables.

use anyhow::{Context, Result};
use serde::Deserialize;
use shopguard_core::application::constants::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_OUTBOX_CAPACITY, DEFAULT_RETRY_BASE_DELAY_MS,
};
use shopguard_core::application::DeliveryConfig;
use shopguard_core::port::MaintenanceConfig;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "shopguard.toml";
const DEFAULT_DB_PATH: &str = "~/.shopguard/shopguard.db";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub db_path: String,
    pub rpc_host: String,
    pub rpc_port: u16,

    /// Shop backend receiving queued operations
    pub backend_url: String,
    /// Reachability probe target (defaults to `backend_url`)
    pub connectivity_url: Option<String>,
    pub connectivity_poll_secs: u64,
    pub request_timeout_secs: u64,

    pub flush_interval_secs: u64,
    pub max_attempts: u32,
    pub retry_base_delay_ms: i64,

    pub maintenance_interval_hours: u64,
    pub completed_retention_hours: i64,
    pub max_completed_operations: i64,
    pub max_db_size_mb: f64,

    pub webhook_url: Option<String>,
    pub outbox_capacity: usize,

    /// "pretty" or "json"
    pub log_format: String,
    /// Daily-rolling log files instead of stdout
    pub log_dir: Option<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        let maintenance = MaintenanceConfig::default();
        Self {
            db_path: DEFAULT_DB_PATH.to_string(),
            rpc_host: "127.0.0.1".to_string(),
            rpc_port: shopguard_api_rpc::server::DEFAULT_RPC_PORT,
            backend_url: "http://127.0.0.1:8080/api".to_string(),
            connectivity_url: None,
            connectivity_poll_secs: 15,
            request_timeout_secs: 30,
            flush_interval_secs: DeliveryConfig::default().flush_interval.as_secs(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            maintenance_interval_hours: 24,
            completed_retention_hours: maintenance.completed_retention_hours,
            max_completed_operations: maintenance.max_completed_operations,
            max_db_size_mb: maintenance.max_db_size_mb,
            webhook_url: None,
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            log_format: "pretty".to_string(),
            log_dir: None,
        }
    }
}

impl DaemonConfig {
    pub fn load() -> Result<Self> {
        let file = std::env::var("SHOPGUARD_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.into());
        Self::load_from(&file)
    }

    pub fn load_from(file: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(file).required(false))
            .add_source(config::Environment::with_prefix("SHOPGUARD"))
            .build()
            .with_context(|| format!("Failed to read configuration ({})", file))?;

        let config: DaemonConfig = settings
            .try_deserialize()
            .context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.max_attempts >= 1, "max_attempts must be at least 1");
        anyhow::ensure!(self.retry_base_delay_ms > 0, "retry_base_delay_ms must be positive");
        anyhow::ensure!(self.flush_interval_secs > 0, "flush_interval_secs must be positive");
        anyhow::ensure!(
            self.connectivity_poll_secs > 0,
            "connectivity_poll_secs must be positive"
        );
        anyhow::ensure!(self.outbox_capacity > 0, "outbox_capacity must be positive");
        Ok(())
    }

    /// `db_path` with `~` expanded
    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.db_path).into_owned())
    }

    pub fn connectivity_url(&self) -> &str {
        self.connectivity_url.as_deref().unwrap_or(&self.backend_url)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn delivery(&self) -> DeliveryConfig {
        DeliveryConfig {
            max_attempts: self.max_attempts,
            retry_base_delay_ms: self.retry_base_delay_ms,
            flush_interval: Duration::from_secs(self.flush_interval_secs),
        }
    }

    pub fn maintenance(&self) -> MaintenanceConfig {
        MaintenanceConfig {
            completed_retention_hours: self.completed_retention_hours,
            max_completed_operations: self.max_completed_operations,
            max_db_size_mb: self.max_db_size_mb,
        }
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_hours.max(1) * 3600)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_file() {
        let config = DaemonConfig::load_from("does-not-exist.toml").unwrap();
        assert_eq!(config.rpc_port, 9531);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.connectivity_url(), config.backend_url);
        assert!(!config.db_path().to_string_lossy().starts_with('~'));
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shopguard.toml");
        std::fs::write(
            &path,
            "backend_url = \"https://shop.example/api\"\nmax_attempts = 5\nwebhook_url = \"https://hooks.example/x\"\n",
        )
        .unwrap();

        let config = DaemonConfig::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(config.backend_url, "https://shop.example/api");
        assert_eq!(config.delivery().max_attempts, 5);
        assert_eq!(config.webhook_url.as_deref(), Some("https://hooks.example/x"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shopguard.toml");
        std::fs::write(&path, "max_attempts = 0\n").unwrap();

        assert!(DaemonConfig::load_from(path.to_str().unwrap()).is_err());
    }
}
