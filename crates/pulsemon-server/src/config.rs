use anyhow::{Context, Result};
use pulsemon_common::retry::RetryConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Listen address, `host:port`.
    #[serde(default = "default_address")]
    pub address: String,
    /// Seconds between snapshot flushes; 0 saves after every update.
    #[serde(default = "default_store_interval")]
    pub store_interval_secs: u64,
    /// Snapshot file; empty disables the file backend.
    #[serde(default = "default_file_storage_path")]
    pub file_storage_path: Option<String>,
    /// Load the snapshot file at startup.
    #[serde(default = "default_restore")]
    pub restore: bool,
    /// Relational DSN; takes priority over the snapshot file when set.
    #[serde(default)]
    pub database_dsn: Option<String>,
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_address() -> String {
    "localhost:8080".to_string()
}

fn default_store_interval() -> u64 {
    300
}

fn default_file_storage_path() -> Option<String> {
    Some("tmp/my-metrics.json".to_string())
}

fn default_restore() -> bool {
    true
}

fn default_ping_timeout() -> u64 {
    5
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            store_interval_secs: default_store_interval(),
            file_storage_path: default_file_storage_path(),
            restore: default_restore(),
            database_dsn: None,
            ping_timeout_secs: default_ping_timeout(),
            retry: RetryConfig::default(),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl ServerConfig {
    /// Reads the TOML file when given, then applies `ADDRESS`,
    /// `STORE_INTERVAL`, `FILE_STORAGE_PATH`, `RESTORE` and `DATABASE_DSN`.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("reading server config {path}"))?;
                toml::from_str(&content).with_context(|| format!("parsing server config {path}"))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(address) = non_empty(lookup("ADDRESS")) {
            self.address = address;
        }
        if let Some(raw) = lookup("STORE_INTERVAL") {
            self.store_interval_secs = raw
                .trim()
                .parse()
                .with_context(|| format!("STORE_INTERVAL must be whole seconds, got '{raw}'"))?;
        }
        if let Some(path) = lookup("FILE_STORAGE_PATH") {
            self.file_storage_path = Some(path);
        }
        if let Some(raw) = lookup("RESTORE") {
            self.restore = raw
                .trim()
                .parse()
                .with_context(|| format!("RESTORE must be true or false, got '{raw}'"))?;
        }
        if let Some(dsn) = lookup("DATABASE_DSN") {
            self.database_dsn = Some(dsn);
        }
        Ok(())
    }

    pub fn database_dsn(&self) -> Option<&str> {
        self.database_dsn.as_deref().filter(|v| !v.trim().is_empty())
    }

    pub fn file_storage_path(&self) -> Option<PathBuf> {
        self.file_storage_path
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
    }

    pub fn store_interval(&self) -> Duration {
        Duration::from_secs(self.store_interval_secs)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs)
    }
}
