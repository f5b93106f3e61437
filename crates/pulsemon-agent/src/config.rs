use anyhow::{Context, Result};
use pulsemon_common::retry::RetryConfig;
use serde::Deserialize;
use std::time::Duration;

/// How the report loop delivers a flushed buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportMode {
    /// One `POST /update/{kind}/{id}/{value}` per metric.
    Path,
    /// One gzip JSON `POST /update/` per metric.
    Json,
    /// One gzip JSON array to `POST /updates/`.
    #[default]
    Batch,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// `host:port` or a full URL.
    #[serde(default = "default_server_endpoint")]
    pub server_endpoint: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
    /// Pending metrics that trigger a flush.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub report_mode: ReportMode,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Upper bound for the final flush on stop.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_server_endpoint() -> String {
    "localhost:8080".to_string()
}

fn default_poll_interval() -> u64 {
    2
}

fn default_report_interval() -> u64 {
    10
}

fn default_batch_size() -> usize {
    10
}

fn default_request_timeout() -> u64 {
    4
}

fn default_shutdown_timeout() -> u64 {
    10
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_endpoint: default_server_endpoint(),
            poll_interval_secs: default_poll_interval(),
            report_interval_secs: default_report_interval(),
            batch_size: default_batch_size(),
            report_mode: ReportMode::default(),
            request_timeout_secs: default_request_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            retry: RetryConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Reads the TOML file when given, then applies `ADDRESS`,
    /// `POLL_INTERVAL` and `REPORT_INTERVAL` from the environment.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("reading agent config {path}"))?;
                toml::from_str(&content).with_context(|| format!("parsing agent config {path}"))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(address) = lookup("ADDRESS").filter(|v| !v.trim().is_empty()) {
            self.server_endpoint = address;
        }
        if let Some(raw) = lookup("POLL_INTERVAL") {
            self.poll_interval_secs = raw
                .trim()
                .parse()
                .with_context(|| format!("POLL_INTERVAL must be whole seconds, got '{raw}'"))?;
        }
        if let Some(raw) = lookup("REPORT_INTERVAL") {
            self.report_interval_secs = raw
                .trim()
                .parse()
                .with_context(|| format!("REPORT_INTERVAL must be whole seconds, got '{raw}'"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.poll_interval_secs > 0, "poll_interval_secs must be positive");
        anyhow::ensure!(self.report_interval_secs > 0, "report_interval_secs must be positive");
        anyhow::ensure!(self.batch_size > 0, "batch_size must be positive");
        Ok(())
    }

    /// Server base URL; a bare `host:port` gets an `http://` scheme.
    pub fn base_url(&self) -> String {
        let addr = self.server_endpoint.trim().trim_end_matches('/');
        if addr.contains("://") {
            return addr.to_string();
        }
        format!("http://{addr}")
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_uses_defaults() {
        let config: AgentConfig = toml::from_str("").unwrap();
        assert_eq!(config.base_url(), "http://localhost:8080");
        assert_eq!(config.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.report_interval(), Duration::from_secs(10));
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.report_mode, ReportMode::Batch);
        assert_eq!(config.request_timeout(), Duration::from_secs(4));
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn toml_overrides_and_nested_retry_table() {
        let config: AgentConfig = toml::from_str(
            r#"
server_endpoint = "https://metrics.example.com/"
report_mode = "json"
batch_size = 25

[retry]
max_attempts = 5
backoff_secs = [2]
"#,
        )
        .unwrap();
        assert_eq!(config.base_url(), "https://metrics.example.com");
        assert_eq!(config.report_mode, ReportMode::Json);
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.retry.policy().max_attempts(), 5);
        assert_eq!(config.retry.policy().backoff_for(4), Duration::from_secs(2));
    }

    #[test]
    fn environment_wins_over_file() {
        let env: HashMap<&str, &str> = [
            ("ADDRESS", "10.0.0.5:9090"),
            ("POLL_INTERVAL", "1"),
            ("REPORT_INTERVAL", "30"),
        ]
        .into();
        let mut config = AgentConfig::default();
        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.base_url(), "http://10.0.0.5:9090");
        assert_eq!(config.poll_interval_secs, 1);
        assert_eq!(config.report_interval_secs, 30);
    }

    #[test]
    fn malformed_interval_is_rejected() {
        let mut config = AgentConfig::default();
        let err = config
            .apply_env(|key| (key == "POLL_INTERVAL").then(|| "2s".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("POLL_INTERVAL"));
    }

    #[test]
    fn zero_interval_fails_validation() {
        let config = AgentConfig {
            report_interval_secs: 0,
            ..AgentConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        std::fs::write(&path, "report_mode = \"path\"\n").unwrap();
        let config = AgentConfig::load(path.to_str()).unwrap();
        assert_eq!(config.report_mode, ReportMode::Path);
    }
}
