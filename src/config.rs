use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: PathBuf,
    pub host: String,
    pub port: u16,
    /// Directory for daily-rotated log files, stdout when unset
    pub log_dir: Option<PathBuf>,
    pub session: SessionConfig,
    pub tls: Option<TlsConfig>,
    pub request_timeout_secs: u64,
    /// How far in the future a client-supplied completion time may be
    pub max_clock_skew_secs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub ttl_days: i64,
    pub secure_cookie: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: PathBuf::from("database/lms.db"),
            host: "127.0.0.1".to_string(),
            port: 8080,
            log_dir: None,
            session: SessionConfig::default(),
            tls: None,
            request_timeout_secs: 30,
            max_clock_skew_secs: 300,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_days: 5,
            secure_cookie: true,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config = toml::from_str(content).context("invalid config")?;
        Ok(config)
    }
}
