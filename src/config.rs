use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Absent means no indexing service is configured and queries go to the
    /// static keyword lookup.
    #[serde(default)]
    pub broker: Option<BrokerConfig>,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BrokerConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub score: ScoreConvention,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            score: ScoreConvention::default(),
        }
    }
}

impl BrokerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_timeout_ms() -> u64 {
    30_000
}
fn default_poll_interval_ms() -> u64 {
    250
}

/// How the service's `distanceScore` maps to the `confidence` returned to
/// HTTP callers. Confidence is always in `[0, 1]`, higher is better.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScoreConvention {
    /// Lower is more similar: `confidence = 1 / (1 + max(score, 0))`.
    #[default]
    Distance,
    /// Higher is more similar: the score is clamped to `[0, 1]`.
    Similarity,
}

impl ScoreConvention {
    pub fn confidence(&self, score: f64) -> f64 {
        if !score.is_finite() {
            return 0.0;
        }
        match self {
            ScoreConvention::Distance => 1.0 / (1.0 + score.max(0.0)),
            ScoreConvention::Similarity => score.clamp(0.0, 1.0),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Filesystem,
    S3,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Root directory for the filesystem backend; objects live at
    /// `<root>/<bucket>/<path>`.
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint for S3-compatible services (MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default = "default_max_object_bytes")]
    pub max_object_bytes: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            root: default_storage_root(),
            region: default_region(),
            endpoint_url: None,
            max_object_bytes: default_max_object_bytes(),
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./uploads")
}
fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_max_object_bytes() -> u64 {
    25 * 1024 * 1024
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if let Some(broker) = &config.broker {
        if broker.timeout_ms == 0 {
            anyhow::bail!("broker.timeout_ms must be > 0");
        }
        if broker.poll_interval_ms == 0 {
            anyhow::bail!("broker.poll_interval_ms must be > 0");
        }
    }

    if config.storage.max_object_bytes == 0 {
        anyhow::bail!("storage.max_object_bytes must be > 0");
    }

    if config.server.bind.trim().is_empty() {
        anyhow::bail!("server.bind must not be empty");
    }

    Ok(config)
}
