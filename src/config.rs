//! Typed service configuration.
//!
//! Loaded once at startup from a TOML file and threaded through constructors
//! as a plain value. Every field has a default so a missing file or section
//! still yields a runnable configuration; validation failures are fatal at
//! startup only.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub index: IndexConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetcherConfig {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: u32,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Politeness windows, expressed as queries-per-second budgets per host.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Default budget in requests per second; 1.0 yields the 1 s window.
    #[serde(rename = "default", default = "default_qps")]
    pub default_qps: f64,
    #[serde(default)]
    pub per_domain: HashMap<String, f64>,
}

impl RateLimitConfig {
    /// Minimum interval between requests to `host`.
    pub fn politeness_delay(&self, host: &str) -> Duration {
        if !self.enabled {
            return Duration::ZERO;
        }
        let qps = self
            .per_domain
            .get(host)
            .copied()
            .unwrap_or(self.default_qps);
        if qps <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(1.0 / qps)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_redis_host")]
    pub host: String,
    #[serde(default = "default_redis_port")]
    pub port: u16,
    #[serde(default = "default_pool_size")]
    pub connection_pool_size: usize,
}

impl RedisConfig {
    pub fn url(&self) -> String {
        format!("redis://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
    #[serde(default = "default_api_threads")]
    pub threads: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: u64,
    #[serde(default = "default_flush_threshold_percent")]
    pub flush_threshold_percent: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexConfig {
    #[serde(default = "default_max_docs_per_segment")]
    pub max_docs_per_segment: u32,
    #[serde(default = "default_bm25_k1")]
    pub bm25_k1: f64,
    #[serde(default = "default_bm25_b")]
    pub bm25_b: f64,
}

fn default_worker_threads() -> usize {
    8
}
fn default_queue_size() -> usize {
    10_000
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    1_000
}
fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_read_timeout_ms() -> u64 {
    10_000
}
fn default_max_redirects() -> u32 {
    5
}
fn default_user_agent() -> String {
    "dredge/1.0".to_string()
}
fn default_true() -> bool {
    true
}
fn default_qps() -> f64 {
    1.0
}
fn default_redis_host() -> String {
    "localhost".to_string()
}
fn default_redis_port() -> u16 {
    6379
}
fn default_pool_size() -> usize {
    10
}
fn default_api_host() -> String {
    "0.0.0.0".to_string()
}
fn default_api_port() -> u16 {
    8080
}
fn default_api_threads() -> usize {
    4
}
fn default_max_memory_mb() -> u64 {
    2_048
}
fn default_flush_threshold_percent() -> u8 {
    80
}
fn default_data_dir() -> String {
    "./data".to_string()
}
fn default_max_docs_per_segment() -> u32 {
    100_000
}
fn default_bm25_k1() -> f64 {
    1.5
}
fn default_bm25_b() -> f64 {
    0.75
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            queue_size: default_queue_size(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            max_redirects: default_max_redirects(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_qps: default_qps(),
            per_domain: HashMap::new(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_redis_host(),
            port: default_redis_port(),
            connection_pool_size: default_pool_size(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            threads: default_api_threads(),
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_memory_mb: default_max_memory_mb(),
            flush_threshold_percent: default_flush_threshold_percent(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            max_docs_per_segment: default_max_docs_per_segment(),
            bm25_k1: default_bm25_k1(),
            bm25_b: default_bm25_b(),
        }
    }
}

/// Load and validate a configuration file.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.scheduler.worker_threads == 0 {
        return Err(ConfigError::Invalid(
            "scheduler.worker_threads must be at least 1".into(),
        ));
    }
    if config.scheduler.queue_size == 0 {
        return Err(ConfigError::Invalid(
            "scheduler.queue_size must be at least 1".into(),
        ));
    }
    if config.fetcher.read_timeout_ms == 0 {
        return Err(ConfigError::Invalid(
            "fetcher.read_timeout_ms must be positive".into(),
        ));
    }
    if config.rate_limit.default_qps < 0.0 {
        return Err(ConfigError::Invalid(
            "rate_limit.default must not be negative".into(),
        ));
    }
    if config.index.max_docs_per_segment == 0 {
        return Err(ConfigError::Invalid(
            "index.max_docs_per_segment must be at least 1".into(),
        ));
    }
    if config.memory.max_memory_mb == 0
        || config.memory.flush_threshold_percent == 0
        || config.memory.flush_threshold_percent > 100
    {
        return Err(ConfigError::Invalid(
            "memory.max_memory_mb must be positive and flush_threshold_percent within (0, 100]"
                .into(),
        ));
    }
    if config.index.bm25_k1 < 0.0 || !(0.0..=1.0).contains(&config.index.bm25_b) {
        return Err(ConfigError::Invalid(
            "index.bm25_k1 must be non-negative and bm25_b within [0, 1]".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.scheduler.worker_threads, 8);
        assert_eq!(config.scheduler.max_retries, 3);
        assert_eq!(config.fetcher.max_redirects, 5);
        assert_eq!(config.redis.port, 6379);
        assert_eq!(config.index.bm25_k1, 1.5);
        assert_eq!(config.index.bm25_b, 0.75);
    }

    #[test]
    fn test_parse_partial_file() {
        let toml = r#"
            [scheduler]
            worker_threads = 2
            max_retries = 5

            [rate_limit]
            default = 2.0

            [rate_limit.per_domain]
            "slow.example.com" = 0.5
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.scheduler.worker_threads, 2);
        assert_eq!(config.scheduler.max_retries, 5);
        // Unspecified sections fall back to defaults
        assert_eq!(config.fetcher.read_timeout_ms, 10_000);
        assert_eq!(config.rate_limit.default_qps, 2.0);
        assert_eq!(config.rate_limit.per_domain["slow.example.com"], 0.5);
    }

    #[test]
    fn test_politeness_delay() {
        let mut config = RateLimitConfig::default();
        config.per_domain.insert("fast.test".to_string(), 10.0);

        assert_eq!(config.politeness_delay("a.test"), Duration::from_secs(1));
        assert_eq!(
            config.politeness_delay("fast.test"),
            Duration::from_millis(100)
        );

        config.enabled = false;
        assert_eq!(config.politeness_delay("a.test"), Duration::ZERO);
    }

    #[test]
    fn test_load_rejects_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[scheduler]\nworker_threads = 0").unwrap();
        let err = load_config(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_redis_url() {
        let config = RedisConfig::default();
        assert_eq!(config.url(), "redis://localhost:6379");
    }
}
