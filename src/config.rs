use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::chunk::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub consumer: ConsumerConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub reaper: ReaperConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub region: String,
    /// Custom endpoint for S3-compatible services (MinIO, LocalStack).
    /// Switches to path-style addressing.
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default = "default_storage_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: String::new(),
            endpoint_url: None,
            timeout_secs: default_storage_timeout_secs(),
        }
    }
}

fn default_storage_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BrokerConfig {
    #[serde(default)]
    pub brokers: String,
    #[serde(default = "default_group_id")]
    pub group_id: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_dlq_topic")]
    pub dlq_topic: String,
    /// Upper bound on processing time for one message before the broker
    /// considers the consumer dead and rebalances.
    #[serde(default = "default_max_poll_interval_ms")]
    pub max_poll_interval_ms: u64,
    #[serde(default = "default_publish_timeout_secs")]
    pub publish_timeout_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            brokers: String::new(),
            group_id: default_group_id(),
            client_id: default_client_id(),
            topic: default_topic(),
            dlq_topic: default_dlq_topic(),
            max_poll_interval_ms: default_max_poll_interval_ms(),
            publish_timeout_secs: default_publish_timeout_secs(),
        }
    }
}

fn default_group_id() -> String {
    "document-ingestion-group".to_string()
}
fn default_client_id() -> String {
    "ingestion-service".to_string()
}
fn default_topic() -> String {
    "document.uploaded".to_string()
}
fn default_dlq_topic() -> String {
    "document.uploaded.dlq".to_string()
}
fn default_max_poll_interval_ms() -> u64 {
    900_000
}
fn default_publish_timeout_secs() -> u64 {
    5
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ConsumerConfig {
    /// Number of consumer tasks in the group; partitions are spread across
    /// them. Fewer workers than partitions means some partitions share a
    /// task and wait on each other.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

fn default_workers() -> usize {
    1
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Embedding calls in flight per document. 1 keeps them sequential.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            model: None,
            timeout_secs: default_timeout_secs(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_concurrency() -> usize {
    1
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            size: default_chunk_size(),
            overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_chunk_overlap() -> usize {
    DEFAULT_CHUNK_OVERLAP
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_jitter_ms")]
    pub max_jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_jitter_ms: default_max_jitter_ms(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_jitter_ms() -> u64 {
    500
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ReaperConfig {
    #[serde(default = "default_reaper_enabled")]
    pub enabled: bool,
    /// A `processing` claim older than this is considered abandoned.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            enabled: default_reaper_enabled(),
            lease_secs: default_lease_secs(),
            interval_secs: default_interval_secs(),
        }
    }
}

fn default_reaper_enabled() -> bool {
    true
}
fn default_lease_secs() -> u64 {
    3600
}
fn default_interval_secs() -> u64 {
    300
}

/// Read the config file, apply environment overrides and validate.
///
/// A `.env` file in the working directory is loaded first, if present.
pub fn load_config(path: &Path) -> Result<Config> {
    let _ = dotenvy::dotenv();

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content, |key| std::env::var(key).ok())
}

/// Parse TOML content, overlay values from `lookup` and validate.
///
/// `lookup` is the environment in production; tests pass a closure.
pub fn parse_config(content: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<Config> {
    let mut config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    apply_env_overrides(&mut config, lookup);
    validate(&config)?;
    Ok(config)
}

fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(url) = non_empty("DATABASE_URL") {
        config.database.url = url;
    }
    if let Some(brokers) = non_empty("KAFKA_BROKERS") {
        config.broker.brokers = brokers;
    }
    if let Some(base_url) = non_empty("EMBEDDING_BASE_URL") {
        config.embedding.base_url = base_url;
    }
    if let Some(region) = non_empty("AWS_REGION") {
        config.storage.region = region;
    }
    if let Some(bucket) = non_empty("AWS_BUCKET") {
        config.storage.bucket = bucket;
    }
    if let Some(endpoint) = non_empty("AWS_ENDPOINT_URL") {
        config.storage.endpoint_url = Some(endpoint);
    }
}

fn validate(config: &Config) -> Result<()> {
    let required = [
        ("database.url", &config.database.url),
        ("storage.bucket", &config.storage.bucket),
        ("storage.region", &config.storage.region),
        ("broker.brokers", &config.broker.brokers),
        ("broker.topic", &config.broker.topic),
        ("broker.dlq_topic", &config.broker.dlq_topic),
        ("broker.group_id", &config.broker.group_id),
        ("embedding.base_url", &config.embedding.base_url),
    ];
    for (name, value) in required {
        if value.trim().is_empty() {
            bail!("{} must be set", name);
        }
    }

    // Validate chunking
    if config.chunking.size == 0 {
        bail!("chunking.size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.size {
        bail!(
            "chunking.overlap ({}) must be smaller than chunking.size ({})",
            config.chunking.overlap,
            config.chunking.size
        );
    }

    // Validate retry and concurrency
    if config.retry.max_retries == 0 {
        bail!("retry.max_retries must be >= 1");
    }
    if config.consumer.workers == 0 {
        bail!("consumer.workers must be >= 1");
    }
    if config.embedding.concurrency == 0 {
        bail!("embedding.concurrency must be >= 1");
    }
    if config.embedding.timeout_secs == 0 {
        bail!("embedding.timeout_secs must be > 0");
    }

    if config.reaper.enabled && (config.reaper.lease_secs == 0 || config.reaper.interval_secs == 0) {
        bail!("reaper.lease_secs and reaper.interval_secs must be > 0 when the reaper is enabled");
    }

    Ok(())
}

impl Config {
    /// Copy with the database password masked, for printing.
    pub fn redacted(&self) -> Config {
        let mut copy = self.clone();
        copy.database.url = redact_url_password(&self.database.url);
        copy
    }
}

fn redact_url_password(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((userinfo, host)) = rest.rsplit_once('@') else {
        return url.to_string();
    };
    match userinfo.split_once(':') {
        Some((user, _)) => format!("{}://{}:****@{}", scheme, user, host),
        None => url.to_string(),
    }
}
