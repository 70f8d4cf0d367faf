// Daemon configuration: defaults -> TOML file -> IMGPIPE__SECTION__KEY env

use anyhow::{anyhow, Context, Result};
use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, Environment, File};
use imgpipe_core::application::worker::constants::{
    DEFAULT_CONNECT_RETRIES, DEFAULT_POOL_SIZE, DEFAULT_PREFETCH, DEFAULT_RETRY_BASE_DELAY_MS,
    DEFAULT_SHUTDOWN_TIMEOUT,
};
use imgpipe_core::application::{BackoffPolicy, ProducerMode};
use imgpipe_core::domain::{QueueSpec, Quality, WireFormat, DEFAULT_QUALITY, IMAGE_PROCESSING_QUEUE};
use imgpipe_core::port::AckMode;
use imgpipe_infra_amqp::AmqpConfig;
use imgpipe_infra_media::FetchLimits;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "imgpipe.toml";
const ENV_PREFIX: &str = "IMGPIPE";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub broker: BrokerConfig,
    pub queue: QueueConfig,
    pub producer: ProducerConfig,
    pub worker: WorkerConfig,
    pub transcoder: TranscoderConfig,
    pub sink: SinkConfig,
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub vhost: String,
    pub username: String,
    pub password: String,
    pub prefetch: u16,
    pub connect_retries: u32,
    pub retry_base_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProducerConfig {
    pub enabled: bool,
    pub mode: ProducerMode,
    pub wire_format: WireFormat,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    pub enabled: bool,
    pub pool_size: usize,
    pub ack_mode: AckMode,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscoderConfig {
    pub quality: u8,
    pub fetch_timeout_secs: u64,
    pub max_image_bytes: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    pub output_dir: PathBuf,
}

fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    config::Config::builder()
        .set_default("database.url", "sqlite://imgpipe.db")?
        .set_default("database.max_connections", 5)?
        .set_default("broker.host", "localhost")?
        .set_default("broker.port", 5672)?
        .set_default("broker.vhost", "/")?
        .set_default("broker.username", "guest")?
        .set_default("broker.password", "guest")?
        .set_default("broker.prefetch", DEFAULT_PREFETCH as u64)?
        .set_default("broker.connect_retries", DEFAULT_CONNECT_RETRIES as u64)?
        .set_default("broker.retry_base_delay_ms", DEFAULT_RETRY_BASE_DELAY_MS)?
        .set_default("queue.name", IMAGE_PROCESSING_QUEUE)?
        .set_default("producer.enabled", true)?
        .set_default("producer.mode", "pending_only")?
        .set_default("producer.wire_format", "json")?
        .set_default("worker.enabled", true)?
        .set_default("worker.pool_size", DEFAULT_POOL_SIZE as u64)?
        .set_default("worker.ack_mode", "manual")?
        .set_default("transcoder.quality", DEFAULT_QUALITY as u64)?
        .set_default("transcoder.fetch_timeout_secs", 30)?
        .set_default("transcoder.max_image_bytes", 20 * 1024 * 1024)?
        .set_default("sink.output_dir", "compressed")?
        .set_default("shutdown_timeout_secs", DEFAULT_SHUTDOWN_TIMEOUT.as_secs())
}

impl Config {
    /// Load and validate.
    ///
    /// `path` must exist when given; otherwise `imgpipe.toml` in the working
    /// directory is read if present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (file, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        let settings = defaults()?
            .add_source(File::from(file.as_path()).required(required))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to load configuration ({})", file.display()))?;

        let config: Config = settings
            .try_deserialize()
            .context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue.name.trim().is_empty() {
            return Err(anyhow!("Queue name must not be empty"));
        }
        if self.worker.pool_size == 0 {
            return Err(anyhow!("Worker pool size must be greater than 0"));
        }
        if !(1..=100).contains(&self.transcoder.quality) {
            return Err(anyhow!(
                "JPEG quality must be between 1 and 100, got {}",
                self.transcoder.quality
            ));
        }
        if self.transcoder.max_image_bytes == 0 {
            return Err(anyhow!("Maximum image size must be greater than 0"));
        }
        if self.transcoder.fetch_timeout_secs == 0 {
            return Err(anyhow!("Fetch timeout must be greater than 0"));
        }
        if self.broker.prefetch == 0 {
            return Err(anyhow!("Broker prefetch must be greater than 0"));
        }
        if self.database.max_connections == 0 {
            return Err(anyhow!("Database max connections must be greater than 0"));
        }
        if self.database.url.is_empty() {
            return Err(anyhow!("Database URL is required"));
        }
        Ok(())
    }

    pub fn amqp(&self) -> AmqpConfig {
        AmqpConfig {
            host: self.broker.host.clone(),
            port: self.broker.port,
            vhost: self.broker.vhost.clone(),
            username: self.broker.username.clone(),
            password: self.broker.password.clone(),
            prefetch: self.broker.prefetch,
        }
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.broker.retry_base_delay_ms, self.broker.connect_retries)
    }

    pub fn queue_spec(&self) -> QueueSpec {
        QueueSpec::durable(self.queue.name.clone())
    }

    pub fn quality(&self) -> Result<Quality> {
        Quality::new(self.transcoder.quality).map_err(|e| anyhow!("{}", e))
    }

    pub fn fetch_limits(&self) -> FetchLimits {
        FetchLimits {
            timeout: Duration::from_secs(self.transcoder.fetch_timeout_secs),
            max_bytes: self.transcoder.max_image_bytes,
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[cfg(test)]
impl Config {
    /// Defaults only, no file or environment
    pub(crate) fn for_tests() -> Self {
        defaults()
            .and_then(|b| b.build())
            .and_then(|c| c.try_deserialize())
            .unwrap()
    }
}
