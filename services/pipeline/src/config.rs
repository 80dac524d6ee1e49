//! Kafka configuration module for the framevault transport.
//!
//! This module provides the configuration structures used by both services to
//! connect to the Kafka brokers that carry frames between processes. Every field
//! has a default so the block can be omitted from service configuration files.

use rdkafka::config::ClientConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Retry and reliability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReliabilityConfig {
    /// Number of retries for failed operations
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Retry backoff in milliseconds
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Request timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Enable idempotent producer
    #[serde(default = "default_true")]
    pub enable_idempotence: bool,
    /// Required acknowledgments: 0, 1, or -1 (all)
    #[serde(default = "default_acks")]
    pub acks: String,
}

fn default_true() -> bool {
    true
}

fn default_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    100
}

fn default_request_timeout_ms() -> u64 {
    30000
}

fn default_acks() -> String {
    "all".to_string()
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            enable_idempotence: true,
            acks: default_acks(),
        }
    }
}

/// Producer-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerConfig {
    /// Linger time in milliseconds
    #[serde(default = "default_linger_ms")]
    pub linger_ms: u64,
    /// Compression type: none, gzip, snappy, lz4, zstd
    #[serde(default = "default_compression")]
    pub compression_type: String,
    /// Largest record the producer will send, in bytes. Raw frames are big.
    #[serde(default = "default_message_max_bytes")]
    pub message_max_bytes: usize,
}

fn default_linger_ms() -> u64 {
    5
}

fn default_compression() -> String {
    "lz4".to_string()
}

fn default_message_max_bytes() -> usize {
    64 * 1024 * 1024
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            linger_ms: default_linger_ms(),
            compression_type: default_compression(),
            message_max_bytes: default_message_max_bytes(),
        }
    }
}

/// Consumer-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Consumer group ID
    #[serde(default = "default_group_id")]
    pub group_id: String,
    /// Auto offset reset: earliest, latest, none
    #[serde(default = "default_auto_offset_reset")]
    pub auto_offset_reset: String,
    /// Enable auto commit
    #[serde(default = "default_true")]
    pub enable_auto_commit: bool,
    /// Auto commit interval in milliseconds
    #[serde(default = "default_auto_commit_interval")]
    pub auto_commit_interval_ms: u64,
    /// Session timeout in milliseconds
    #[serde(default = "default_session_timeout")]
    pub session_timeout_ms: u64,
    /// Heartbeat interval in milliseconds
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,
    /// Maximum poll interval in milliseconds
    #[serde(default = "default_max_poll_interval")]
    pub max_poll_interval_ms: u64,
    /// Largest record the consumer accepts, in bytes
    #[serde(default = "default_receive_message_max_bytes")]
    pub receive_message_max_bytes: usize,
}

fn default_group_id() -> String {
    "framevault".to_string()
}

fn default_auto_offset_reset() -> String {
    "latest".to_string()
}

fn default_auto_commit_interval() -> u64 {
    5000
}

fn default_session_timeout() -> u64 {
    30000
}

fn default_heartbeat_interval() -> u64 {
    3000
}

fn default_max_poll_interval() -> u64 {
    300000
}

fn default_receive_message_max_bytes() -> usize {
    // librdkafka requires this to exceed the fetch size by at least 512 bytes
    default_message_max_bytes() + 1024 * 1024
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            group_id: default_group_id(),
            auto_offset_reset: default_auto_offset_reset(),
            enable_auto_commit: true,
            auto_commit_interval_ms: default_auto_commit_interval(),
            session_timeout_ms: default_session_timeout(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            max_poll_interval_ms: default_max_poll_interval(),
            receive_message_max_bytes: default_receive_message_max_bytes(),
        }
    }
}

/// Topic configuration for the framevault pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicConfig {
    /// Topic the ingest service publishes raw frames to
    #[serde(default = "default_frames_topic")]
    pub frames: String,
    /// Topic the storage service consumes from (processing stage output)
    #[serde(default = "default_features_topic")]
    pub features: String,
}

fn default_frames_topic() -> String {
    "framevault.frames".to_string()
}

fn default_features_topic() -> String {
    "framevault.features".to_string()
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            frames: default_frames_topic(),
            features: default_features_topic(),
        }
    }
}

/// Main Kafka configuration for the framevault pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    /// Comma-separated list of broker addresses
    #[serde(default = "default_bootstrap_servers")]
    pub bootstrap_servers: String,
    /// Client ID for this connection
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Reliability settings
    #[serde(default)]
    pub reliability: ReliabilityConfig,
    /// Producer settings
    #[serde(default)]
    pub producer: ProducerConfig,
    /// Consumer settings
    #[serde(default)]
    pub consumer: ConsumerConfig,
    /// Topic configuration
    #[serde(default)]
    pub topics: TopicConfig,
    /// Additional Kafka properties
    #[serde(default)]
    pub extra_properties: HashMap<String, String>,
}

fn default_bootstrap_servers() -> String {
    "localhost:9092".to_string()
}

fn default_client_id() -> String {
    "framevault".to_string()
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: default_bootstrap_servers(),
            client_id: default_client_id(),
            reliability: ReliabilityConfig::default(),
            producer: ProducerConfig::default(),
            consumer: ConsumerConfig::default(),
            topics: TopicConfig::default(),
            extra_properties: HashMap::new(),
        }
    }
}

impl KafkaConfig {
    /// Create a new KafkaConfig with the specified bootstrap servers
    pub fn new(bootstrap_servers: impl Into<String>) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.into(),
            ..Default::default()
        }
    }

    /// Connection settings, then `settings`, then `extra_properties`. Extra
    /// properties are applied last and override anything typed above.
    fn client_config<const N: usize>(&self, settings: [(&str, String); N]) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.bootstrap_servers)
            .set("client.id", &self.client_id);

        for (key, value) in settings {
            config.set(key, value);
        }
        for (key, value) in &self.extra_properties {
            config.set(key, value);
        }

        config
    }

    /// rdkafka settings for the frame producer
    pub fn build_producer_config(&self) -> ClientConfig {
        let reliability = &self.reliability;
        let producer = &self.producer;

        self.client_config([
            ("acks", reliability.acks.clone()),
            ("retries", reliability.retries.to_string()),
            ("retry.backoff.ms", reliability.retry_backoff_ms.to_string()),
            ("request.timeout.ms", reliability.request_timeout_ms.to_string()),
            ("enable.idempotence", reliability.enable_idempotence.to_string()),
            ("linger.ms", producer.linger_ms.to_string()),
            ("compression.type", producer.compression_type.clone()),
            // Raw frames are large; the broker-side limit must match
            ("message.max.bytes", producer.message_max_bytes.to_string()),
        ])
    }

    /// rdkafka settings for the payload consumer
    pub fn build_consumer_config(&self) -> ClientConfig {
        let consumer = &self.consumer;

        self.client_config([
            ("group.id", consumer.group_id.clone()),
            ("auto.offset.reset", consumer.auto_offset_reset.clone()),
            ("enable.auto.commit", consumer.enable_auto_commit.to_string()),
            ("auto.commit.interval.ms", consumer.auto_commit_interval_ms.to_string()),
            ("session.timeout.ms", consumer.session_timeout_ms.to_string()),
            ("heartbeat.interval.ms", consumer.heartbeat_interval_ms.to_string()),
            ("max.poll.interval.ms", consumer.max_poll_interval_ms.to_string()),
            ("receive.message.max.bytes", consumer.receive_message_max_bytes.to_string()),
        ])
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.reliability.request_timeout_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bootstrap_servers.is_empty() {
            return Err(ConfigError::MissingRequired(
                "bootstrap_servers".to_string(),
            ));
        }

        if self.consumer.group_id.is_empty() {
            return Err(ConfigError::MissingRequired(
                "consumer.group_id".to_string(),
            ));
        }

        if self.topics.frames.is_empty() || self.topics.features.is_empty() {
            return Err(ConfigError::MissingRequired("topics".to_string()));
        }

        if self.producer.message_max_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                key: "producer.message_max_bytes".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}
