//! Kafka producer wrapper for the framevault pipeline.
//!
//! Frames are published as single records: the encoded [`FrameHeader`] rides in
//! a binary record header and the pixels form the record payload, so a consumer
//! receives both parts together or not at all.

use crate::config::KafkaConfig;
use crate::wire::{FrameHeader, FRAME_HEADER_KEY, IMAGE_FRAME_MESSAGE_TYPE};
use async_trait::async_trait;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Record header naming the kind of payload carried by a record.
pub const MESSAGE_TYPE_KEY: &str = "message-type";

/// Errors that can occur during message production
#[derive(Error, Debug)]
pub enum ProducerError {
    #[error("Failed to create producer: {0}")]
    CreationError(String),

    #[error("Failed to send message to topic {topic}: {message}")]
    SendError { topic: String, message: String },

    #[error("Producer timeout after {0:?}")]
    Timeout(Duration),
}

/// Result of a successful message delivery
#[derive(Debug, Clone)]
pub struct DeliveryResult {
    /// Topic the message was delivered to
    pub topic: String,
    /// Partition the message was delivered to
    pub partition: i32,
    /// Offset of the message in the partition
    pub offset: i64,
}

/// Anything that can put a frame on the wire.
///
/// The ingest loop is written against this trait so it can be driven without a
/// broker.
#[async_trait]
pub trait FramePublisher: Send + Sync {
    async fn publish(
        &self,
        header: &FrameHeader,
        pixels: &[u8],
    ) -> Result<DeliveryResult, ProducerError>;
}

/// Build the record headers for one frame.
pub fn frame_headers(header: &FrameHeader) -> OwnedHeaders {
    let encoded = header.encode();
    OwnedHeaders::new()
        .insert(Header {
            key: FRAME_HEADER_KEY,
            value: Some(encoded.as_slice()),
        })
        .insert(Header {
            key: MESSAGE_TYPE_KEY,
            value: Some(IMAGE_FRAME_MESSAGE_TYPE),
        })
}

/// Kafka producer for image frames
pub struct FrameProducer {
    producer: FutureProducer,
    config: Arc<KafkaConfig>,
    stream_key: String,
    default_timeout: Duration,
}

impl FrameProducer {
    /// Create a new producer. Every record is keyed with `stream_key`, which keeps
    /// one producer's frames on a single partition and therefore in order.
    pub fn new(config: KafkaConfig, stream_key: impl Into<String>) -> Result<Self, ProducerError> {
        let stream_key = stream_key.into();
        info!(
            bootstrap_servers = %config.bootstrap_servers,
            topic = %config.topics.frames,
            stream_key = %stream_key,
            "Creating Kafka producer"
        );

        let producer: FutureProducer = config
            .build_producer_config()
            .create()
            .map_err(|e| ProducerError::CreationError(e.to_string()))?;

        let default_timeout = config.request_timeout();

        Ok(Self {
            producer,
            config: Arc::new(config),
            stream_key,
            default_timeout,
        })
    }

    /// Flush all pending messages
    pub fn flush(&self, timeout: Duration) -> Result<(), ProducerError> {
        self.producer
            .flush(Timeout::After(timeout))
            .map_err(|_| ProducerError::Timeout(timeout))
    }
}

#[async_trait]
impl FramePublisher for FrameProducer {
    #[instrument(skip(self, header, pixels), fields(frame_number = header.frame_number))]
    async fn publish(
        &self,
        header: &FrameHeader,
        pixels: &[u8],
    ) -> Result<DeliveryResult, ProducerError> {
        let topic = self.config.topics.frames.as_str();

        let record = FutureRecord::to(topic)
            .key(self.stream_key.as_str())
            .payload(pixels)
            .headers(frame_headers(header));

        debug!(topic, bytes = pixels.len(), "Sending frame");

        let (partition, offset) = self
            .producer
            .send(record, Timeout::After(self.default_timeout))
            .await
            .map_err(|(e, _)| ProducerError::SendError {
                topic: topic.to_string(),
                message: e.to_string(),
            })?;

        debug!(partition, offset, "Frame delivered");

        Ok(DeliveryResult {
            topic: topic.to_string(),
            partition,
            offset,
        })
    }
}

impl Drop for FrameProducer {
    fn drop(&mut self) {
        info!("Shutting down Kafka producer");
        if let Err(e) = self.flush(Duration::from_secs(5)) {
            warn!("Failed to flush producer on shutdown: {}", e);
        }
    }
}
