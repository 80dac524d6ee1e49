//! Kafka consumer wrapper for the framevault pipeline.
//!
//! The receive loop lives in [`consume`], which works on any stream of
//! [`IncomingMessage`] results. [`FrameConsumer::run`] feeds it from a Kafka
//! subscription; tests feed it from an in-memory stream.

use crate::config::KafkaConfig;
use crate::producer::MESSAGE_TYPE_KEY;
use crate::shutdown::Shutdown;
use crate::wire::{FrameMessage, WireError, FRAME_HEADER_KEY};
use futures::{Stream, StreamExt};
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{Headers, Message as KafkaMessage};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

/// Errors that can occur during message consumption
#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("Failed to create consumer: {0}")]
    CreationError(String),

    #[error("Failed to subscribe to topics: {0}")]
    SubscriptionError(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed frame: {0}")]
    Malformed(#[from] WireError),

    #[error("Message processing error: {0}")]
    Handler(String),
}

/// Metadata about a received message
#[derive(Debug, Clone, Default)]
pub struct MessageMetadata {
    /// Topic the message was received from
    pub topic: String,
    /// Partition the message was received from
    pub partition: i32,
    /// Offset of the message in the partition
    pub offset: i64,
    /// Message key (if present)
    pub key: Option<Vec<u8>>,
    /// Timestamp of the message
    pub timestamp: Option<i64>,
    /// Message headers, values kept as raw bytes
    pub headers: HashMap<String, Vec<u8>>,
}

/// A received message with payload and metadata
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    /// Raw message payload
    pub payload: Vec<u8>,
    /// Message metadata
    pub metadata: MessageMetadata,
}

impl IncomingMessage {
    /// Get a raw header value
    pub fn header(&self, key: &str) -> Option<&[u8]> {
        self.metadata.headers.get(key).map(|v| v.as_slice())
    }

    /// Get the message type header
    pub fn message_type(&self) -> Option<&str> {
        self.header(MESSAGE_TYPE_KEY)
            .and_then(|v| std::str::from_utf8(v).ok())
    }

    /// Decode the message as an image frame.
    ///
    /// Returns `None` for records that carry no frame header (opaque payloads).
    pub fn frame(&self) -> Option<Result<FrameMessage<'_>, WireError>> {
        self.header(FRAME_HEADER_KEY)
            .map(|header| FrameMessage::from_parts(header, &self.payload))
    }
}

/// Handler trait for processing messages
#[async_trait::async_trait]
pub trait MessageHandler: Send {
    /// Process a single message
    async fn handle(&mut self, message: IncomingMessage) -> Result<(), ConsumerError>;

    /// Called when message processing fails
    async fn on_error(&mut self, metadata: &MessageMetadata, error: ConsumerError) {
        warn!(
            topic = %metadata.topic,
            partition = metadata.partition,
            offset = metadata.offset,
            error = %error,
            "Message processing failed"
        );
    }
}

/// Counters for one consume run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumeStats {
    pub received: u64,
    pub handled: u64,
    pub failed: u64,
}

/// Drive `handler` with messages from `stream`, one at a time, until shutdown is
/// requested or the stream ends.
///
/// A transport error ends the loop with [`ConsumerError::Transport`]. Handler
/// errors are passed to [`MessageHandler::on_error`] and the loop continues.
pub async fn consume<S, H>(
    stream: S,
    handler: &mut H,
    shutdown: &Shutdown,
) -> Result<ConsumeStats, ConsumerError>
where
    S: Stream<Item = Result<IncomingMessage, ConsumerError>>,
    H: MessageHandler + ?Sized,
{
    tokio::pin!(stream);
    let mut stats = ConsumeStats::default();

    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.wait() => {
                debug!("Shutdown requested, leaving consume loop");
                break;
            }
            next = stream.next() => next,
        };

        match next {
            Some(Ok(message)) => {
                stats.received += 1;
                debug!(
                    topic = %message.metadata.topic,
                    partition = message.metadata.partition,
                    offset = message.metadata.offset,
                    bytes = message.payload.len(),
                    "Received message"
                );

                let metadata = message.metadata.clone();
                match handler.handle(message).await {
                    Ok(()) => stats.handled += 1,
                    Err(e) => {
                        stats.failed += 1;
                        handler.on_error(&metadata, e).await;
                    }
                }
            }
            Some(Err(e)) => {
                error!(error = %e, "Transport error, stopping consumer");
                return Err(e);
            }
            None => {
                debug!("Stream ended");
                break;
            }
        }
    }

    Ok(stats)
}

/// Kafka consumer for the framevault topics
pub struct FrameConsumer {
    consumer: StreamConsumer,
    config: Arc<KafkaConfig>,
}

impl FrameConsumer {
    /// Create a new consumer with the given configuration
    pub fn new(config: KafkaConfig) -> Result<Self, ConsumerError> {
        info!(
            bootstrap_servers = %config.bootstrap_servers,
            group_id = %config.consumer.group_id,
            "Creating Kafka consumer"
        );

        let consumer: StreamConsumer = config
            .build_consumer_config()
            .create()
            .map_err(|e| ConsumerError::CreationError(e.to_string()))?;

        Ok(Self {
            consumer,
            config: Arc::new(config),
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &KafkaConfig {
        &self.config
    }

    /// Subscribe to the specified topics
    pub fn subscribe(&self, topics: &[&str]) -> Result<(), ConsumerError> {
        info!("Subscribing to topics: {:?}", topics);
        self.consumer
            .subscribe(topics)
            .map_err(|e| ConsumerError::SubscriptionError(e.to_string()))
    }

    /// Consume from the subscription until shutdown or a transport error
    #[instrument(skip_all)]
    pub async fn run<H>(
        &self,
        handler: &mut H,
        shutdown: &Shutdown,
    ) -> Result<ConsumeStats, ConsumerError>
    where
        H: MessageHandler + ?Sized,
    {
        info!("Starting message consumption loop");

        let stream = self.consumer.stream().map(|result| {
            result
                .map(|message| convert_message(&message))
                .map_err(|e| ConsumerError::Transport(e.to_string()))
        });

        consume(stream, handler, shutdown).await
    }
}

/// Convert a borrowed Kafka message to our IncomingMessage type
fn convert_message<M: KafkaMessage>(msg: &M) -> IncomingMessage {
    let payload = msg.payload().unwrap_or(&[]).to_vec();
    let key = msg.key().map(|k| k.to_vec());

    let mut headers = HashMap::new();
    if let Some(h) = msg.headers() {
        for header in h.iter() {
            if let Some(value) = header.value {
                headers.insert(header.key.to_string(), value.to_vec());
            }
        }
    }

    IncomingMessage {
        payload,
        metadata: MessageMetadata {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key,
            timestamp: msg.timestamp().to_millis(),
            headers,
        },
    }
}

/// Async trait for message handlers (re-export for convenience)
pub use async_trait::async_trait;
