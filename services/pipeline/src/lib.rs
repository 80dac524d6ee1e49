//! Framevault Pipeline - Kafka frame transport for the framevault image pipeline
//!
//! This library holds everything the ingest and storage services share:
//!
//! - The fixed 40-byte frame header and its codec
//! - A producer that publishes frames as header + pixel records
//! - A consumer loop that hands records to a handler one at a time
//! - The process-wide shutdown flag
//!
//! # Example
//!
//! ```rust,no_run
//! use framevault_pipeline::{FrameConsumer, FrameProducer, KafkaConfig, Shutdown};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = KafkaConfig::default();
//!     let shutdown = Shutdown::new();
//!     shutdown.install_signal_handlers()?;
//!
//!     // Create a producer
//!     let producer = FrameProducer::new(config.clone(), "camera-1")?;
//!
//!     // Create a consumer
//!     let consumer = FrameConsumer::new(config)?;
//!     consumer.subscribe(&[consumer.config().topics.frames.as_str()])?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod consumer;
pub mod producer;
pub mod shutdown;
pub mod wire;

// Re-export main types
pub use config::{
    ConfigError, ConsumerConfig, KafkaConfig, ProducerConfig, ReliabilityConfig, TopicConfig,
};
pub use consumer::{
    async_trait, consume, ConsumeStats, ConsumerError, FrameConsumer, IncomingMessage,
    MessageHandler, MessageMetadata,
};
pub use producer::{DeliveryResult, FrameProducer, FramePublisher, ProducerError};
pub use shutdown::Shutdown;
pub use wire::{FrameHeader, FrameMessage, PixelFormat, WireError, FRAME_HEADER_LEN};

