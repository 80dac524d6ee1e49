//! Directory Ingest Service for the framevault pipeline
//!
//! This service reads every image in a source directory, decodes it to raw
//! pixels and publishes one frame per image to the frames topic. Once all files
//! have been published it lists the directory again and starts over, until a
//! termination signal arrives.
//!
//! # Architecture
//!
//! ```text
//! Directory -> DecoderRegistry -> StreamProducer -> FrameProducer -> Kafka
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded from:
//! 1. An optional configuration file (config/ingest.{toml,yml,json})
//! 2. Environment variables (prefixed with INGEST__)
//!
//! See `config.rs` for detailed configuration options.

mod config;
mod image_source;
mod stream_producer;

use config::IngestConfig;
use framevault_pipeline::{FrameProducer, Shutdown};
use image_source::DecoderRegistry;
use stream_producer::{ProducerExit, ProducerStats, StreamProducer};

use anyhow::Context;
use std::path::PathBuf;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let source = parse_args(std::env::args().skip(1))?;

    // Load configuration
    let config = IngestConfig::load().context("Failed to load configuration")?;

    // Initialize logging
    init_logging(&config.logging)?;

    info!(
        service = "framevault-ingest",
        version = env!("CARGO_PKG_VERSION"),
        source = %source.display(),
        "Starting ingest service"
    );

    // Validate configuration
    config.validate()?;

    let shutdown = Shutdown::new();
    shutdown.install_signal_handlers()?;

    let publisher = FrameProducer::new(config.transport.clone(), &config.source.stream_key)?;
    let mut producer = StreamProducer::new(
        publisher,
        DecoderRegistry::default(),
        config.source.idle_rescan(),
    );

    let result = producer.run(&source, &shutdown).await;
    log_final_stats(producer.stats());

    match result {
        Ok(ProducerExit::Stopped) => {
            info!("Ingest service stopped");
        }
        Ok(ProducerExit::EmptySource) => {
            info!("Source directory is empty, nothing to publish");
        }
        Err(e) => {
            error!(error = %e, "Ingest service failed");
            return Err(e.into());
        }
    }

    Ok(())
}

/// Expect exactly one argument: the source directory.
fn parse_args(mut args: impl Iterator<Item = String>) -> anyhow::Result<PathBuf> {
    match (args.next(), args.next()) {
        (Some(source), None) => Ok(PathBuf::from(source)),
        _ => anyhow::bail!("Usage: framevault-ingest <source_dir>"),
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(config: &config::LoggingConfig) -> anyhow::Result<()> {
    let level = match config.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("framevault_ingest={}", level).parse()?)
        .add_directive(format!("framevault_pipeline={}", level).parse()?)
        .add_directive("rdkafka=warn".parse()?);

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer().pretty()).init();
    }

    Ok(())
}

/// Log final statistics on shutdown.
fn log_final_stats(stats: &ProducerStats) {
    info!(
        passes = stats.passes,
        frames_published = stats.frames_published,
        bytes_published = stats.bytes_published,
        files_skipped = stats.files_skipped,
        decode_failures = stats.decode_failures,
        publish_failures = stats.publish_failures,
        rescan_failures = stats.rescan_failures,
        "Final producer stats"
    );
}
