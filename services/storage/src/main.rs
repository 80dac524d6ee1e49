use anyhow::{Context, Result};
use framevault_pipeline::{FrameConsumer, Shutdown};
use framevault_storage::config::ServiceConfig;
use framevault_storage::{PersistenceEngine, PersistenceHandler, StorageConfig};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_CONFIG_PATH: &str = "config/storage.yml";

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = parse_args(std::env::args().skip(1))?;

    // Load configuration
    let config = StorageConfig::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;

    // Initialize logging
    init_tracing(&config.service);

    info!(
        service = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "Starting framevault storage service"
    );

    // Initialize metrics
    if let Some(port) = config.service.metrics_port {
        init_metrics(port)?;
    }

    config
        .transport
        .validate()
        .context("Invalid transport configuration")?;

    let engine = PersistenceEngine::open(&config)
        .await
        .context("Failed to open persistence engine")?;

    let shutdown = Shutdown::new();
    shutdown.install_signal_handlers()?;

    let consumer =
        FrameConsumer::new(config.transport.clone()).context("Failed to create Kafka consumer")?;
    consumer.subscribe(&[config.transport.topics.features.as_str()])?;

    info!("Storage service started successfully");

    let mut handler = PersistenceHandler::new(engine);
    let result = consumer.run(&mut handler, &shutdown).await;

    let (written, rejected) = handler.engine().counts();
    info!(
        written,
        rejected,
        malformed = handler.malformed(),
        "Final persistence stats"
    );
    handler.engine().log_status();

    match result {
        Ok(stats) => {
            info!(
                received = stats.received,
                handled = stats.handled,
                failed = stats.failed,
                "Storage service stopped"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Consumer stopped on transport error");
            Err(e.into())
        }
    }
}

/// Optional single argument: the configuration file path
fn parse_args(mut args: impl Iterator<Item = String>) -> Result<PathBuf> {
    match (args.next(), args.next()) {
        (None, _) => Ok(PathBuf::from(DEFAULT_CONFIG_PATH)),
        (Some(path), None) => Ok(PathBuf::from(path)),
        _ => anyhow::bail!("Usage: framevault-storage [config_path]"),
    }
}

/// Initialize tracing/logging
fn init_tracing(service: &ServiceConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&service.log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    if service.log_format == "pretty" {
        registry.with(fmt::layer().pretty()).init();
    } else {
        registry.with(fmt::layer().json()).init();
    }
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}
