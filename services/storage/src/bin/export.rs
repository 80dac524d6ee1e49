//! Export a size-bounded slice of the stored rows as CSV.
//!
//! Usage: `framevault-export <megabyte_limit> [config_path]`

use anyhow::{Context, Result};
use framevault_storage::export::{self, ExportPlan};
use framevault_storage::{PgStore, StorageConfig};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_CONFIG_PATH: &str = "config/storage.yml";

#[tokio::main]
async fn main() -> Result<()> {
    let (megabytes, config_path) = parse_args(std::env::args().skip(1))?;

    let config = StorageConfig::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().compact())
        .init();

    let plan = ExportPlan::from_config(&config)?;
    let mut store = PgStore::connect(&config.database)
        .await
        .context("Failed to connect to PostgreSQL")?;

    let summary = export::export(store.connection(), &plan, megabytes, Path::new(".")).await?;
    store.close().await?;

    info!(
        file = %summary.path.display(),
        avg_row_bytes = %format!("{:.2}", summary.avg_row_bytes),
        row_limit = summary.row_limit,
        exported_mb = %format!("{:.2}", summary.bytes_written as f64 / (1024.0 * 1024.0)),
        "Export finished"
    );

    Ok(())
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<(u64, PathBuf)> {
    let usage = "Usage: framevault-export <megabyte_limit> [config_path]";

    let megabytes = args
        .next()
        .context(usage)?
        .parse::<u64>()
        .context("megabyte_limit must be a non-negative integer")?;

    let config_path = match (args.next(), args.next()) {
        (None, _) => PathBuf::from(DEFAULT_CONFIG_PATH),
        (Some(path), None) => PathBuf::from(path),
        _ => anyhow::bail!(usage),
    };

    Ok((megabytes, config_path))
}
