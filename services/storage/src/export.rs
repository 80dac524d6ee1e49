//! Size-bounded CSV export of stored data.
//!
//! The row limit comes from an estimate of the average row size taken from the
//! planner statistics, so the exported file is roughly the requested size.

use crate::config::{StorageConfig, FEATURES_ROLE, IMAGES_ROLE, PAYLOADS_ROLE};
use futures::TryStreamExt;
use sqlx::postgres::PgConnection;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument};

/// Average row size assumed when statistics are missing
pub const FALLBACK_ROW_BYTES: f64 = 64.0;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("No enabled table to export")]
    NothingToExport,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What gets exported
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportPlan {
    /// Images joined with their feature rows
    Joined { images: String, features: String },
    /// The flat payloads table
    Payloads { table: String },
}

/// Outcome of one export run
#[derive(Debug, Clone, PartialEq)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub avg_row_bytes: f64,
    pub row_limit: u64,
    pub bytes_written: u64,
}

impl ExportPlan {
    /// The join when split mode is on and both split tables are enabled,
    /// otherwise the payloads table.
    pub fn from_config(config: &StorageConfig) -> Result<Self, ExportError> {
        if config.data_handling.split_payload {
            if let (Some(images), Some(features)) = (
                config.enabled_table(IMAGES_ROLE),
                config.enabled_table(FEATURES_ROLE),
            ) {
                return Ok(Self::Joined {
                    images: images.name.clone(),
                    features: features.name.clone(),
                });
            }
        }

        config
            .table(PAYLOADS_ROLE)
            .map(|table| Self::Payloads {
                table: table.name.clone(),
            })
            .ok_or(ExportError::NothingToExport)
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Joined { .. } => "images_features_export.csv",
            Self::Payloads { .. } => "payloads_export.csv",
        }
    }

    /// Tables whose average row sizes add up to one exported row
    pub fn sized_tables(&self) -> Vec<&str> {
        match self {
            Self::Joined { images, features } => vec![images.as_str(), features.as_str()],
            Self::Payloads { table } => vec![table.as_str()],
        }
    }

    pub fn select_sql(&self, row_limit: u64) -> String {
        match self {
            Self::Joined { images, features } => format!(
                "SELECT i.id AS image_id, i.timestamp AS image_timestamp, \
                 i.image_data AS image_data, f.id AS feature_id, \
                 f.feature_vector AS feature_vector, f.model_version AS model_version \
                 FROM {} AS i JOIN {} AS f ON i.id = f.image_id \
                 ORDER BY i.id LIMIT {}",
                images, features, row_limit
            ),
            Self::Payloads { table } => {
                format!("SELECT * FROM {} ORDER BY id LIMIT {}", table, row_limit)
            }
        }
    }

    pub fn copy_sql(&self, row_limit: u64) -> String {
        format!(
            "COPY ({}) TO STDOUT WITH (FORMAT csv, HEADER true)",
            self.select_sql(row_limit)
        )
    }
}

pub fn byte_limit(megabytes: u64) -> u64 {
    megabytes.saturating_mul(1024 * 1024)
}

/// Sum per-table estimates; unknown tables count as the fallback size and a
/// non-positive total falls back as well.
pub fn average_row_bytes(estimates: &[Option<f64>]) -> f64 {
    let total: f64 = estimates
        .iter()
        .map(|estimate| estimate.unwrap_or(FALLBACK_ROW_BYTES))
        .sum();

    if total > 0.0 {
        total
    } else {
        FALLBACK_ROW_BYTES
    }
}

/// At least one row, however small the byte budget
pub fn row_limit(byte_limit: u64, avg_row_bytes: f64) -> u64 {
    ((byte_limit as f64 / avg_row_bytes) as u64).max(1)
}

/// Average bytes per row from `pg_class` statistics; `None` for unknown tables
pub async fn estimate_row_bytes(
    conn: &mut PgConnection,
    table: &str,
) -> Result<Option<f64>, ExportError> {
    let estimate: Option<Option<f64>> = sqlx::query_scalar(
        "SELECT CASE WHEN reltuples <= 0 THEN 0 \
         ELSE pg_total_relation_size(oid) / reltuples END::FLOAT8 \
         FROM pg_class WHERE relname = $1",
    )
    .bind(table)
    .fetch_optional(conn)
    .await?;

    Ok(estimate.flatten())
}

/// Export up to `megabytes` of rows into `out_dir`
#[instrument(skip(conn, plan), fields(file = plan.file_name()))]
pub async fn export(
    conn: &mut PgConnection,
    plan: &ExportPlan,
    megabytes: u64,
    out_dir: &Path,
) -> Result<ExportSummary, ExportError> {
    let mut estimates = Vec::new();
    for table in plan.sized_tables() {
        let estimate = estimate_row_bytes(conn, table).await?;
        debug!(table, estimate = ?estimate, "Row size estimate");
        estimates.push(estimate);
    }

    let avg_row_bytes = average_row_bytes(&estimates);
    let row_limit = row_limit(byte_limit(megabytes), avg_row_bytes);
    info!(avg_row_bytes, row_limit, "Exporting rows");

    let path = out_dir.join(plan.file_name());
    let io_error = |source| ExportError::Io {
        path: path.clone(),
        source,
    };

    let file = tokio::fs::File::create(&path).await.map_err(io_error)?;
    let mut writer = BufWriter::new(file);

    let mut bytes_written = 0u64;
    let mut chunks = conn.copy_out_raw(&plan.copy_sql(row_limit)).await?;
    while let Some(chunk) = chunks.try_next().await? {
        writer.write_all(&chunk).await.map_err(io_error)?;
        bytes_written += chunk.len() as u64;
    }
    writer.flush().await.map_err(io_error)?;

    Ok(ExportSummary {
        path,
        avg_row_bytes,
        row_limit,
        bytes_written,
    })
}
