//! Quota-gated persistence engine.
//!
//! The engine owns one store connection and the quota state for it. Every
//! payload is written in its own transaction; the insert counter only moves
//! after a commit succeeds.

use crate::config::StorageConfig;
use crate::quota::{QuotaPolicy, QuotaTracker};
use crate::store::{PgStore, Store, StoreError, TableSpec};
use crate::writer::{PayloadWriter, WriteReceipt};
use std::fmt;
use std::future::Future;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Errors returned by the persistence engine
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Not connected to the database")]
    NotConnected,

    #[error("Failed to connect to the database: {0}")]
    ConnectFailed(#[source] StoreError),

    #[error("Database too large ({size_mb:?} MiB measured, {max_mb} MiB allowed)")]
    QuotaExceeded { size_mb: Option<u64>, max_mb: u64 },

    #[error("Invalid payload shape: {0}")]
    InvalidPayloadShape(String),

    #[error("Schema setup failed on table {table}: {source}")]
    Schema {
        table: String,
        #[source]
        source: StoreError,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl PersistenceError {
    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotConnected => "not_connected",
            Self::ConnectFailed(_) => "connect_failed",
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::InvalidPayloadShape(_) => "invalid_payload",
            Self::Schema { .. } => "schema",
            Self::Store(_) => "store",
        }
    }
}

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Connecting,
    Connected,
    SchemaReady,
    ConnectFailed,
}

impl EngineState {
    pub fn accepts_writes(self) -> bool {
        matches!(self, Self::Connected | Self::SchemaReady)
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::SchemaReady => "schema ready",
            Self::ConnectFailed => "connect failed",
        };
        f.write_str(name)
    }
}

/// Everything the engine needs from configuration
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub database: String,
    pub writer: PayloadWriter,
    /// Enabled tables, in declaration order
    pub tables: Vec<TableSpec>,
    pub quota: QuotaPolicy,
}

impl EngineSettings {
    pub fn from_config(config: &StorageConfig) -> Self {
        let tables = config
            .tables
            .iter()
            .filter(|(_, table)| table.enabled)
            .map(|(_, table)| {
                let columns = table
                    .columns
                    .iter()
                    .map(|(name, ty)| (name.to_string(), ty.clone()))
                    .collect();
                TableSpec::new(table.name.clone(), columns)
            })
            .collect();

        let data = &config.data_handling;
        Self {
            database: config.database.name.clone(),
            writer: PayloadWriter::from_config(config),
            tables,
            quota: QuotaPolicy {
                max_bytes: data.max_db_size_bytes(),
                check_period: data.size_check_period(),
                insert_threshold: data.insert_count_size_check,
            },
        }
    }
}

/// Snapshot for status reporting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStatus {
    pub database: String,
    pub state: EngineState,
    pub mode: String,
    pub too_large: bool,
    pub last_size: Option<u64>,
}

/// Persistence engine over one store connection
pub struct PersistenceEngine<S> {
    settings: EngineSettings,
    state: EngineState,
    store: Option<S>,
    quota: QuotaTracker,
    written: u64,
    rejected: u64,
}

impl PersistenceEngine<PgStore> {
    /// Connect to PostgreSQL and prepare the schema.
    ///
    /// A failed connection is returned as an error. A failed schema setup is
    /// logged and the engine is still returned, since the tables may exist.
    pub async fn open(config: &StorageConfig) -> Result<Self, PersistenceError> {
        let mut engine = Self::new(EngineSettings::from_config(config));
        engine.connect_with(PgStore::connect(&config.database)).await?;

        if let Err(e) = engine.ensure_schema().await {
            warn!(error = %e, "Continuing without schema setup");
        }
        engine.log_status();

        Ok(engine)
    }
}

impl<S: Store> PersistenceEngine<S> {
    pub fn new(settings: EngineSettings) -> Self {
        let quota = QuotaTracker::new(settings.quota);
        Self {
            settings,
            state: EngineState::Uninitialized,
            store: None,
            quota,
            written: 0,
            rejected: 0,
        }
    }

    /// Run `connector` and keep its store. No retry on failure.
    pub async fn connect_with<F>(&mut self, connector: F) -> Result<(), PersistenceError>
    where
        F: Future<Output = Result<S, StoreError>>,
    {
        self.state = EngineState::Connecting;
        info!(database = %self.settings.database, "Connecting to database");

        match connector.await {
            Ok(store) => {
                self.store = Some(store);
                self.state = EngineState::Connected;
                Ok(())
            }
            Err(e) => {
                error!(database = %self.settings.database, error = %e, "Database connection failed");
                self.store = None;
                self.state = EngineState::ConnectFailed;
                Err(PersistenceError::ConnectFailed(e))
            }
        }
    }

    /// Create every enabled table in one transaction.
    pub async fn ensure_schema(&mut self) -> Result<(), PersistenceError> {
        let store = match self.store.as_mut() {
            Some(store) if self.state.accepts_writes() => store,
            _ => return Err(PersistenceError::NotConnected),
        };

        match create_tables(store, &self.settings.tables).await {
            Ok(()) => {
                self.state = EngineState::SchemaReady;
                info!(
                    database = %self.settings.database,
                    tables = self.settings.tables.len(),
                    "Schema ready"
                );
                Ok(())
            }
            Err(e) => {
                error!(database = %self.settings.database, error = %e, "Schema setup aborted");
                Err(e)
            }
        }
    }

    /// Persist one payload, or report why it was rejected.
    pub async fn write(&mut self, payload: &[u8]) -> Result<WriteReceipt, PersistenceError> {
        match self.try_write(payload).await {
            Ok(receipt) => {
                self.written += 1;
                metrics::counter!("storage.payloads.written").increment(1);
                debug!(
                    bytes = receipt.bytes,
                    rows = receipt.rows,
                    image_id = ?receipt.image_id,
                    "Payload stored"
                );
                Ok(receipt)
            }
            Err(e) => {
                self.rejected += 1;
                metrics::counter!("storage.payloads.rejected", "reason" => e.kind()).increment(1);
                warn!(
                    bytes = payload.len(),
                    state = %self.state,
                    too_large = self.quota.is_too_large(),
                    error = %e,
                    "Payload rejected"
                );
                Err(e)
            }
        }
    }

    async fn try_write(&mut self, payload: &[u8]) -> Result<WriteReceipt, PersistenceError> {
        let store = match self.store.as_mut() {
            Some(store) if self.state.accepts_writes() => store,
            _ => return Err(PersistenceError::NotConnected),
        };

        if self.quota.should_recheck() {
            self.quota.recheck(store.database_size()).await;
        }

        if self.quota.is_too_large() {
            return Err(PersistenceError::QuotaExceeded {
                size_mb: self.quota.last_size().map(|size| size / (1024 * 1024)),
                max_mb: self.quota.policy().max_bytes / (1024 * 1024),
            });
        }

        let mut tx = store.begin().await?;
        let receipt = self.settings.writer.apply(tx.as_mut(), payload).await?;
        tx.commit().await?;

        self.quota.record_insert();
        Ok(receipt)
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn quota(&self) -> &QuotaTracker {
        &self.quota
    }

    /// Payloads written and rejected so far
    pub fn counts(&self) -> (u64, u64) {
        (self.written, self.rejected)
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            database: self.settings.database.clone(),
            state: self.state,
            mode: self.settings.writer.to_string(),
            too_large: self.quota.is_too_large(),
            last_size: self.quota.last_size(),
        }
    }

    pub fn log_status(&self) {
        let status = self.status();
        info!(
            database = %status.database,
            state = %status.state,
            mode = %status.mode,
            too_large = status.too_large,
            last_size = ?status.last_size,
            "Persistence engine status"
        );
    }
}

async fn create_tables<S: Store>(store: &mut S, tables: &[TableSpec]) -> Result<(), PersistenceError> {
    let schema_error = |table: &str| {
        let table = table.to_string();
        move |source| PersistenceError::Schema { table, source }
    };

    let mut tx = store.begin().await.map_err(schema_error("*"))?;
    for table in tables {
        tx.create_table(table).await.map_err(schema_error(&table.name))?;
        debug!(table = %table.name, "Table ensured");
    }
    tx.commit().await.map_err(schema_error("*"))
}
