//! framevault Storage Service
//!
//! Consumes payloads from the features topic and persists them in PostgreSQL,
//! refusing new rows once the database grows beyond a configured size.
//!
//! ## Features
//!
//! - **Flat or split storage**: one row per payload, or `image|features|model`
//!   payloads split into an image row and a linked feature row
//! - **Amortized size quota**: the database size is measured only after a time
//!   period or a number of inserts, and the verdict is cached in between
//! - **Atomic writes**: every payload is one transaction; a partial split write
//!   leaves nothing behind
//! - **CSV export**: the `framevault-export` tool dumps a size-bounded slice of
//!   the stored rows
//!
//! ## Architecture
//!
//! ```text
//! Kafka (features) ──▶ PersistenceHandler ──▶ PersistenceEngine ──▶ PostgreSQL
//!                                                  │
//!                                            QuotaTracker
//! ```

pub mod config;
pub mod engine;
pub mod export;
pub mod quota;
pub mod store;
pub mod stream_consumer;
pub mod writer;

pub use config::StorageConfig;
pub use engine::{EngineSettings, EngineState, EngineStatus, PersistenceEngine, PersistenceError};
pub use export::{ExportError, ExportPlan, ExportSummary};
pub use quota::{QuotaPolicy, QuotaTracker};
pub use store::{PgStore, Store, StoreError, StoreTransaction, TableSpec};
pub use stream_consumer::PersistenceHandler;
pub use writer::{PayloadWriter, SplitPayload, WriteReceipt};
