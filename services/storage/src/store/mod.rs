//! Database access behind a small transactional interface.
//!
//! The engine only ever talks to [`Store`] and [`StoreTransaction`]. Production
//! uses [`postgres::PgStore`]; tests use an in-memory store with fault injection.

pub mod postgres;

#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub use postgres::PgStore;

/// Errors raised by a store backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Timed out connecting after {0:?}")]
    ConnectTimeout(Duration),

    #[error("Transaction already finished")]
    TransactionClosed,

    #[error("{0}")]
    Backend(String),
}

/// A table to create: name plus `(column, type)` pairs in declaration order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub name: String,
    pub columns: Vec<(String, String)>,
}

impl TableSpec {
    pub fn new(name: impl Into<String>, columns: Vec<(String, String)>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    pub fn create_table_sql(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(|(column, ty)| format!("{} {}", column, ty))
            .collect::<Vec<_>>()
            .join(", ");

        format!("CREATE TABLE IF NOT EXISTS {} ({})", self.name, columns)
    }
}

/// A single database connection
#[async_trait]
pub trait Store: Send {
    /// Start a transaction. Dropping it without [`StoreTransaction::commit`]
    /// discards its work.
    async fn begin<'a>(&'a mut self) -> Result<Box<dyn StoreTransaction + Send + 'a>, StoreError>;

    /// Current size of the whole database in bytes
    async fn database_size(&mut self) -> Result<u64, StoreError>;
}

/// Statements available inside one transaction
#[async_trait]
pub trait StoreTransaction: Send {
    async fn create_table(&mut self, table: &TableSpec) -> Result<(), StoreError>;

    /// Insert one opaque payload row
    async fn insert_payload(&mut self, table: &str, data: &[u8]) -> Result<(), StoreError>;

    /// Insert an image blob and return its generated id
    async fn insert_image(&mut self, table: &str, data: &[u8]) -> Result<i64, StoreError>;

    /// Insert a feature row referencing `image_id`
    async fn insert_features(
        &mut self,
        table: &str,
        image_id: i64,
        features: &[u8],
        model: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn commit(&mut self) -> Result<(), StoreError>;
}
