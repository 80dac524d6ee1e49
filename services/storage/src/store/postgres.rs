use super::{Store, StoreError, StoreTransaction, TableSpec};
use crate::config::DatabaseConfig;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{Connection, Postgres, Transaction};
use tracing::{debug, info, instrument};

/// PostgreSQL store over one dedicated connection
pub struct PgStore {
    conn: PgConnection,
}

impl PgStore {
    /// Open a connection, giving up after `connect_timeout_secs`
    #[instrument(skip(config), fields(host = %config.host, port = config.port, database = %config.name))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.name);

        let timeout = config.connect_timeout();
        let conn = tokio::time::timeout(timeout, PgConnection::connect_with(&options))
            .await
            .map_err(|_| StoreError::ConnectTimeout(timeout))??;

        info!("Connected to PostgreSQL database");

        Ok(Self { conn })
    }

    /// The underlying connection, for statements outside the store interface
    pub fn connection(&mut self) -> &mut PgConnection {
        &mut self.conn
    }

    pub async fn close(self) -> Result<(), StoreError> {
        self.conn.close().await?;
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin<'a>(&'a mut self) -> Result<Box<dyn StoreTransaction + Send + 'a>, StoreError> {
        let tx = self.conn.begin().await?;
        Ok(Box::new(PgStoreTransaction { tx: Some(tx) }))
    }

    async fn database_size(&mut self) -> Result<u64, StoreError> {
        let size: i64 = sqlx::query_scalar("SELECT pg_database_size(current_database())")
            .fetch_one(&mut self.conn)
            .await?;

        Ok(u64::try_from(size).unwrap_or(0))
    }
}

/// An open transaction; rolled back by sqlx when dropped uncommitted
pub struct PgStoreTransaction<'c> {
    tx: Option<Transaction<'c, Postgres>>,
}

impl<'c> PgStoreTransaction<'c> {
    fn tx(&mut self) -> Result<&mut Transaction<'c, Postgres>, StoreError> {
        self.tx.as_mut().ok_or(StoreError::TransactionClosed)
    }
}

#[async_trait]
impl<'c> StoreTransaction for PgStoreTransaction<'c> {
    async fn create_table(&mut self, table: &TableSpec) -> Result<(), StoreError> {
        let sql = table.create_table_sql();
        debug!(table = %table.name, sql = %sql, "Creating table");

        let tx = self.tx()?;
        sqlx::query(&sql).execute(&mut **tx).await?;
        Ok(())
    }

    async fn insert_payload(&mut self, table: &str, data: &[u8]) -> Result<(), StoreError> {
        let sql = format!("INSERT INTO {} (payload_data) VALUES ($1)", table);

        let tx = self.tx()?;
        sqlx::query(&sql).bind(data).execute(&mut **tx).await?;
        Ok(())
    }

    async fn insert_image(&mut self, table: &str, data: &[u8]) -> Result<i64, StoreError> {
        let sql = format!(
            "INSERT INTO {} (image_data) VALUES ($1) RETURNING id::BIGINT",
            table
        );

        let tx = self.tx()?;
        let id: i64 = sqlx::query_scalar(&sql)
            .bind(data)
            .fetch_one(&mut **tx)
            .await?;
        Ok(id)
    }

    async fn insert_features(
        &mut self,
        table: &str,
        image_id: i64,
        features: &[u8],
        model: Option<&str>,
    ) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO {} (image_id, feature_vector, model_version) VALUES ($1, $2, $3)",
            table
        );

        let tx = self.tx()?;
        sqlx::query(&sql)
            .bind(image_id)
            .bind(features)
            .bind(model)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or(StoreError::TransactionClosed)?;
        tx.commit().await?;
        Ok(())
    }
}
