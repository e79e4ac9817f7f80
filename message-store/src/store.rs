use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::Config;
use crate::lifecycle::Component;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to connect to document store: {0}")]
    Connect(#[source] sqlx::Error),
    #[error("document store ping failed: {0}")]
    Ping(#[source] sqlx::Error),
    #[error("failed to persist message: {0}")]
    Insert(#[source] sqlx::Error),
}

/// Thin lifecycle wrapper around the persistence pool. Connections are lazy;
/// reachability is verified when the component starts.
#[derive(Clone)]
pub struct DocumentStore {
    pool: PgPool,
}

impl DocumentStore {
    pub fn connect(config: &Config) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_pg_connections)
            .acquire_timeout(config.pg_connect_timeout())
            .connect_lazy(&config.database_url)
            .map_err(StoreError::Connect)?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Appends one consumed payload. Redeliveries insert again: duplicates
    /// are an accepted consequence of at-least-once delivery.
    pub async fn store_message(&self, payload: &[u8]) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO messages (payload) VALUES ($1)")
            .bind(payload)
            .execute(&self.pool)
            .await
            .map_err(StoreError::Insert)?;
        Ok(())
    }
}

#[async_trait]
impl Component for DocumentStore {
    fn name(&self) -> &'static str {
        "store"
    }

    async fn start(&mut self, _shutdown: &CancellationToken) -> anyhow::Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(StoreError::Ping)?;
        debug!("document store connection established");
        Ok(())
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        debug!("disconnecting from document store");
        self.pool.close().await;
        Ok(())
    }
}
