use async_trait::async_trait;

use crate::kafka::consumer::DeliveryHandler;
use crate::metric_consts::{HANDLED_BYTES, MESSAGES_STORED};
use crate::store::DocumentStore;

/// Persists every consumed payload through the document store.
pub struct PersistHandler {
    store: DocumentStore,
}

impl PersistHandler {
    pub fn new(store: DocumentStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DeliveryHandler for PersistHandler {
    async fn handle(&self, payload: &[u8]) -> anyhow::Result<()> {
        self.store.store_message(payload).await?;
        metrics::counter!(MESSAGES_STORED).increment(1);
        Ok(())
    }
}

/// Counts delivered payload volume. Kept separate from persistence so either
/// side effect can be wired without the other.
pub struct TelemetryHandler;

#[async_trait]
impl DeliveryHandler for TelemetryHandler {
    async fn handle(&self, payload: &[u8]) -> anyhow::Result<()> {
        metrics::counter!(HANDLED_BYTES).increment(payload.len() as u64);
        Ok(())
    }
}
