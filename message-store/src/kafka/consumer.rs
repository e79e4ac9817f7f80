use std::sync::Arc;

use async_trait::async_trait;
use common_retry::{Backoff, RetryPolicy};
use health::HealthHandle;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::{Message, Offset, TopicPartitionList};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::metric_consts::{
    COMMIT_FAILURES, COMMIT_RETRIES, DISPATCH_FAILURES, FETCH_FAILURES, MESSAGES_COMMITTED,
    MESSAGES_RECEIVED,
};

/// One record fetched from the broker. Read-only to the consumer; the offset
/// is only ever handed back for committing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("commit retries exceeded")]
    CommitRetriesExceeded,
    #[error("cancelled")]
    Cancelled,
}

/// The read half of the broker connection. Owned exclusively by the
/// consumption loop, which closes it exactly once on its exit path.
///
/// Abstracted so tests can substitute an in-memory broker without touching
/// loop logic.
#[async_trait]
pub trait MessageReader: Send {
    async fn fetch_next(
        &mut self,
        shutdown: &CancellationToken,
    ) -> Result<ConsumedMessage, BrokerError>;

    async fn commit(
        &mut self,
        message: &ConsumedMessage,
        shutdown: &CancellationToken,
    ) -> Result<(), BrokerError>;

    async fn close(&mut self) -> Result<(), BrokerError>;
}

pub struct KafkaReader {
    consumer: StreamConsumer,
}

impl KafkaReader {
    pub fn new(consumer: StreamConsumer) -> Self {
        Self { consumer }
    }
}

#[async_trait]
impl MessageReader for KafkaReader {
    async fn fetch_next(
        &mut self,
        shutdown: &CancellationToken,
    ) -> Result<ConsumedMessage, BrokerError> {
        tokio::select! {
            _ = shutdown.cancelled() => Err(BrokerError::Cancelled),
            received = self.consumer.recv() => {
                let message = received?;
                Ok(ConsumedMessage {
                    topic: message.topic().to_string(),
                    partition: message.partition(),
                    offset: message.offset(),
                    payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                })
            }
        }
    }

    async fn commit(
        &mut self,
        message: &ConsumedMessage,
        _shutdown: &CancellationToken,
    ) -> Result<(), BrokerError> {
        let mut offsets = TopicPartitionList::new();
        offsets.add_partition_offset(
            &message.topic,
            message.partition,
            Offset::Offset(message.offset + 1),
        )?;
        self.consumer.commit(&offsets, CommitMode::Sync)?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        self.consumer.unsubscribe();
        Ok(())
    }
}

/// A registered side effect for every consumed payload. Handlers must be fast
/// or internally non-blocking: they run on the loop's own task and a slow
/// handler stalls the whole partition.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn handle(&self, payload: &[u8]) -> anyhow::Result<()>;
}

/// Ordered collection of delivery handlers. Closed for mutation once the
/// consumption loop takes ownership of it.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Vec<Arc<dyn DeliveryHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn DeliveryHandler>) {
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Invokes every handler in registration order. Handlers are independent
    /// side effects, so a failure does not stop the fan-out; the first
    /// failure is what the caller gets back once all handlers have run.
    pub async fn dispatch(&self, message: &ConsumedMessage) -> anyhow::Result<()> {
        let mut first_failure = None;
        for handler in &self.handlers {
            if let Err(failure) = handler.handle(&message.payload).await {
                if first_failure.is_none() {
                    first_failure = Some(failure);
                }
            }
        }
        match first_failure {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }
}

/// Connection parameters carried for logging only.
#[derive(Debug, Clone, Default)]
pub struct ConsumerIdentity {
    pub address: String,
    pub group: String,
    pub topic: String,
}

/// The fetch -> dispatch -> commit state machine for one partition
/// assignment.
///
/// Within one instance messages are strictly sequential: the fetch of message
/// N+1 never starts before message N has finished dispatching and had its
/// commit decision resolved. Parallelism across partitions means running one
/// loop instance per partition, never reordering within one.
pub struct ConsumerLoop<R> {
    reader: R,
    handlers: HandlerRegistry,
    fetch_policy: RetryPolicy,
    commit_policy: RetryPolicy,
    liveness: HealthHandle,
    identity: ConsumerIdentity,
}

impl<R: MessageReader> ConsumerLoop<R> {
    pub fn new(
        reader: R,
        handlers: HandlerRegistry,
        fetch_policy: RetryPolicy,
        commit_policy: RetryPolicy,
        liveness: HealthHandle,
        identity: ConsumerIdentity,
    ) -> Self {
        Self {
            reader,
            handlers,
            fetch_policy,
            commit_policy,
            liveness,
            identity,
        }
    }

    /// Consumes until the cancellation token fires. Steady-state failures
    /// never escape: fetch failures are paced and retried forever, dispatch
    /// and commit failures leave the offset unadvanced so the message is
    /// redelivered (at-least-once).
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut fetch_backoff = Backoff::new(self.fetch_policy);

        loop {
            if shutdown.is_cancelled() {
                debug!(group = %self.identity.group, "consumer loop stopping");
                break;
            }
            self.liveness.report_healthy();

            let message = match self.reader.fetch_next(&shutdown).await {
                Ok(message) => message,
                Err(BrokerError::Cancelled) => {
                    debug!(group = %self.identity.group, "fetch cancelled");
                    break;
                }
                Err(err) => {
                    metrics::counter!(FETCH_FAILURES).increment(1);
                    error!(
                        address = %self.identity.address,
                        topic = %self.identity.topic,
                        group = %self.identity.group,
                        error = %err,
                        "fetch failed"
                    );
                    fetch_backoff.wait(&shutdown).await;
                    continue;
                }
            };
            fetch_backoff.reset();
            metrics::counter!(MESSAGES_RECEIVED).increment(1);
            debug!(
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                size = message.payload.len(),
                "message received"
            );

            if let Err(err) = self.handlers.dispatch(&message).await {
                // Processing failed: do not commit, so the message is
                // redelivered on a future consumption cycle.
                metrics::counter!(DISPATCH_FAILURES).increment(1);
                error!(
                    topic = %message.topic,
                    offset = message.offset,
                    error = %err,
                    "dispatch failed, message left uncommitted"
                );
                continue;
            }

            match self.commit_with_retry(&message, &shutdown).await {
                Ok(()) => {
                    metrics::counter!(MESSAGES_COMMITTED).increment(1);
                    debug!(
                        topic = %message.topic,
                        offset = message.offset,
                        "message committed"
                    );
                }
                Err(BrokerError::Cancelled) => break,
                Err(err) => {
                    // Commit never landed: the message will come back
                    // (at-least-once), the loop itself keeps going.
                    metrics::counter!(COMMIT_FAILURES).increment(1);
                    error!(
                        topic = %message.topic,
                        offset = message.offset,
                        attempts = self.commit_policy.attempts,
                        error = %err,
                        "commit abandoned, message will be redelivered"
                    );
                }
            }
        }

        if let Err(err) = self.reader.close().await {
            warn!(group = %self.identity.group, error = %err, "consumer close failed");
        }
    }

    /// Commits with a fresh backoff seeded from the commit policy, never the
    /// fetch one. Cancellation aborts the retry loop outward; an exhausted
    /// ceiling is reported as `CommitRetriesExceeded`.
    async fn commit_with_retry(
        &mut self,
        message: &ConsumedMessage,
        shutdown: &CancellationToken,
    ) -> Result<(), BrokerError> {
        let mut backoff = Backoff::new(self.commit_policy);
        for attempt in 1..=self.commit_policy.attempts {
            if shutdown.is_cancelled() {
                return Err(BrokerError::Cancelled);
            }
            match self.reader.commit(message, shutdown).await {
                Ok(()) => return Ok(()),
                Err(BrokerError::Cancelled) => return Err(BrokerError::Cancelled),
                Err(err) => {
                    if shutdown.is_cancelled() {
                        return Err(BrokerError::Cancelled);
                    }
                    metrics::counter!(COMMIT_RETRIES).increment(1);
                    warn!(
                        topic = %message.topic,
                        offset = message.offset,
                        attempt,
                        error = %err,
                        "commit retry"
                    );
                    backoff.wait(shutdown).await;
                }
            }
        }
        Err(BrokerError::CommitRetriesExceeded)
    }
}
