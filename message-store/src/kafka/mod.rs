pub mod consumer;
pub mod producer;

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use common_retry::RetryPolicy;
use health::HealthHandle;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::ClientConfig;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::KafkaConfig;
use crate::kafka::consumer::{
    BrokerError, ConsumerIdentity, ConsumerLoop, HandlerRegistry, KafkaReader,
};
use crate::kafka::producer::{KafkaWriter, Publisher};
use crate::lifecycle::Component;

const PROBE_TIMEOUT: Duration = Duration::from_secs(15);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("failed to establish broker connection: {0}")]
    Connect(#[source] KafkaError),
    #[error("failed to create consumer: {0}")]
    Consumer(#[source] KafkaError),
    #[error("failed to publish message: {0}")]
    Publish(#[source] BrokerError),
}

/// Owns the broker connections for the process: the producer is created up
/// front (connections are lazy), the consumer is created and handed to the
/// consumption loop when the component starts.
pub struct EventBus {
    config: KafkaConfig,
    fetch_policy: RetryPolicy,
    commit_policy: RetryPolicy,
    registry: Option<HandlerRegistry>,
    writer: Arc<KafkaWriter>,
    liveness: HealthHandle,
    consumer_task: Option<JoinHandle<()>>,
}

impl EventBus {
    pub fn new(
        config: &KafkaConfig,
        fetch_policy: RetryPolicy,
        commit_policy: RetryPolicy,
        registry: HandlerRegistry,
        liveness: HealthHandle,
    ) -> Result<Self, EventBusError> {
        let writer = Arc::new(KafkaWriter::new(config).map_err(EventBusError::Connect)?);
        Ok(Self {
            config: config.clone(),
            fetch_policy,
            commit_policy,
            registry: Some(registry),
            writer,
            liveness,
            consumer_task: None,
        })
    }

    /// The publish path, shareable with the HTTP layer before the component
    /// starts.
    pub fn publisher(&self) -> Publisher {
        Publisher::new(self.writer.clone())
    }

    fn create_consumer(&self) -> Result<StreamConsumer, KafkaError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &self.config.kafka_hosts)
            .set("group.id", &self.config.kafka_consumer_group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest");

        if self.config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        let consumer: StreamConsumer = client_config.create()?;
        consumer.subscribe(&[self.config.kafka_topic.as_str()])?;
        Ok(consumer)
    }
}

#[async_trait]
impl Component for EventBus {
    fn name(&self) -> &'static str {
        "kafka"
    }

    /// Probes broker connectivity (fatal if unreachable), then spawns the
    /// consumption loop owning a fresh reader.
    async fn start(&mut self, shutdown: &CancellationToken) -> anyhow::Result<()> {
        let topics = self
            .writer
            .probe(PROBE_TIMEOUT)
            .map_err(EventBusError::Connect)?;

        let consumer = self.create_consumer().map_err(EventBusError::Consumer)?;
        debug!(
            address = %self.config.kafka_hosts,
            group = %self.config.kafka_consumer_group,
            topic = %self.config.kafka_topic,
            topics,
            "connected to kafka"
        );

        let registry = self
            .registry
            .take()
            .ok_or_else(|| anyhow!("event bus already started"))?;

        let consumer_loop = ConsumerLoop::new(
            KafkaReader::new(consumer),
            registry,
            self.fetch_policy,
            self.commit_policy,
            self.liveness.clone(),
            ConsumerIdentity {
                address: self.config.kafka_hosts.clone(),
                group: self.config.kafka_consumer_group.clone(),
                topic: self.config.kafka_topic.clone(),
            },
        );
        self.consumer_task = Some(tokio::spawn(consumer_loop.run(shutdown.clone())));

        Ok(())
    }

    /// The process-wide cancellation token has fired by the time this runs:
    /// wait for the loop to release its reader, then flush the producer.
    async fn stop(&mut self) -> anyhow::Result<()> {
        if let Some(task) = self.consumer_task.take() {
            task.await?;
        }
        self.writer.flush(FLUSH_TIMEOUT)?;
        debug!(
            address = %self.config.kafka_hosts,
            group = %self.config.kafka_consumer_group,
            topic = %self.config.kafka_topic,
            "kafka connections closed"
        );
        Ok(())
    }
}
