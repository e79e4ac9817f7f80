use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::ClientConfig;
use tracing::error;

use crate::config::KafkaConfig;
use crate::kafka::consumer::BrokerError;
use crate::kafka::EventBusError;
use crate::metric_consts::{MESSAGES_PUBLISHED, PUBLISH_FAILURES};

/// The write half of the broker connection.
#[async_trait]
pub trait MessageWriter: Send + Sync {
    async fn write_one(&self, payload: &[u8]) -> Result<(), BrokerError>;
}

pub struct KafkaWriter {
    producer: FutureProducer,
    topic: String,
}

impl KafkaWriter {
    pub fn new(config: &KafkaConfig) -> Result<Self, KafkaError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.kafka_hosts)
            .set("linger.ms", config.kafka_producer_linger_ms.to_string())
            .set(
                "message.timeout.ms",
                config.kafka_message_timeout_ms.to_string(),
            );

        if config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        let producer: FutureProducer = client_config.create()?;
        Ok(Self {
            producer,
            topic: config.kafka_topic.clone(),
        })
    }

    /// "Ping" the broker by requesting cluster metadata; returns the number
    /// of topics it reported. Used once at startup, before consuming begins.
    pub fn probe(&self, timeout: Duration) -> Result<usize, KafkaError> {
        let metadata = self.producer.client().fetch_metadata(None, timeout)?;
        Ok(metadata.topics().len())
    }

    /// Flushes queued deliveries within the timeout.
    pub fn flush(&self, timeout: Duration) -> Result<(), KafkaError> {
        self.producer.flush(timeout)
    }
}

#[async_trait]
impl MessageWriter for KafkaWriter {
    async fn write_one(&self, payload: &[u8]) -> Result<(), BrokerError> {
        let record: FutureRecord<'_, (), [u8]> = FutureRecord::to(&self.topic).payload(payload);
        match self.producer.send(record, Timeout::Never).await {
            Ok(_) => Ok(()),
            Err((err, _)) => Err(BrokerError::Kafka(err)),
        }
    }
}

/// The producer-side path: hands one message to the broker and surfaces the
/// outcome synchronously. No retry, no backoff; callers own that decision.
#[derive(Clone)]
pub struct Publisher {
    writer: Arc<dyn MessageWriter>,
}

impl Publisher {
    pub fn new(writer: Arc<dyn MessageWriter>) -> Self {
        Self { writer }
    }

    pub async fn publish(&self, payload: &[u8]) -> Result<(), EventBusError> {
        if let Err(err) = self.writer.write_one(payload).await {
            metrics::counter!(PUBLISH_FAILURES).increment(1);
            let err = EventBusError::Publish(err);
            error!(error = %err, "kafka write message failed");
            return Err(err);
        }
        metrics::counter!(MESSAGES_PUBLISHED).increment(1);
        Ok(())
    }
}
