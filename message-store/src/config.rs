use std::time::Duration;

use common_retry::RetryPolicy;
use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct KafkaConfig {
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "message-store")]
    pub kafka_consumer_group: String,

    #[envconfig(default = "messages")]
    pub kafka_topic: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32, // Maximum time between producer batches during low traffic

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32, // Time before we stop retrying producing a message: 20 seconds
}

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "::")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3300")]
    pub port: u16,

    // management endpoint serves _readiness/_liveness/metrics
    #[envconfig(from = "MANAGEMENT_BIND_HOST", default = "::")]
    pub management_host: String,

    #[envconfig(from = "MANAGEMENT_BIND_PORT", default = "8080")]
    pub management_port: u16,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    // Fetch retries are unbounded; these only shape the pacing between them.
    #[envconfig(from = "FETCH_RETRY_INITIAL_MS", default = "1000")]
    pub fetch_retry_initial_ms: u64,

    #[envconfig(from = "FETCH_RETRY_MAX_MS", default = "30000")]
    pub fetch_retry_max_ms: u64,

    #[envconfig(from = "FETCH_RETRY_FACTOR", default = "2.0")]
    pub fetch_retry_factor: f64,

    #[envconfig(from = "FETCH_RETRY_JITTER", default = "true")]
    pub fetch_retry_jitter: bool,

    // Commit retries stop after the ceiling; the message is then left
    // uncommitted for redelivery.
    #[envconfig(from = "COMMIT_RETRY_ATTEMPTS", default = "3")]
    pub commit_retry_attempts: u32,

    #[envconfig(from = "COMMIT_RETRY_INITIAL_MS", default = "1000")]
    pub commit_retry_initial_ms: u64,

    #[envconfig(from = "COMMIT_RETRY_MAX_MS", default = "30000")]
    pub commit_retry_max_ms: u64,

    #[envconfig(from = "COMMIT_RETRY_FACTOR", default = "2.0")]
    pub commit_retry_factor: f64,

    #[envconfig(from = "COMMIT_RETRY_JITTER", default = "true")]
    pub commit_retry_jitter: bool,

    #[envconfig(from = "DATABASE_URL", default = "postgres://localhost:5432/message_store")]
    pub database_url: String,

    #[envconfig(from = "MAX_PG_CONNECTIONS", default = "4")]
    pub max_pg_connections: u32,

    #[envconfig(from = "PG_CONNECT_TIMEOUT_SECS", default = "10")]
    pub pg_connect_timeout_secs: u64,

    #[envconfig(from = "CONSUMER_LIVENESS_DEADLINE_SECS", default = "60")]
    pub consumer_liveness_deadline_secs: u64,

    #[envconfig(from = "SHUTDOWN_TIMEOUT_SECS", default = "10")]
    pub shutdown_timeout_secs: u64,
}

impl Config {
    pub fn init_with_defaults() -> Result<Self, envconfig::Error> {
        Self::init_from_env()
    }

    pub fn fetch_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            // 0 marks the fetch policy as unbounded; the loop never gives up
            // fetching, it only paces retries.
            attempts: 0,
            initial: Duration::from_millis(self.fetch_retry_initial_ms),
            max: Duration::from_millis(self.fetch_retry_max_ms),
            factor: self.fetch_retry_factor,
            jitter: self.fetch_retry_jitter,
        }
    }

    pub fn commit_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.commit_retry_attempts,
            initial: Duration::from_millis(self.commit_retry_initial_ms),
            max: Duration::from_millis(self.commit_retry_max_ms),
            factor: self.commit_retry_factor,
            jitter: self.commit_retry_jitter,
        }
    }

    pub fn api_bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn management_bind(&self) -> String {
        format!("{}:{}", self.management_host, self.management_port)
    }

    pub fn pg_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.pg_connect_timeout_secs)
    }

    pub fn consumer_liveness_deadline(&self) -> Duration {
        Duration::from_secs(self.consumer_liveness_deadline_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn test_config() -> Config {
        Config::init_from_hashmap(&HashMap::new()).unwrap()
    }

    #[test]
    fn retry_policies_are_independent() {
        let mut config = test_config();
        config.fetch_retry_initial_ms = 500;
        config.fetch_retry_jitter = false;
        config.commit_retry_initial_ms = 250;
        config.commit_retry_attempts = 5;

        let fetch = config.fetch_retry_policy();
        let commit = config.commit_retry_policy();

        assert_eq!(fetch.attempts, 0);
        assert_eq!(fetch.initial, Duration::from_millis(500));
        assert!(!fetch.jitter);

        assert_eq!(commit.attempts, 5);
        assert_eq!(commit.initial, Duration::from_millis(250));
        assert!(commit.jitter);
    }

    #[test]
    fn defaults_load_without_env() {
        let config = test_config();
        assert_eq!(config.kafka.kafka_topic, "messages");
        assert_eq!(config.kafka.kafka_consumer_group, "message-store");
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(10));
    }
}
