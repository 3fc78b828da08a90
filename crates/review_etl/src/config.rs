use common::domain::{EtlError, EtlResult};
use config::{Config, ConfigError, Environment};
use review_etl_worker::{RedeliveryPolicy, ReviewEtlSettings, ReviewEtlWorkerConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    // Destination configuration
    /// Object store bucket receiving processed objects (required)
    #[serde(default)]
    pub processed_bucket_name: String,

    /// Subject outcome notifications are published to (required)
    #[serde(default)]
    pub processed_topic: String,

    /// Prefix of the notification subject, e.g. "Book Review"
    #[serde(default = "default_notification_domain")]
    pub notification_domain: String,

    // NATS configuration
    /// NATS server URL
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// JetStream stream carrying raw upload storage events
    #[serde(default = "default_nats_raw_stream")]
    pub nats_raw_stream: String,

    /// Subject filter for the raw upload consumer
    #[serde(default = "default_nats_raw_subject")]
    pub nats_raw_subject: String,

    /// Durable consumer name
    #[serde(default = "default_nats_consumer_name")]
    pub nats_consumer_name: String,

    /// JetStream stream capturing the notification topic
    #[serde(default = "default_nats_notification_stream")]
    pub nats_notification_stream: String,

    /// Batch size for consumer
    #[serde(default = "default_nats_batch_size")]
    pub nats_batch_size: usize,

    /// Max wait time for batches in seconds
    #[serde(default = "default_nats_batch_wait_secs")]
    pub nats_batch_wait_secs: u64,

    // Processing configuration
    /// Items of one batch processed concurrently
    #[serde(default = "default_max_concurrent_items")]
    pub max_concurrent_items: usize,

    /// `whole_batch` or `per_item`
    #[serde(default)]
    pub redelivery_policy: RedeliveryPolicy,

    /// Startup timeout for initialization operations in seconds
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    // OpenTelemetry configuration
    /// Enable OTLP export of traces and logs
    #[serde(default)]
    pub otel_enabled: bool,

    /// OTLP gRPC endpoint
    #[serde(default = "default_otel_endpoint")]
    pub otel_endpoint: String,

    /// Service name reported to the collector
    #[serde(default = "default_otel_service_name")]
    pub otel_service_name: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_notification_domain() -> String {
    "Book Review".to_string()
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_nats_raw_stream() -> String {
    "raw_uploads".to_string()
}

fn default_nats_raw_subject() -> String {
    "raw_uploads.>".to_string()
}

fn default_nats_consumer_name() -> String {
    "review-etl".to_string()
}

fn default_nats_notification_stream() -> String {
    "processed_reviews".to_string()
}

fn default_nats_batch_size() -> usize {
    10
}

fn default_nats_batch_wait_secs() -> u64 {
    5
}

fn default_max_concurrent_items() -> usize {
    1
}

fn default_startup_timeout_secs() -> u64 {
    30
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_otel_service_name() -> String {
    "review-etl".to_string()
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("REVIEW_ETL"))
            .build()?
            .try_deserialize()
    }

    /// Destination settings for the ETL service. Fails when either required
    /// destination key is missing or blank.
    pub fn etl_settings(&self) -> EtlResult<ReviewEtlSettings> {
        if self.processed_bucket_name.trim().is_empty() {
            return Err(EtlError::Configuration(
                "REVIEW_ETL_PROCESSED_BUCKET_NAME is required".to_string(),
            ));
        }
        if self.processed_topic.trim().is_empty() {
            return Err(EtlError::Configuration(
                "REVIEW_ETL_PROCESSED_TOPIC is required".to_string(),
            ));
        }

        Ok(ReviewEtlSettings::new(
            self.processed_bucket_name.trim(),
            self.processed_topic.trim(),
            &self.notification_domain,
        )?
        .with_max_concurrent_items(self.max_concurrent_items))
    }

    pub fn worker_config(&self) -> ReviewEtlWorkerConfig {
        ReviewEtlWorkerConfig {
            raw_stream: self.nats_raw_stream.clone(),
            raw_subject: self.nats_raw_subject.clone(),
            consumer_name: self.nats_consumer_name.clone(),
            batch_size: self.nats_batch_size,
            batch_wait_secs: self.nats_batch_wait_secs,
            redelivery_policy: self.redelivery_policy,
        }
    }
}
