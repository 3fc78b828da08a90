use async_trait::async_trait;
use common::domain::{EtlError, EtlResult, Notifier, OutcomeNotification};
use common::nats::{
    layered_publisher, JetStreamPublisher, LayeredPublisher, NatsTracingConfig, PublishRequest,
};
use std::sync::Arc;
use tower::ServiceExt;
use tracing::debug;

/// Publishes outcome notifications to a JetStream subject through the
/// tracing and logging publish middleware.
///
/// The topic is used verbatim as the subject; the payload is the JSON-encoded
/// `OutcomeNotification`.
pub struct NatsOutcomeNotifier {
    publisher: LayeredPublisher,
}

impl NatsOutcomeNotifier {
    pub fn new(jetstream: Arc<dyn JetStreamPublisher>) -> Self {
        debug!("initialized NatsOutcomeNotifier");

        Self {
            publisher: layered_publisher(jetstream, NatsTracingConfig::new("outcome_notifier")),
        }
    }
}

#[async_trait]
impl Notifier for NatsOutcomeNotifier {
    async fn publish(&self, topic: &str, subject: &str, message: &str) -> EtlResult<()> {
        let notification = OutcomeNotification {
            subject: subject.to_string(),
            message: message.to_string(),
        };
        let payload = serde_json::to_vec(&notification).map_err(|e| {
            EtlError::TransientBrokerError(format!("failed to encode notification: {e}"))
        })?;

        // Tower services are Clone; oneshot drives poll_ready then call
        self.publisher
            .clone()
            .oneshot(PublishRequest::new(topic, payload))
            .await
            .map_err(|e| EtlError::TransientBrokerError(format!("{e:#}")))?;

        Ok(())
    }
}
