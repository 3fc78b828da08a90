use crate::domain::{ReviewEtlService, ReviewEtlSettings};
use crate::nats::{create_delivery_batch_processor, NatsOutcomeNotifier, RedeliveryPolicy};
use common::domain::ObjectStoreClient;
use common::nats::{JetStreamConsumer, JetStreamPublisher, NatsConsumer};
use etl_runner::AppProcess;
use std::sync::Arc;
use tracing::info;

pub struct ReviewEtlWorkerConfig {
    pub raw_stream: String,
    pub raw_subject: String,
    pub consumer_name: String,
    pub batch_size: usize,
    pub batch_wait_secs: u64,
    pub redelivery_policy: RedeliveryPolicy,
}

/// Wires the ETL service between the raw-upload consumer, the processed
/// object store and the outcome notifier.
pub struct ReviewEtlWorker {
    consumer: NatsConsumer,
}

impl ReviewEtlWorker {
    pub async fn new(
        object_store: Arc<dyn ObjectStoreClient>,
        consumer_client: Arc<dyn JetStreamConsumer>,
        publisher_client: Arc<dyn JetStreamPublisher>,
        settings: ReviewEtlSettings,
        config: ReviewEtlWorkerConfig,
    ) -> anyhow::Result<Self> {
        info!(
            processed_container = %settings.processed_container,
            processed_topic = %settings.processed_topic,
            redelivery_policy = ?config.redelivery_policy,
            "initializing review ETL worker"
        );

        let notifier = Arc::new(NatsOutcomeNotifier::new(publisher_client));
        let service = Arc::new(ReviewEtlService::new(object_store, notifier, settings));

        let processor = create_delivery_batch_processor(service, config.redelivery_policy);
        let consumer = NatsConsumer::new(
            consumer_client,
            &config.raw_stream,
            &config.consumer_name,
            &config.raw_subject,
            config.batch_size,
            config.batch_wait_secs,
            processor,
        )
        .await?;

        info!("review ETL worker initialized");

        Ok(Self { consumer })
    }

    pub fn into_runner_processes(self) -> Vec<AppProcess> {
        vec![Box::new({
            let consumer = self.consumer;
            move |ctx| Box::pin(async move { consumer.run(ctx).await })
        })]
    }
}
