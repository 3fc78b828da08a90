use crate::domain::{
    destination_key, transform, BatchReport, DeliveryEnvelope, DeliveryNotification, ItemOutcome,
    ItemStage,
};
use common::domain::{EtlError, EtlResult, Notifier, ObjectStoreClient};
use common::nats::link_span_to_headers;
use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Process-wide destination settings, fixed at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewEtlSettings {
    pub processed_container: String,
    pub processed_topic: String,
    /// Subject line of every outcome notification
    pub notification_subject: String,
    /// Items of one batch processed concurrently; 1 means strictly sequential
    pub max_concurrent_items: usize,
}

impl ReviewEtlSettings {
    /// Build settings, rejecting a blank destination container or topic.
    pub fn new(
        processed_container: impl Into<String>,
        processed_topic: impl Into<String>,
        notification_domain: &str,
    ) -> EtlResult<Self> {
        let processed_container = processed_container.into();
        let processed_topic = processed_topic.into();

        if processed_container.trim().is_empty() {
            return Err(EtlError::Configuration(
                "destination container name is required".to_string(),
            ));
        }
        if processed_topic.trim().is_empty() {
            return Err(EtlError::Configuration(
                "destination topic is required".to_string(),
            ));
        }

        Ok(Self {
            processed_container,
            processed_topic,
            notification_subject: format!("{} Processed Successfully", notification_domain.trim()),
            max_concurrent_items: 1,
        })
    }

    pub fn with_max_concurrent_items(mut self, max_concurrent_items: usize) -> Self {
        self.max_concurrent_items = max_concurrent_items.max(1);
        self
    }
}

/// Domain service that drives each delivered storage event through
/// fetch -> transform -> write -> notify.
///
/// Items are independent: a failure aborts only its own item, and every item
/// of the batch is attempted. Nothing is rolled back; a retried item
/// overwrites the same destination key but publishes its notification again.
pub struct ReviewEtlService {
    object_store: Arc<dyn ObjectStoreClient>,
    notifier: Arc<dyn Notifier>,
    settings: ReviewEtlSettings,
}

impl ReviewEtlService {
    pub fn new(
        object_store: Arc<dyn ObjectStoreClient>,
        notifier: Arc<dyn Notifier>,
        settings: ReviewEtlSettings,
    ) -> Self {
        Self {
            object_store,
            notifier,
            settings,
        }
    }

    /// Process one batch and report every item's outcome in delivery order.
    ///
    /// I/O steps race `ctx`; once it is cancelled the step in flight is
    /// abandoned and its item fails with `EtlError::Cancelled`.
    pub async fn process_batch(
        &self,
        envelopes: Vec<DeliveryEnvelope>,
        ctx: &CancellationToken,
    ) -> BatchReport {
        info!(
            message_count = envelopes.len(),
            "received {} messages for processing",
            envelopes.len()
        );

        let outcomes: Vec<ItemOutcome> = futures::stream::iter(envelopes)
            .map(|envelope| async move { self.process_item(&envelope, ctx).await })
            .buffered(self.settings.max_concurrent_items.max(1))
            .collect()
            .await;

        let report = BatchReport::new(outcomes);

        info!(
            completed = report.completed_count(),
            skipped = report.skipped_count(),
            failed = report.failed_count(),
            "batch processed"
        );

        report
    }

    /// Process a single delivered envelope. Never panics or short-circuits;
    /// every failure is captured in the returned outcome.
    pub async fn process_item(
        &self,
        envelope: &DeliveryEnvelope,
        ctx: &CancellationToken,
    ) -> ItemOutcome {
        let span = info_span!(
            "etl_item",
            message_id = %envelope.message_id,
            source_key = tracing::field::Empty,
        );
        link_span_to_headers(&span, envelope.headers.as_ref());

        async {
            debug!(stage = %ItemStage::Received, bytes = envelope.body.len(), "item received");

            let notification = match DeliveryNotification::from_event_body(&envelope.body) {
                Ok(notification) => notification,
                Err(e) => {
                    warn!(error = %e, "skipping malformed notification");
                    return ItemOutcome::Skipped {
                        reason: e.to_string(),
                    };
                }
            };

            tracing::Span::current().record("source_key", notification.source_key.as_str());
            info!(
                source_container = %notification.source_container,
                source_key = %notification.source_key,
                "starting ETL for file {} from bucket {}",
                notification.source_key,
                notification.source_container
            );

            match self.run_pipeline(&notification, ctx).await {
                Ok(destination_key) => {
                    info!(
                        source_key = %notification.source_key,
                        destination_key = %destination_key,
                        "successfully completed ETL and published notification for {}",
                        notification.source_key
                    );
                    ItemOutcome::Completed {
                        source_key: notification.source_key,
                        destination_key,
                    }
                }
                Err((stage, e)) => {
                    error!(
                        source_key = %notification.source_key,
                        stage = %stage,
                        error = %e,
                        "failed to process {}. Error: {}",
                        notification.source_key,
                        e
                    );
                    ItemOutcome::Failed {
                        source_key: notification.source_key,
                        stage,
                        error: e,
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Fetch, transform, write, notify. Returns the destination key, or the
    /// stage that failed together with its error.
    async fn run_pipeline(
        &self,
        notification: &DeliveryNotification,
        ctx: &CancellationToken,
    ) -> Result<String, (ItemStage, EtlError)> {
        let source_key = notification.source_key.as_str();

        debug!(stage = %ItemStage::Fetching, "reading source object");
        let raw_text = until_cancelled(
            ctx,
            ItemStage::Fetching,
            self.object_store
                .read(&notification.source_container, source_key),
        )
        .await?;

        debug!(stage = %ItemStage::Transforming, bytes = raw_text.len(), "transforming");
        let processed_text = transform(&raw_text);
        let destination_key = destination_key(source_key);

        debug!(stage = %ItemStage::Writing, destination_key = %destination_key, "writing result");
        until_cancelled(
            ctx,
            ItemStage::Writing,
            self.object_store.write(
                &self.settings.processed_container,
                &destination_key,
                &processed_text,
            ),
        )
        .await?;

        debug!(stage = %ItemStage::Notifying, topic = %self.settings.processed_topic, "notifying");
        let message = format!("File processed: {destination_key}. Source: {source_key}");
        until_cancelled(
            ctx,
            ItemStage::Notifying,
            self.notifier.publish(
                &self.settings.processed_topic,
                &self.settings.notification_subject,
                &message,
            ),
        )
        .await?;

        debug!(stage = %ItemStage::Done, "item done");
        Ok(destination_key)
    }
}

/// Run `operation` unless `ctx` is cancelled first, tagging failures with `stage`.
async fn until_cancelled<T>(
    ctx: &CancellationToken,
    stage: ItemStage,
    operation: impl Future<Output = EtlResult<T>>,
) -> Result<T, (ItemStage, EtlError)> {
    let result = tokio::select! {
        biased;
        _ = ctx.cancelled() => Err(EtlError::Cancelled(stage.as_str())),
        result = operation => result,
    };
    result.map_err(|e| (stage, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::domain::{MockNotifier, MockObjectStoreClient};
    use serde_json::json;

    fn envelope(id: &str, bucket: &str, key: &str) -> DeliveryEnvelope {
        let body = serde_json::to_vec(&json!({
            "Records": [{ "s3": { "bucket": { "name": bucket }, "object": { "key": key } } }]
        }))
        .unwrap();
        DeliveryEnvelope::new(id, body)
    }

    fn settings() -> ReviewEtlSettings {
        ReviewEtlSettings::new("out-bkt", "processed-topic", "Book Review").unwrap()
    }

    fn service(store: MockObjectStoreClient, notifier: MockNotifier) -> ReviewEtlService {
        ReviewEtlService::new(Arc::new(store), Arc::new(notifier), settings())
    }

    #[tokio::test]
    async fn test_single_item_end_to_end() {
        let mut store = MockObjectStoreClient::new();
        store
            .expect_read()
            .withf(|container: &str, key: &str| container == "in-bkt" && key == "raw/r1.txt")
            .times(1)
            .returning(|_, _| Ok("good book\nbad book\n".to_string()));
        store
            .expect_write()
            .withf(|container: &str, key: &str, text: &str| {
                container == "out-bkt"
                    && key == "clean/r1.txt"
                    && text
                        == "Total reviews processed: 3. Data validation placeholder complete."
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let mut notifier = MockNotifier::new();
        notifier
            .expect_publish()
            .withf(|topic: &str, subject: &str, message: &str| {
                topic == "processed-topic"
                    && subject == "Book Review Processed Successfully"
                    && message == "File processed: clean/r1.txt. Source: raw/r1.txt"
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let report = service(store, notifier)
            .process_batch(
                vec![envelope("m1", "in-bkt", "raw/r1.txt")],
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(report.len(), 1);
        assert_eq!(report.completed_count(), 1);
        assert!(matches!(
            &report.outcomes[0],
            ItemOutcome::Completed { destination_key, .. } if destination_key == "clean/r1.txt"
        ));
        assert!(report.into_result().is_ok());
    }

    #[tokio::test]
    async fn test_missing_object_stops_item_before_write() {
        let mut store = MockObjectStoreClient::new();
        store.expect_read().times(1).returning(|container: &str, key: &str| {
            Err(EtlError::ObjectNotFound {
                container: container.to_string(),
                key: key.to_string(),
            })
        });
        store.expect_write().never();

        let mut notifier = MockNotifier::new();
        notifier.expect_publish().never();

        let report = service(store, notifier)
            .process_batch(
                vec![envelope("m1", "in-bkt", "raw/missing.txt")],
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(
            &report.outcomes[0],
            ItemOutcome::Failed {
                stage: ItemStage::Fetching,
                error: EtlError::ObjectNotFound { .. },
                ..
            }
        ));
        assert!(matches!(
            report.into_result(),
            Err(EtlError::ObjectNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_later_failure_keeps_earlier_side_effects() {
        let mut store = MockObjectStoreClient::new();
        store
            .expect_read()
            .withf(|_: &str, key: &str| key == "raw/a.txt")
            .times(1)
            .returning(|_, _| Ok("x".to_string()));
        store
            .expect_read()
            .withf(|_: &str, key: &str| key == "raw/b.txt")
            .times(1)
            .returning(|_, _| Err(EtlError::TransientStoreError("timed out".to_string())));
        store
            .expect_write()
            .withf(|_: &str, key: &str, _: &str| key == "clean/a.txt")
            .times(1)
            .returning(|_, _, _| Ok(()));

        let mut notifier = MockNotifier::new();
        notifier
            .expect_publish()
            .withf(|_: &str, _: &str, message: &str| {
                message == "File processed: clean/a.txt. Source: raw/a.txt"
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let report = service(store, notifier)
            .process_batch(
                vec![
                    envelope("m1", "in-bkt", "raw/a.txt"),
                    envelope("m2", "in-bkt", "raw/b.txt"),
                ],
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(report.completed_count(), 1);
        assert_eq!(report.failed_count(), 1);
        assert!(report.outcomes[1].is_failed());
        assert!(report.into_result().is_err());
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_later_items() {
        let mut store = MockObjectStoreClient::new();
        store
            .expect_read()
            .withf(|_: &str, key: &str| key == "raw/bad.txt")
            .returning(|_, _| Err(EtlError::AccessDenied("denied".to_string())));
        store
            .expect_read()
            .withf(|_: &str, key: &str| key == "raw/good.txt")
            .returning(|_, _| Ok("one".to_string()));
        store
            .expect_write()
            .withf(|_: &str, key: &str, _: &str| key == "clean/good.txt")
            .times(1)
            .returning(|_, _, _| Ok(()));

        let mut notifier = MockNotifier::new();
        notifier.expect_publish().times(1).returning(|_, _, _| Ok(()));

        let report = service(store, notifier)
            .process_batch(
                vec![
                    envelope("m1", "in-bkt", "raw/bad.txt"),
                    envelope("m2", "in-bkt", "raw/good.txt"),
                ],
                &CancellationToken::new(),
            )
            .await;

        assert!(report.outcomes[0].is_failed());
        assert!(matches!(report.outcomes[1], ItemOutcome::Completed { .. }));
        assert!(matches!(
            report.first_failure(),
            Some(EtlError::AccessDenied(_))
        ));
    }

    #[tokio::test]
    async fn test_malformed_notification_is_skipped() {
        let mut store = MockObjectStoreClient::new();
        store.expect_read().never();
        let mut notifier = MockNotifier::new();
        notifier.expect_publish().never();

        let report = service(store, notifier)
            .process_batch(
                vec![DeliveryEnvelope::new("m1", &b"{\"Event\":\"s3:TestEvent\"}"[..])],
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(report.skipped_count(), 1);
        assert!(!report.has_failures());
    }

    #[tokio::test]
    async fn test_cancelled_token_fails_item_at_fetch() {
        let mut store = MockObjectStoreClient::new();
        store
            .expect_read()
            .returning(|_, _| Ok("never observed".to_string()));
        store.expect_write().never();
        let mut notifier = MockNotifier::new();
        notifier.expect_publish().never();

        let ctx = CancellationToken::new();
        ctx.cancel();

        let report = service(store, notifier)
            .process_batch(vec![envelope("m1", "in-bkt", "raw/r1.txt")], &ctx)
            .await;

        assert!(matches!(
            &report.outcomes[0],
            ItemOutcome::Failed {
                stage: ItemStage::Fetching,
                error: EtlError::Cancelled("fetching"),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_notify_failure_leaves_written_object() {
        let mut store = MockObjectStoreClient::new();
        store
            .expect_read()
            .returning(|_, _| Ok("a\nb".to_string()));
        store.expect_write().times(1).returning(|_, _, _| Ok(()));

        let mut notifier = MockNotifier::new();
        notifier
            .expect_publish()
            .times(1)
            .returning(|_, _, _| Err(EtlError::TransientBrokerError("no responders".to_string())));

        let report = service(store, notifier)
            .process_batch(
                vec![envelope("m1", "in-bkt", "raw/r1.txt")],
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(
            &report.outcomes[0],
            ItemOutcome::Failed {
                stage: ItemStage::Notifying,
                error: EtlError::TransientBrokerError(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_concurrent_items_report_in_delivery_order() {
        let mut store = MockObjectStoreClient::new();
        store.expect_read().returning(|_: &str, key: &str| Ok(key.to_string()));
        store.expect_write().times(3).returning(|_, _, _| Ok(()));
        let mut notifier = MockNotifier::new();
        notifier.expect_publish().times(3).returning(|_, _, _| Ok(()));

        let service = ReviewEtlService::new(
            Arc::new(store),
            Arc::new(notifier),
            settings().with_max_concurrent_items(3),
        );

        let report = service
            .process_batch(
                vec![
                    envelope("m1", "in-bkt", "raw/1.txt"),
                    envelope("m2", "in-bkt", "raw/2.txt"),
                    envelope("m3", "in-bkt", "raw/3.txt"),
                ],
                &CancellationToken::new(),
            )
            .await;

        let keys: Vec<&str> = report
            .outcomes
            .iter()
            .filter_map(|o| match o {
                ItemOutcome::Completed { source_key, .. } => Some(source_key.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(keys, vec!["raw/1.txt", "raw/2.txt", "raw/3.txt"]);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let report = service(MockObjectStoreClient::new(), MockNotifier::new())
            .process_batch(Vec::new(), &CancellationToken::new())
            .await;
        assert!(report.is_empty());
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn test_blank_settings_are_configuration_errors() {
        assert!(matches!(
            ReviewEtlSettings::new("", "topic", "Book Review"),
            Err(EtlError::Configuration(_))
        ));
        assert!(matches!(
            ReviewEtlSettings::new("bucket", "  ", "Book Review"),
            Err(EtlError::Configuration(_))
        ));
    }

    #[test]
    fn test_settings_subject_and_concurrency_floor() {
        let settings = settings().with_max_concurrent_items(0);
        assert_eq!(settings.notification_subject, "Book Review Processed Successfully");
        assert_eq!(settings.max_concurrent_items, 1);
    }
}
