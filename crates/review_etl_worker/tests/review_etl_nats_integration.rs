#![cfg(feature = "integration-tests")]

use async_nats::jetstream;
use common::domain::{ObjectStoreClient, OutcomeNotification};
use common::nats::{NatsClient, NatsObjectStoreClient};
use futures::StreamExt;
use review_etl_worker::{
    RedeliveryPolicy, ReviewEtlSettings, ReviewEtlWorker, ReviewEtlWorkerConfig,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::info;

const RAW_STREAM: &str = "raw_uploads";
const RAW_SUBJECT: &str = "raw_uploads.>";
const NOTIFICATION_STREAM: &str = "processed_reviews";
const NOTIFICATION_TOPIC: &str = "processed_reviews";
const SOURCE_BUCKET: &str = "reviews-in";
const PROCESSED_BUCKET: &str = "reviews-processed";

struct TestEnvironment {
    _nats_container: ContainerAsync<GenericImage>,
    nats_client: Arc<NatsClient>,
    store: Arc<NatsObjectStoreClient>,
    worker_token: CancellationToken,
}

async fn setup_test_env() -> TestEnvironment {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .try_init();

    // Start NATS container with JetStream enabled
    let nats_container = GenericImage::new("nats", "latest")
        .with_exposed_port(4222.into())
        .with_cmd(["-js"])
        .start()
        .await
        .unwrap();

    let nats_host = nats_container.get_host().await.unwrap();
    let nats_port = nats_container.get_host_port_ipv4(4222).await.unwrap();
    let nats_url = format!("nats://{}:{}", nats_host, nats_port);

    info!("NATS started at {}", nats_url);

    let nats_client = Arc::new(
        NatsClient::connect(&nats_url, Duration::from_secs(10))
            .await
            .expect("Failed to connect to NATS"),
    );
    nats_client
        .ensure_stream(RAW_STREAM, vec![RAW_SUBJECT.to_string()])
        .await
        .unwrap();
    nats_client
        .ensure_stream(NOTIFICATION_STREAM, vec![NOTIFICATION_TOPIC.to_string()])
        .await
        .unwrap();

    let store = Arc::new(NatsObjectStoreClient::new(nats_client.jetstream().clone()));
    store.ensure_bucket(SOURCE_BUCKET).await.unwrap();
    store.ensure_bucket(PROCESSED_BUCKET).await.unwrap();

    let settings = ReviewEtlSettings::new(PROCESSED_BUCKET, NOTIFICATION_TOPIC, "Book Review")
        .unwrap();
    let worker = ReviewEtlWorker::new(
        store.clone(),
        nats_client.create_consumer_client(),
        nats_client.create_publisher_client(),
        settings,
        ReviewEtlWorkerConfig {
            raw_stream: RAW_STREAM.to_string(),
            raw_subject: RAW_SUBJECT.to_string(),
            consumer_name: "review-etl-test".to_string(),
            batch_size: 10,
            batch_wait_secs: 1,
            redelivery_policy: RedeliveryPolicy::PerItem,
        },
    )
    .await
    .expect("Failed to create worker");

    let worker_token = CancellationToken::new();
    for process in worker.into_runner_processes() {
        let ctx = worker_token.clone();
        tokio::spawn(async move { process(ctx).await });
    }

    TestEnvironment {
        _nats_container: nats_container,
        nats_client,
        store,
        worker_token,
    }
}

fn storage_event(bucket: &str, key: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "Records": [{ "s3": { "bucket": { "name": bucket }, "object": { "key": key } } }]
    }))
    .unwrap()
}

async fn publish_event(env: &TestEnvironment, payload: Vec<u8>) {
    env.nats_client
        .jetstream()
        .publish(format!("{RAW_STREAM}.{SOURCE_BUCKET}"), payload.into())
        .await
        .unwrap()
        .await
        .unwrap();
}

/// Wait for the next outcome notification on the notification stream
async fn next_notification(env: &TestEnvironment) -> OutcomeNotification {
    let stream = env
        .nats_client
        .jetstream()
        .get_stream(NOTIFICATION_STREAM)
        .await
        .unwrap();
    let consumer = stream
        .create_consumer(jetstream::consumer::pull::Config {
            ack_policy: jetstream::consumer::AckPolicy::None,
            ..Default::default()
        })
        .await
        .unwrap();

    let message = timeout(Duration::from_secs(15), async {
        loop {
            let mut batch = Box::pin(
                consumer
                    .batch()
                    .max_messages(1)
                    .expires(Duration::from_secs(1))
                    .messages()
                    .await
                    .unwrap(),
            );
            if let Some(message) = batch.next().await {
                return message.unwrap();
            }
        }
    })
    .await
    .expect("no notification published");

    serde_json::from_slice(&message.payload).unwrap()
}

#[tokio::test]
async fn test_raw_upload_is_transformed_written_and_announced() {
    let env = setup_test_env().await;

    env.store
        .write(SOURCE_BUCKET, "raw/book-1.txt", "great\nfine\nawful")
        .await
        .unwrap();
    publish_event(&env, storage_event(SOURCE_BUCKET, "raw/book-1.txt")).await;

    let notification = next_notification(&env).await;
    assert_eq!(notification.subject, "Book Review Processed Successfully");
    assert_eq!(
        notification.message,
        "File processed: clean/book-1.txt. Source: raw/book-1.txt"
    );

    let processed = env
        .store
        .read(PROCESSED_BUCKET, "clean/book-1.txt")
        .await
        .unwrap();
    assert_eq!(
        processed,
        "Total reviews processed: 3. Data validation placeholder complete."
    );

    env.worker_token.cancel();
}

#[tokio::test]
async fn test_malformed_event_does_not_block_later_uploads() {
    let env = setup_test_env().await;

    publish_event(&env, br#"{"Event":"s3:TestEvent"}"#.to_vec()).await;

    env.store
        .write(SOURCE_BUCKET, "raw/book-2.txt", "only one")
        .await
        .unwrap();
    publish_event(&env, storage_event(SOURCE_BUCKET, "raw/book-2.txt")).await;

    let notification = next_notification(&env).await;
    assert_eq!(
        notification.message,
        "File processed: clean/book-2.txt. Source: raw/book-2.txt"
    );

    env.worker_token.cancel();
}

#[tokio::test]
async fn test_missing_source_object_writes_nothing() {
    let env = setup_test_env().await;

    publish_event(&env, storage_event(SOURCE_BUCKET, "raw/never-uploaded.txt")).await;
    tokio::time::sleep(Duration::from_secs(3)).await;

    let result = env
        .store
        .read(PROCESSED_BUCKET, "clean/never-uploaded.txt")
        .await;
    assert!(matches!(
        result,
        Err(common::domain::EtlError::ObjectNotFound { .. })
    ));

    env.worker_token.cancel();
}
