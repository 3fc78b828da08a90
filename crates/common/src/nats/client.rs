use crate::nats::traits::{JetStreamConsumer, JetStreamPublisher, PullConsumer};
use anyhow::{Context, Result};
use async_nats::jetstream::{self, stream::Config as StreamConfig};
use async_nats::HeaderMap;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct NatsClient {
    client: async_nats::Client,
    jetstream: jetstream::Context,
}

impl NatsClient {
    pub async fn connect(url: &str, timeout: std::time::Duration) -> Result<Self> {
        info!(url = %url, timeout_ms = timeout.as_millis(), "connecting to NATS");

        let client = async_nats::ConnectOptions::new()
            .connection_timeout(timeout)
            .connect(url)
            .await
            .context("failed to connect to NATS")?;

        let jetstream = jetstream::new(client.clone());

        info!("connected to NATS");
        Ok(Self { client, jetstream })
    }

    /// Make sure `stream_name` exists, creating it to capture `subjects` if it does not.
    ///
    /// An existing stream is left untouched even if its subjects differ.
    pub async fn ensure_stream(&self, stream_name: &str, subjects: Vec<String>) -> Result<()> {
        debug!(stream = %stream_name, subjects = ?subjects, "ensuring stream exists");

        if self.jetstream.get_stream(stream_name).await.is_ok() {
            debug!(stream = %stream_name, "stream already exists");
            return Ok(());
        }

        let stream_config = StreamConfig {
            name: stream_name.to_string(),
            subjects,
            ..Default::default()
        };

        self.jetstream
            .create_stream(stream_config)
            .await
            .with_context(|| format!("failed to create stream {stream_name}"))?;
        info!(stream = %stream_name, "created stream");

        Ok(())
    }

    pub fn jetstream(&self) -> &jetstream::Context {
        &self.jetstream
    }

    /// Create a JetStreamConsumer trait object from this client
    pub fn create_consumer_client(&self) -> Arc<dyn JetStreamConsumer> {
        Arc::new(NatsJetStreamConsumer::new(self.jetstream.clone()))
    }

    /// Create a JetStreamPublisher trait object from this client
    pub fn create_publisher_client(&self) -> Arc<dyn JetStreamPublisher> {
        Arc::new(NatsJetStreamPublisher::new(self.jetstream.clone()))
    }

    /// Flush pending publishes before the connection is dropped.
    pub async fn close(self) -> Result<()> {
        info!("closing NATS connection");
        self.client
            .flush()
            .await
            .context("failed to flush NATS connection")?;
        Ok(())
    }
}

/// JetStreamConsumer backed by async-nats
pub struct NatsJetStreamConsumer {
    context: jetstream::Context,
}

impl NatsJetStreamConsumer {
    pub fn new(context: jetstream::Context) -> Self {
        Self { context }
    }
}

#[async_trait]
impl JetStreamConsumer for NatsJetStreamConsumer {
    async fn create_consumer(
        &self,
        config: jetstream::consumer::pull::Config,
        stream_name: &str,
    ) -> Result<Box<dyn PullConsumer>> {
        let consumer = self
            .context
            .create_consumer_on_stream(config, stream_name)
            .await
            .context("failed to create consumer")?;

        Ok(Box::new(NatsPullConsumer { consumer }))
    }
}

/// PullConsumer backed by async-nats
pub struct NatsPullConsumer {
    consumer: jetstream::consumer::PullConsumer,
}

#[async_trait]
impl PullConsumer for NatsPullConsumer {
    async fn fetch_messages(
        &self,
        max_messages: usize,
        expires: std::time::Duration,
    ) -> Result<Vec<jetstream::Message>> {
        use futures::StreamExt;

        let mut messages = self
            .consumer
            .fetch()
            .max_messages(max_messages)
            .expires(expires)
            .messages()
            .await
            .context("failed to fetch messages")?;

        let mut batch = Vec::new();
        while let Some(message) = messages.next().await {
            match message {
                Ok(message) => batch.push(message),
                // A broken delivery stays unacked and comes back after ack_wait
                Err(e) => warn!(error = %e, "error receiving message from batch"),
            }
        }
        Ok(batch)
    }
}

/// JetStreamPublisher backed by async-nats
pub struct NatsJetStreamPublisher {
    context: jetstream::Context,
}

impl NatsJetStreamPublisher {
    pub fn new(context: jetstream::Context) -> Self {
        Self { context }
    }
}

#[async_trait]
impl JetStreamPublisher for NatsJetStreamPublisher {
    async fn publish_with_headers(
        &self,
        subject: String,
        headers: HeaderMap,
        payload: bytes::Bytes,
    ) -> Result<()> {
        let ack = self
            .context
            .publish_with_headers(subject, headers, payload)
            .await
            .context("failed to publish message to JetStream")?;

        ack.await
            .context("failed to receive JetStream acknowledgment")?;
        Ok(())
    }
}
