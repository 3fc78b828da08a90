use crate::nats::traits::{JetStreamConsumer, PullConsumer};
use anyhow::{Context, Result};
use async_nats::jetstream::{self, Message};
use async_nats::HeaderMap;
use bytes::Bytes;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Owned copy of one delivered message, handed to the batch processor
#[derive(Debug, Clone)]
pub struct DeliveredMessage {
    pub subject: String,
    /// Position of the message in its stream; `None` when the delivery
    /// metadata could not be parsed
    pub stream_sequence: Option<u64>,
    pub payload: Bytes,
    pub headers: Option<HeaderMap>,
}

impl DeliveredMessage {
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            stream_sequence: None,
            payload: payload.into(),
            headers: None,
        }
    }

    pub fn with_stream_sequence(mut self, stream_sequence: u64) -> Self {
        self.stream_sequence = Some(stream_sequence);
        self
    }

    /// Identifier of this delivery for logs: `<subject>#<stream sequence>`,
    /// or the bare subject when the sequence is unknown.
    pub fn delivery_id(&self) -> String {
        match self.stream_sequence {
            Some(sequence) => format!("{}#{}", self.subject, sequence),
            None => self.subject.clone(),
        }
    }

    fn from_jetstream(message: &Message) -> Self {
        let stream_sequence = match message.info() {
            Ok(info) => Some(info.stream_sequence),
            Err(e) => {
                warn!(error = %e, subject = %message.subject, "message has no delivery info");
                None
            }
        };

        Self {
            subject: message.subject.to_string(),
            stream_sequence,
            payload: message.payload.clone(),
            headers: message.headers.clone(),
        }
    }
}

/// Result of processing a batch of messages
/// Indices refer to positions in the batch handed to the processor
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ProcessingResult {
    /// Messages to acknowledge (Ack)
    pub ack: Vec<usize>,
    /// Messages to reject for redelivery (Nak) with optional error details
    pub nak: Vec<(usize, Option<String>)>,
}

impl ProcessingResult {
    pub fn ack_all(count: usize) -> Self {
        Self {
            ack: (0..count).collect(),
            nak: Vec::new(),
        }
    }

    pub fn nak_all(count: usize, error: Option<String>) -> Self {
        Self {
            ack: Vec::new(),
            nak: (0..count).map(|i| (i, error.clone())).collect(),
        }
    }

    pub fn new(ack: Vec<usize>, nak: Vec<(usize, Option<String>)>) -> Self {
        Self { ack, nak }
    }
}

/// Batch processor callback
///
/// Receives the owned messages of one fetch and the consumer's cancellation
/// token, and decides which messages to ack and which to nak.
pub type BatchProcessor = Box<
    dyn Fn(Vec<DeliveredMessage>, CancellationToken) -> BoxFuture<'static, Result<ProcessingResult>>
        + Send
        + Sync,
>;

/// Durable JetStream pull consumer that hands each fetched batch to a processor
/// and settles every message according to the returned `ProcessingResult`.
///
/// Messages the processor does not mention are left unacknowledged and are
/// redelivered once the consumer's ack wait expires.
pub struct NatsConsumer {
    consumer: Box<dyn PullConsumer>,
    stream_name: String,
    consumer_name: String,
    batch_size: usize,
    max_wait: Duration,
    processor: BatchProcessor,
}

impl NatsConsumer {
    pub async fn new(
        jetstream: Arc<dyn JetStreamConsumer>,
        stream_name: &str,
        consumer_name: &str,
        subject_filter: &str,
        batch_size: usize,
        max_wait_secs: u64,
        processor: BatchProcessor,
    ) -> Result<Self> {
        debug!(
            stream = %stream_name,
            consumer = %consumer_name,
            filter_subject = %subject_filter,
            "creating nats consumer"
        );

        let config = jetstream::consumer::pull::Config {
            name: Some(consumer_name.to_string()),
            durable_name: Some(consumer_name.to_string()),
            filter_subject: subject_filter.to_string(),
            ack_policy: jetstream::consumer::AckPolicy::Explicit,
            ..Default::default()
        };

        let consumer = jetstream
            .create_consumer(config, stream_name)
            .await
            .context("failed to create consumer")?;

        info!(
            stream = %stream_name,
            consumer = %consumer_name,
            "nats consumer created"
        );

        Ok(Self {
            consumer,
            stream_name: stream_name.to_string(),
            consumer_name: consumer_name.to_string(),
            batch_size,
            max_wait: Duration::from_secs(max_wait_secs),
            processor,
        })
    }

    /// Fetch and process batches until `ctx` is cancelled.
    ///
    /// Cancellation interrupts a pending fetch immediately. A batch that is
    /// already being processed receives the token and is still settled, so
    /// abandoned items are nak'd rather than left to time out.
    pub async fn run(&self, ctx: CancellationToken) -> Result<()> {
        info!(
            stream = %self.stream_name,
            consumer = %self.consumer_name,
            "starting consumer loop"
        );

        loop {
            let fetched = tokio::select! {
                biased;
                _ = ctx.cancelled() => break,
                fetched = self.consumer.fetch_messages(self.batch_size, self.max_wait) => fetched,
            };

            match fetched {
                Ok(messages) if messages.is_empty() => debug!("no messages in batch"),
                Ok(messages) => self.process_batch(messages, ctx.clone()).await,
                Err(e) => {
                    error!(
                        stream = %self.stream_name,
                        consumer = %self.consumer_name,
                        error = %e,
                        "error fetching batch"
                    );
                    tokio::select! {
                        _ = ctx.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                }
            }
        }

        info!(
            stream = %self.stream_name,
            consumer = %self.consumer_name,
            "received shutdown signal, consumer stopped"
        );
        Ok(())
    }

    async fn process_batch(&self, messages: Vec<Message>, ctx: CancellationToken) {
        let span = info_span!(
            "nats_batch",
            stream = %self.stream_name,
            consumer = %self.consumer_name,
            message_count = messages.len(),
        );

        async {
            let delivered: Vec<DeliveredMessage> = messages
                .iter()
                .map(DeliveredMessage::from_jetstream)
                .collect();

            let result = match (self.processor)(delivered, ctx).await {
                Ok(result) => result,
                Err(e) => {
                    error!(error = %e, "processor returned error, rejecting all messages");
                    ProcessingResult::nak_all(messages.len(), Some(e.to_string()))
                }
            };

            settle(&messages, result).await;
        }
        .instrument(span)
        .await
    }
}

async fn settle(messages: &[Message], result: ProcessingResult) {
    let ack_count = result.ack.len();
    for idx in result.ack {
        let Some(msg) = messages.get(idx) else {
            warn!(message_index = idx, batch_size = messages.len(), "invalid ack index");
            continue;
        };
        if let Err(e) = msg.ack().await {
            error!(error = %e, message_index = idx, "failed to acknowledge message");
        }
    }

    let nak_count = result.nak.len();
    for (idx, reason) in result.nak {
        let Some(msg) = messages.get(idx) else {
            warn!(message_index = idx, batch_size = messages.len(), "invalid nak index");
            continue;
        };
        warn!(
            message_index = idx,
            subject = %msg.subject,
            reason = reason.as_deref().unwrap_or("unspecified"),
            "rejecting message for redelivery"
        );
        if let Err(e) = msg.ack_with(jetstream::AckKind::Nak(None)).await {
            error!(error = %e, message_index = idx, "failed to reject message");
        }
    }

    info!(ack_count, nak_count, "batch settled");
}
