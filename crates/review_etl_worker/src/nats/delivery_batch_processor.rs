use crate::domain::{BatchReport, DeliveryEnvelope, ItemOutcome, ReviewEtlService};
use common::nats::{BatchProcessor, DeliveredMessage, ProcessingResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// How a batch's outcomes map onto delivery settlement
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedeliveryPolicy {
    /// Any failed item returns the whole batch for redelivery, including
    /// items that already completed
    #[default]
    WholeBatch,
    /// Only failed items are returned for redelivery
    PerItem,
}

/// Decide which deliveries to ack and which to nak.
///
/// Under `PerItem` only failures whose error is retryable are redelivered;
/// skipped items are acked. Under `WholeBatch` every item shares the batch's
/// fate.
pub fn settle_batch(report: &BatchReport, policy: RedeliveryPolicy) -> ProcessingResult {
    match policy {
        RedeliveryPolicy::WholeBatch => match report.first_failure() {
            None => ProcessingResult::ack_all(report.len()),
            Some(e) => ProcessingResult::nak_all(report.len(), Some(e.to_string())),
        },
        RedeliveryPolicy::PerItem => {
            let mut ack = Vec::new();
            let mut nak = Vec::new();
            for (idx, outcome) in report.outcomes.iter().enumerate() {
                match outcome {
                    ItemOutcome::Failed { error, .. } if error.is_retryable() => {
                        nak.push((idx, Some(error.to_string())))
                    }
                    ItemOutcome::Failed { error, source_key, .. } => {
                        warn!(
                            source_key = %source_key,
                            error = %error,
                            "dropping non-retryable item"
                        );
                        ack.push(idx)
                    }
                    ItemOutcome::Completed { .. } | ItemOutcome::Skipped { .. } => ack.push(idx),
                }
            }
            ProcessingResult::new(ack, nak)
        }
    }
}

fn delivery_envelope(message: DeliveredMessage) -> DeliveryEnvelope {
    DeliveryEnvelope {
        message_id: message.delivery_id(),
        body: message.payload,
        headers: message.headers,
    }
}

/// Create a BatchProcessor that runs delivered storage events through the ETL service
pub fn create_delivery_batch_processor(
    service: Arc<ReviewEtlService>,
    policy: RedeliveryPolicy,
) -> BatchProcessor {
    Box::new(move |messages: Vec<DeliveredMessage>, ctx: CancellationToken| {
        let service = Arc::clone(&service);

        let envelopes: Vec<DeliveryEnvelope> =
            messages.into_iter().map(delivery_envelope).collect();

        Box::pin(async move {
            let report = service.process_batch(envelopes, &ctx).await;
            let settlement = settle_batch(&report, policy);

            match report.into_result() {
                Ok(report) => debug!(items = report.len(), "batch completed"),
                Err(e) => error!(
                    error = %e,
                    policy = ?policy,
                    redelivered = settlement.nak.len(),
                    "batch finished with failures"
                ),
            }

            Ok(settlement)
        })
    })
}
