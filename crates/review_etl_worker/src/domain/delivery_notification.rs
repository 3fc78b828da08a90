use async_nats::HeaderMap;
use bytes::Bytes;
use common::domain::{EtlError, EtlResult};
use serde::Deserialize;
use tracing::debug;

/// One delivered message as handed to the batch processor
#[derive(Debug, Clone)]
pub struct DeliveryEnvelope {
    /// Identifies the delivery in logs (the message subject for NATS)
    pub message_id: String,
    /// JSON-encoded storage event
    pub body: Bytes,
    /// Transport headers, used to continue the uploader's trace
    pub headers: Option<HeaderMap>,
}

impl DeliveryEnvelope {
    pub fn new(message_id: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            message_id: message_id.into(),
            body: body.into(),
            headers: None,
        }
    }
}

/// Source object named by a storage event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryNotification {
    pub source_container: String,
    pub source_key: String,
}

#[derive(Debug, Deserialize)]
struct StorageEvent {
    #[serde(rename = "Records", default)]
    records: Vec<StorageEventRecord>,
}

#[derive(Debug, Deserialize)]
struct StorageEventRecord {
    s3: Option<StorageEntity>,
}

#[derive(Debug, Deserialize)]
struct StorageEntity {
    bucket: Option<BucketEntity>,
    object: Option<ObjectEntity>,
}

#[derive(Debug, Deserialize)]
struct BucketEntity {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectEntity {
    key: Option<String>,
}

impl DeliveryNotification {
    /// Parse a storage event body. Only the first record is consulted.
    ///
    /// Fails with `MalformedNotification` when the body is not JSON, carries no
    /// records (storage test events), or lacks a non-empty bucket name or key.
    pub fn from_event_body(body: &[u8]) -> EtlResult<Self> {
        let event: StorageEvent = serde_json::from_slice(body)
            .map_err(|e| EtlError::MalformedNotification(format!("invalid event JSON: {e}")))?;

        let record_count = event.records.len();
        let first = event
            .records
            .into_iter()
            .next()
            .ok_or_else(|| EtlError::MalformedNotification("event has no records".to_string()))?;

        if record_count > 1 {
            debug!(record_count, "ignoring all but the first event record");
        }

        let entity = first.s3.ok_or_else(|| {
            EtlError::MalformedNotification("record has no storage entity".to_string())
        })?;

        let source_container = entity
            .bucket
            .and_then(|bucket| bucket.name)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                EtlError::MalformedNotification("record has no bucket name".to_string())
            })?;

        let source_key = entity
            .object
            .and_then(|object| object.key)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                EtlError::MalformedNotification("record has no object key".to_string())
            })?;

        Ok(Self {
            source_container,
            source_key,
        })
    }
}
