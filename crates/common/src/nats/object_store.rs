use crate::domain::{EtlError, EtlResult, ObjectStoreClient};
use anyhow::{Context, Result};
use async_nats::jetstream;
use async_nats::jetstream::object_store::GetErrorKind;
use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

/// How a store failure should be reported, judged from the client's error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreFailure {
    Missing,
    PermissionDenied,
    TimedOut,
    Transient,
}

fn classify_store_failure(error_text: &str) -> StoreFailure {
    let text = error_text.to_ascii_lowercase();
    if text.contains("permission") || text.contains("authorization") {
        StoreFailure::PermissionDenied
    } else if text.contains("not found") {
        StoreFailure::Missing
    } else if text.contains("timed out") || text.contains("timeout") {
        StoreFailure::TimedOut
    } else {
        StoreFailure::Transient
    }
}

/// ObjectStoreClient backed by JetStream object store buckets
///
/// A container is a bucket and a key is an object name. Buckets are resolved
/// on every call; content is never cached.
pub struct NatsObjectStoreClient {
    jetstream: jetstream::Context,
}

impl NatsObjectStoreClient {
    pub fn new(jetstream: jetstream::Context) -> Self {
        Self { jetstream }
    }

    /// Create `bucket` if it does not exist yet. Used at startup for the
    /// destination container; source containers are never created.
    pub async fn ensure_bucket(&self, bucket: &str) -> Result<()> {
        if self.jetstream.get_object_store(bucket).await.is_ok() {
            debug!(bucket = %bucket, "object store bucket already exists");
            return Ok(());
        }

        self.jetstream
            .create_object_store(jetstream::object_store::Config {
                bucket: bucket.to_string(),
                ..Default::default()
            })
            .await
            .with_context(|| format!("failed to create object store bucket {bucket}"))?;
        info!(bucket = %bucket, "created object store bucket");

        Ok(())
    }

    async fn open_bucket(
        &self,
        container: &str,
        key: &str,
        missing: impl FnOnce() -> EtlError,
    ) -> EtlResult<jetstream::object_store::ObjectStore> {
        self.jetstream
            .get_object_store(container)
            .await
            .map_err(|err| {
                let text = err.to_string();
                match classify_store_failure(&text) {
                    StoreFailure::Missing => missing(),
                    StoreFailure::PermissionDenied => {
                        EtlError::AccessDenied(format!("bucket {container} ({key}): {text}"))
                    }
                    StoreFailure::TimedOut | StoreFailure::Transient => {
                        EtlError::TransientStoreError(format!(
                            "failed to open bucket {container}: {text}"
                        ))
                    }
                }
            })
    }
}

#[async_trait]
impl ObjectStoreClient for NatsObjectStoreClient {
    async fn read(&self, container: &str, key: &str) -> EtlResult<String> {
        let not_found = || EtlError::ObjectNotFound {
            container: container.to_string(),
            key: key.to_string(),
        };

        let store = self.open_bucket(container, key, not_found).await?;

        let mut object = store.get(key).await.map_err(|err| {
            if err.kind() == GetErrorKind::NotFound {
                return not_found();
            }
            let text = err.to_string();
            match classify_store_failure(&text) {
                StoreFailure::Missing => not_found(),
                StoreFailure::PermissionDenied => {
                    EtlError::AccessDenied(format!("read {container}/{key}: {text}"))
                }
                StoreFailure::TimedOut | StoreFailure::Transient => {
                    EtlError::TransientStoreError(format!("read {container}/{key}: {text}"))
                }
            }
        })?;

        let mut buf = Vec::new();
        object.read_to_end(&mut buf).await.map_err(|err| {
            EtlError::TransientStoreError(format!("read body {container}/{key}: {err}"))
        })?;

        debug!(container = %container, key = %key, bytes = buf.len(), "read object");

        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    async fn write(&self, container: &str, key: &str, text: &str) -> EtlResult<()> {
        let store = self
            .open_bucket(container, key, || {
                EtlError::WriteFailure(format!("destination bucket {container} does not exist"))
            })
            .await?;

        let mut reader = text.as_bytes();
        store.put(key, &mut reader).await.map_err(|err| {
            let detail = err.to_string();
            match classify_store_failure(&detail) {
                StoreFailure::PermissionDenied => {
                    EtlError::AccessDenied(format!("write {container}/{key}: {detail}"))
                }
                StoreFailure::TimedOut => {
                    EtlError::TransientStoreError(format!("write {container}/{key}: {detail}"))
                }
                StoreFailure::Missing | StoreFailure::Transient => {
                    EtlError::WriteFailure(format!("write {container}/{key}: {detail}"))
                }
            }
        })?;

        debug!(container = %container, key = %key, bytes = text.len(), "wrote object");

        Ok(())
    }
}
