use crate::domain::result::EtlResult;
use async_trait::async_trait;

/// Text-oriented access to a blob store
///
/// Implementations should:
/// - Hit the backing store on every call (no caching)
/// - Map a missing container or key on read to `EtlError::ObjectNotFound`
/// - Map authorization failures to `EtlError::AccessDenied`
/// - Map connectivity or throttling failures to `EtlError::TransientStoreError`
///   on read and `EtlError::WriteFailure` on write
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    /// Fetch the full content of `key` in `container` as UTF-8 text
    async fn read(&self, container: &str, key: &str) -> EtlResult<String>;

    /// Create or overwrite `key` in `container` with `text`
    async fn write(&self, container: &str, key: &str, text: &str) -> EtlResult<()>;
}
