use crate::domain::result::EtlResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Human-readable notification describing a completed item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeNotification {
    pub subject: String,
    pub message: String,
}

/// Trait for broadcasting outcome notifications
///
/// `publish` returns once the broker has accepted the message, not once
/// subscribers have received it. Submission failures surface as
/// `EtlError::TransientBrokerError`.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, topic: &str, subject: &str, message: &str) -> EtlResult<()>;
}
