use async_nats::HeaderMap;
use bytes::Bytes;

/// Request to publish a message to NATS
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub subject: String,
    pub payload: Bytes,
    /// Trace context is injected here by the tracing layer
    pub headers: HeaderMap,
}

impl PublishRequest {
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            payload: payload.into(),
            headers: HeaderMap::new(),
        }
    }
}

#[derive(Debug)]
pub struct PublishResponse {
    pub subject: String,
}
