use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use super::types::{PublishRequest, PublishResponse};
use super::{NatsPublishLoggingLayer, NatsPublishLoggingService};
use super::{NatsPublishTracingLayer, NatsPublishTracingService, NatsTracingConfig};
use crate::nats::JetStreamPublisher;
use anyhow::Result;
use tower::{Service, ServiceBuilder};

/// Innermost service: hands the request to JetStream and waits for the ack
#[derive(Clone)]
pub struct NatsPublishService {
    publisher: Arc<dyn JetStreamPublisher>,
}

impl NatsPublishService {
    pub fn new(publisher: Arc<dyn JetStreamPublisher>) -> Self {
        Self { publisher }
    }
}

impl Service<PublishRequest> for NatsPublishService {
    type Response = PublishResponse;
    type Error = anyhow::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: PublishRequest) -> Self::Future {
        let publisher = Arc::clone(&self.publisher);

        Box::pin(async move {
            publisher
                .publish_with_headers(req.subject.clone(), req.headers, req.payload)
                .await?;
            Ok(PublishResponse {
                subject: req.subject,
            })
        })
    }
}

/// Publish stack, outermost first: tracing -> logging -> JetStream publish
pub type LayeredPublisher =
    NatsPublishTracingService<NatsPublishLoggingService<NatsPublishService>>;

pub fn layered_publisher(
    publisher: Arc<dyn JetStreamPublisher>,
    tracing_config: NatsTracingConfig,
) -> LayeredPublisher {
    ServiceBuilder::new()
        .layer(NatsPublishTracingLayer::new(tracing_config))
        .layer(NatsPublishLoggingLayer::new())
        .service(NatsPublishService::new(publisher))
}
