use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use super::types::{PublishRequest, PublishResponse};
use crate::nats::trace_context::inject_trace_context;
use tower::{Layer, Service};
use tracing::{field, info_span, Instrument, Span};

#[derive(Clone, Debug, Default)]
pub struct NatsTracingConfig {
    /// Reported as `service.name` on publish spans
    pub service_name: String,
}

impl NatsTracingConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }
}

/// Tower layer that wraps each publish in a messaging span and propagates
/// its trace context through the message headers
#[derive(Clone)]
pub struct NatsPublishTracingLayer {
    config: NatsTracingConfig,
}

impl NatsPublishTracingLayer {
    pub fn new(config: NatsTracingConfig) -> Self {
        Self { config }
    }
}

impl<S> Layer<S> for NatsPublishTracingLayer {
    type Service = NatsPublishTracingService<S>;

    fn layer(&self, service: S) -> Self::Service {
        NatsPublishTracingService {
            inner: service,
            config: self.config.clone(),
        }
    }
}

#[derive(Clone)]
pub struct NatsPublishTracingService<S> {
    inner: S,
    config: NatsTracingConfig,
}

impl<S> Service<PublishRequest> for NatsPublishTracingService<S>
where
    S: Service<PublishRequest, Response = PublishResponse> + Clone + Send + 'static,
    S::Error: std::fmt::Display + Send,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: PublishRequest) -> Self::Future {
        let span = info_span!(
            target: "nats",
            "nats_publish",
            otel.name = "nats_publish",
            messaging.system = "nats",
            messaging.operation = "publish",
            messaging.destination.name = %req.subject,
            messaging.message.body.size = req.payload.len(),
            service.name = %self.config.service_name,
            otel.status_code = field::Empty,
        );

        // Headers must carry the publish span, not the caller's
        span.in_scope(|| inject_trace_context(&mut req.headers));

        let mut inner = self.inner.clone();

        Box::pin(
            async move {
                let result = inner.call(req).await;
                let status = if result.is_ok() { "OK" } else { "ERROR" };
                Span::current().record("otel.status_code", status);
                result
            }
            .instrument(span),
        )
    }
}
