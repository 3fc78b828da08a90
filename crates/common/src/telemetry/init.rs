use anyhow::{Context, Result};
use opentelemetry::{trace::TracerProvider, KeyValue};
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{LogExporter, SpanExporter, WithExportConfig};
use opentelemetry_sdk::{
    logs::LoggerProvider,
    propagation::TraceContextPropagator,
    runtime,
    trace::{RandomIdGenerator, Sampler, TracerProvider as SdkTracerProvider},
    Resource,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::{TelemetryConfig, TelemetryProviders};

/// Install the global tracing subscriber.
///
/// Always logs JSON to stdout, filtered by `RUST_LOG` or else `log_level`.
/// With OTEL enabled, spans and log events are also exported over OTLP/gRPC
/// and the W3C trace context propagator is installed so published
/// notifications carry `traceparent` headers.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<Option<TelemetryProviders>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if !config.otel_enabled {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_span_list(true)
            .with_current_span(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .context("failed to install tracing subscriber")?;
        return Ok(None);
    }

    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

    let resource = Resource::new(vec![KeyValue::new(
        opentelemetry_semantic_conventions::resource::SERVICE_NAME,
        config.service_name.clone(),
    )]);

    let span_exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otel_endpoint)
        .build()
        .context("failed to build OTLP span exporter")?;

    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(span_exporter, runtime::Tokio)
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource.clone())
        .build();

    let log_exporter = LogExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otel_endpoint)
        .build()
        .context("failed to build OTLP log exporter")?;

    let logger_provider = LoggerProvider::builder()
        .with_batch_exporter(log_exporter, runtime::Tokio)
        .with_resource(resource)
        .build();

    let tracer = tracer_provider.tracer(config.service_name.clone());
    let otel_trace_layer = tracing_opentelemetry::layer().with_tracer(tracer);
    let otel_log_layer = OpenTelemetryTracingBridge::new(&logger_provider);

    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_span_list(true)
        .with_current_span(true);

    // The trace layer must come before the log bridge so log records see the OTel span
    tracing_subscriber::registry()
        .with(env_filter)
        .with(otel_trace_layer)
        .with(otel_log_layer)
        .with(fmt_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(Some(TelemetryProviders {
        tracer_provider,
        logger_provider,
    }))
}

/// Flush and shut down exporters. Errors go to stderr since the subscriber
/// may already be unusable at this point.
pub fn shutdown_telemetry(providers: Option<TelemetryProviders>) {
    let Some(providers) = providers else {
        return;
    };

    if let Err(e) = providers.tracer_provider.shutdown() {
        eprintln!("error shutting down tracer provider: {e:?}");
    }
    if let Err(e) = providers.logger_provider.shutdown() {
        eprintln!("error shutting down logger provider: {e:?}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_disables_otel() {
        let config = TelemetryConfig::default();

        assert_eq!(config.service_name, "review-etl");
        assert_eq!(config.log_level, "info");
        assert!(!config.otel_enabled);
    }

    #[test]
    fn test_shutdown_without_providers_is_noop() {
        shutdown_telemetry(None);
    }

    // Only test in this binary that installs the global subscriber
    #[tokio::test(flavor = "multi_thread")]
    async fn test_init_with_otel_enabled_returns_providers() {
        let config = TelemetryConfig {
            service_name: "review-etl-test".to_string(),
            otel_endpoint: "http://localhost:4317".to_string(),
            otel_enabled: true,
            log_level: "debug".to_string(),
        };

        let providers = init_telemetry(&config).unwrap();
        assert!(providers.is_some());

        tracing::info!("exported through the otel layers");
        shutdown_telemetry(providers);
    }
}
