mod config;

use common::nats::{NatsClient, NatsObjectStoreClient};
use common::telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig, TelemetryProviders};
use config::ServiceConfig;
use etl_runner::Runner;
use review_etl_worker::{ReviewEtlSettings, ReviewEtlWorker};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() {
    // Load and validate configuration before touching any infrastructure
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize telemetry (tracing + OpenTelemetry for traces and logs)
    let telemetry_providers: Option<TelemetryProviders> = match init_telemetry(&TelemetryConfig {
        service_name: config.otel_service_name.clone(),
        otel_endpoint: config.otel_endpoint.clone(),
        otel_enabled: config.otel_enabled,
        log_level: config.log_level.clone(),
    }) {
        Ok(providers) => providers,
        Err(e) => {
            eprintln!("Failed to initialize telemetry: {}", e);
            std::process::exit(1);
        }
    };

    let settings = match config.etl_settings() {
        Ok(settings) => settings,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            shutdown_telemetry(telemetry_providers);
            std::process::exit(1);
        }
    };

    info!(
        otel_enabled = config.otel_enabled,
        processed_container = %settings.processed_container,
        processed_topic = %settings.processed_topic,
        "Starting review-etl service"
    );
    debug!("Configuration: {:?}", config);

    let startup_timeout = Duration::from_secs(config.startup_timeout_secs);
    let (nats_client, object_store) =
        match tokio::time::timeout(startup_timeout, initialize_nats(&config, &settings)).await {
            Ok(Ok(deps)) => deps,
            Ok(Err(e)) => {
                error!("Failed to initialize NATS: {:#}", e);
                shutdown_telemetry(telemetry_providers);
                std::process::exit(1);
            }
            Err(_) => {
                error!(
                    timeout_secs = config.startup_timeout_secs,
                    "Timed out initializing NATS"
                );
                shutdown_telemetry(telemetry_providers);
                std::process::exit(1);
            }
        };

    let worker = match ReviewEtlWorker::new(
        object_store,
        nats_client.create_consumer_client(),
        nats_client.create_publisher_client(),
        settings,
        config.worker_config(),
    )
    .await
    {
        Ok(worker) => worker,
        Err(e) => {
            error!("Failed to initialize review ETL worker: {:#}", e);
            shutdown_telemetry(telemetry_providers);
            std::process::exit(1);
        }
    };

    let mut runner = Runner::new();
    for process in worker.into_runner_processes() {
        runner = runner.with_boxed_app_process(process);
    }

    let result = runner
        .with_closer(move || async move {
            info!("Running cleanup tasks...");
            nats_client.close().await?;

            // Flush pending traces and logs
            shutdown_telemetry(telemetry_providers);
            Ok(())
        })
        .with_closer_timeout(Duration::from_secs(10))
        .run()
        .await;

    if let Err(e) = result {
        eprintln!("review-etl stopped with error: {:#}", e);
        std::process::exit(1);
    }
}

/// Connect to NATS and make sure every stream and bucket the worker touches exists.
async fn initialize_nats(
    config: &ServiceConfig,
    settings: &ReviewEtlSettings,
) -> anyhow::Result<(NatsClient, Arc<NatsObjectStoreClient>)> {
    info!("Initializing NATS...");
    let startup_timeout = Duration::from_secs(config.startup_timeout_secs);
    let nats_client = NatsClient::connect(&config.nats_url, startup_timeout).await?;

    nats_client
        .ensure_stream(&config.nats_raw_stream, vec![config.nats_raw_subject.clone()])
        .await?;
    nats_client
        .ensure_stream(
            &config.nats_notification_stream,
            vec![settings.processed_topic.clone()],
        )
        .await?;

    let object_store = Arc::new(NatsObjectStoreClient::new(nats_client.jetstream().clone()));
    object_store
        .ensure_bucket(&settings.processed_container)
        .await?;

    Ok((nats_client, object_store))
}
