use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{trace::Config, Resource};
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter, Registry};

pub type TelemetryError = Box<dyn std::error::Error>;

/// Installs the global tracing subscriber.
///
/// Always logs to stdout, filtered by `RUST_LOG`. If `OTLP_ENDPOINT` is set, spans
/// are additionally exported over OTLP/gRPC.
pub fn setup_telemetry(service_name: &str) -> Result<(), TelemetryError> {
    if let Ok(otlp_endpoint) = std::env::var("OTLP_ENDPOINT") {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(
                opentelemetry_otlp::new_exporter()
                    .tonic()
                    .with_endpoint(otlp_endpoint),
            )
            .with_trace_config(Config::default().with_resource(Resource::new(vec![
                KeyValue::new("service.name".to_string(), service_name.to_string()),
                KeyValue::new(
                    "deployment.environment",
                    std::env::var("ENV").unwrap_or("development".into()),
                ),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)?;

        Registry::default()
            .with(EnvFilter::from_default_env())
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .with(tracing_subscriber::fmt::layer())
            .try_init()?;

        info!("Setup tracing with OTLP");
    } else {
        Registry::default()
            .with(EnvFilter::from_default_env())
            .with(tracing_subscriber::fmt::layer())
            .try_init()?;

        info!("Setup tracing without OTLP");
    }

    info!("Successfully setup telemetry for {}", service_name);

    Ok(())
}

pub fn teardown_telemetry() {
    opentelemetry::global::shutdown_tracer_provider();
}
