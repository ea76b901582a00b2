//! OpenTelemetry integration for distributed tracing
//!
//! Spans recorded through `tracing` are exported over OTLP when telemetry is
//! enabled. Otherwise only the regular log output is installed.

use crate::config::{LoggingSettings, TelemetrySettings};
use opentelemetry::{KeyValue, trace::TracerProvider as _};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource, runtime,
    trace::{RandomIdGenerator, Sampler, TracerProvider},
};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// OpenTelemetry tracer guard
///
/// When dropped, flushes all pending spans and shuts down the provider
pub struct TelemetryGuard {
    provider: TracerProvider,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Err(e) = self.provider.shutdown() {
            eprintln!("Failed to shut down tracer provider: {}", e);
        }
    }
}

/// Build a tracer provider exporting to `otlp_endpoint`
///
/// `protocol` selects the gRPC (`grpc`) or HTTP (`http`) exporter.
pub fn init_telemetry(
    service_name: &str,
    otlp_endpoint: &str,
    protocol: &str,
) -> anyhow::Result<TelemetryGuard> {
    let exporter = match protocol {
        "http" => opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .with_endpoint(otlp_endpoint)
            .build()?,
        "grpc" => opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(otlp_endpoint)
            .build()?,
        other => anyhow::bail!("unsupported OTLP protocol '{}'", other),
    };

    let resource = Resource::new(vec![
        KeyValue::new("service.name", service_name.to_string()),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION").to_string()),
    ]);

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(Sampler::AlwaysOn)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(resource),
        )
        .build();

    Ok(TelemetryGuard { provider })
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install the global subscriber, with an OpenTelemetry layer when enabled
pub fn setup_tracing(
    telemetry: &TelemetrySettings,
    logging: &LoggingSettings,
) -> anyhow::Result<Option<TelemetryGuard>> {
    let level = logging.level.as_deref().unwrap_or("info");
    let json = logging.format.as_deref() == Some("json");

    if !telemetry.enabled {
        if json {
            common::logging::init_json(level);
        } else {
            common::logging::init(level);
        }
        tracing::info!("Tracing initialized without OpenTelemetry");
        return Ok(None);
    }

    let guard = init_telemetry(
        &telemetry.service_name,
        &telemetry.otlp_endpoint,
        &telemetry.protocol,
    )?;
    let tracer = guard.provider.tracer("uptime-server");

    if json {
        tracing_subscriber::registry()
            .with(env_filter(level))
            .with(tracing_subscriber::fmt::layer().json())
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter(level))
            .with(tracing_subscriber::fmt::layer())
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .try_init()?;
    }

    tracing::info!(
        service_name = %telemetry.service_name,
        otlp_endpoint = %telemetry.otlp_endpoint,
        protocol = %telemetry.protocol,
        "Tracing initialized with OpenTelemetry integration"
    );
    Ok(Some(guard))
}
