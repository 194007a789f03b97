//! Log and span setup for the registry binary.
//!
//! Spans from the `tracing` macros are exported over OTLP when telemetry is
//! enabled. Without it, logging is set up through [`common::logging`].

use opentelemetry::{KeyValue, trace::TracerProvider as _};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource, runtime,
    trace::{RandomIdGenerator, Sampler, TracerProvider},
};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Keeps the OTLP exporter alive; dropping it flushes buffered spans.
pub struct TelemetryGuard;

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        opentelemetry::global::shutdown_tracer_provider();
    }
}

/// Logging and tracing options
#[derive(Debug, Clone)]
pub struct TracingOptions {
    pub service_name: String,
    pub otlp_endpoint: String,
    pub telemetry_enabled: bool,
    pub log_level: String,
    pub json: bool,
}

impl Default for TracingOptions {
    fn default() -> Self {
        Self {
            service_name: "server-registry".to_string(),
            otlp_endpoint: "http://localhost:4317".to_string(),
            telemetry_enabled: false,
            log_level: "info".to_string(),
            json: false,
        }
    }
}

/// Build an OTLP (gRPC) tracer provider
///
/// Returns `None` when telemetry is disabled.
pub fn init_tracer_provider(
    service_name: &str,
    otlp_endpoint: &str,
    enabled: bool,
) -> Result<Option<TracerProvider>, Box<dyn std::error::Error>> {
    if !enabled {
        return Ok(None);
    }

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(otlp_endpoint)
        .build()?;

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

    Ok(Some(provider))
}

/// Install the global subscriber, with an OpenTelemetry layer if enabled
///
/// RUST_LOG overrides `log_level`. Must be called once, from inside the
/// runtime.
pub async fn setup_tracing(
    options: &TracingOptions,
) -> Result<Option<TelemetryGuard>, Box<dyn std::error::Error>> {
    let provider = init_tracer_provider(
        &options.service_name,
        &options.otlp_endpoint,
        options.telemetry_enabled,
    )?;

    let Some(provider) = provider else {
        common::logging::init_with(&options.log_level, options.json);
        tracing::info!("Tracing initialized without OpenTelemetry");
        return Ok(None);
    };

    let tracer = provider.tracer("server-registry");
    opentelemetry::global::set_tracer_provider(provider);

    let (plain, json) = if options.json {
        (None, Some(fmt::layer().json()))
    } else {
        (Some(fmt::layer()), None)
    };

    tracing_subscriber::registry()
        .with(common::logging::env_filter(&options.log_level))
        .with(plain)
        .with(json)
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .init();

    tracing::info!(
        service_name = %options.service_name,
        otlp_endpoint = %options.otlp_endpoint,
        "Tracing initialized with OpenTelemetry integration"
    );

    Ok(Some(TelemetryGuard))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_telemetry_disabled() {
        let result = init_tracer_provider("test-service", "http://localhost:4317", false);
        assert!(result.unwrap().is_none());
    }

    #[test]
    fn test_default_options() {
        let options = TracingOptions::default();
        assert!(!options.telemetry_enabled);
        assert_eq!(options.log_level, "info");
    }
}
