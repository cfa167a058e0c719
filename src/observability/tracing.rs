//! OpenTelemetry trace export.
//!
//! # Responsibilities
//! - Build an OTLP span exporter from configuration
//! - Bridge `tracing` spans into it through a subscriber layer
//! - Flush pending spans at exit
//!
//! # Design Decisions
//! - Disabled by default; a disabled exporter contributes no layer
//! - Spans go out over OTLP/HTTP on the SDK's own batch thread
//! - `debug` widens the exported spans from info to debug level

use std::sync::OnceLock;
use std::time::Duration;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::Resource;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::OtelConfig;

/// Export timeout for a single batch.
const EXPORT_TIMEOUT: Duration = Duration::from_secs(10);

static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

/// Error type for trace export setup.
#[derive(Debug, thiserror::Error)]
pub enum OtelError {
    #[error("failed to build OTLP span exporter: {0}")]
    Exporter(String),
    #[error("tracer provider already initialized")]
    AlreadyInitialized,
}

/// Subscriber layer exporting spans, or `None` when export is disabled.
pub type OtelLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Build the exporting layer described by `config`.
pub fn otel_layer(config: &OtelConfig) -> Result<Option<OtelLayer>, OtelError> {
    if !config.enabled {
        return Ok(None);
    }
    if TRACER_PROVIDER.get().is_some() {
        return Err(OtelError::AlreadyInitialized);
    }

    let exporter = SpanExporter::builder()
        .with_http()
        .with_endpoint(config.endpoint.as_str())
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .map_err(|e| OtelError::Exporter(e.to_string()))?;

    let resource = Resource::builder_empty()
        .with_attributes([
            KeyValue::new("service.name", config.service_name.clone()),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        ])
        .build();

    let provider = SdkTracerProvider::builder()
        .with_resource(resource)
        .with_batch_exporter(exporter)
        .build();
    let tracer = provider.tracer(config.service_name.clone());

    if TRACER_PROVIDER.set(provider.clone()).is_err() {
        return Err(OtelError::AlreadyInitialized);
    }
    global::set_tracer_provider(provider);

    tracing::info!(
        endpoint = %config.endpoint,
        service_name = %config.service_name,
        debug = config.debug,
        "OTLP trace export enabled"
    );

    let layer = tracing_opentelemetry::layer()
        .with_tracer(tracer)
        .with_filter(EnvFilter::new(export_directive(config.debug)))
        .boxed();
    Ok(Some(layer))
}

/// Flush pending spans and stop the exporter. No-op when export is disabled.
pub fn shutdown_tracing() {
    let Some(provider) = TRACER_PROVIDER.get() else {
        return;
    };
    if let Err(e) = provider.force_flush() {
        tracing::warn!(error = %e, "Failed to flush spans");
    }
    if let Err(e) = provider.shutdown() {
        tracing::warn!(error = %e, "Failed to shut down tracer provider");
    }
}

fn export_directive(debug: bool) -> String {
    let level = if debug { "debug" } else { "info" };
    format!("cluster_agent={level},tower_http={level},warn")
}
