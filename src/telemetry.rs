//! Logging and OpenTelemetry setup.

use crate::config::TelemetryConfig;
use crate::propagation::{NoopPropagator, OtelPropagator, TracePropagator};
use opentelemetry::global;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::Resource;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Error type for telemetry initialization
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Failed to install the log subscriber
    #[error("Failed to initialize logging: {0}")]
    Init(String),

    /// Failed to create the OTLP exporter
    #[error("Failed to create OTLP exporter: {0}")]
    Exporter(String),
}

/// Parse a log level name; unknown names fall back to info.
pub fn parse_level(level: &str) -> Level {
    level.trim().parse().unwrap_or(Level::INFO)
}

/// Install the global fmt subscriber.
pub fn init_logging(level: Level) -> Result<(), TelemetryError> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| TelemetryError::Init(e.to_string()))
}

/// Flushes and shuts down the tracer provider when dropped.
pub struct TelemetryGuard {
    provider: Option<SdkTracerProvider>,
}

impl TelemetryGuard {
    pub fn is_exporting(&self) -> bool {
        self.provider.is_some()
    }
}

impl std::fmt::Debug for TelemetryGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryGuard")
            .field("active", &self.provider.is_some())
            .finish_non_exhaustive()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take() {
            if let Err(e) = provider.shutdown() {
                tracing::error!("Failed to shutdown tracer provider: {:?}", e);
            }
        }
    }
}

/// Set up span export and return the propagator the dispatcher should use.
///
/// With tracing disabled this returns a no-op propagator and an inert guard.
pub fn init_tracing(
    config: &TelemetryConfig,
    service_name: &str,
) -> Result<(TelemetryGuard, Arc<dyn TracePropagator>), TelemetryError> {
    if !config.enabled {
        info!("Tracing disabled");
        return Ok((TelemetryGuard { provider: None }, Arc::new(NoopPropagator)));
    }

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(config.endpoint.clone())
        .build()
        .map_err(|e| TelemetryError::Exporter(e.to_string()))?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(
            Resource::builder()
                .with_service_name(service_name.to_string())
                .build(),
        )
        .build();
    global::set_tracer_provider(provider.clone());

    let tracer_name = config
        .tracer_name
        .clone()
        .unwrap_or_else(|| service_name.to_string());
    let propagator = OtelPropagator::new(global::tracer(tracer_name));

    info!(
        endpoint = %config.endpoint,
        service = %service_name,
        "Tracing initialized with OTLP export"
    );

    Ok((
        TelemetryGuard {
            provider: Some(provider),
        },
        Arc::new(propagator),
    ))
}
