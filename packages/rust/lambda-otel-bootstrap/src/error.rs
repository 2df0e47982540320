use thiserror::Error;

/// Errors raised while bootstrapping telemetry.
///
/// Span export failures never surface here: once the provider is installed,
/// exporting is best-effort and failures are only logged.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to build OTLP span exporter: {0}")]
    Exporter(#[from] opentelemetry_otlp::ExporterBuildError),

    #[error("failed to build HTTP client for the OTLP exporter: {0}")]
    HttpClient(String),

    #[error("unknown propagator `{0}` (expected tracecontext, xray, xray-lambda or none)")]
    UnknownPropagator(String),

    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}
