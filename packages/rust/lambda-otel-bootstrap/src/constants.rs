//! Constants for the lambda-otel-bootstrap package.
//!
//! Environment variable names, defaults and attribute keys live here so the
//! bootstrap, the layer and the SDK interceptor agree on them.

/// Environment variable names for configuration.
pub mod env_vars {
    /// Service name for telemetry.
    pub const SERVICE_NAME: &str = "OTEL_SERVICE_NAME";

    /// Resource attributes in KEY=VALUE,KEY2=VALUE2 format.
    pub const RESOURCE_ATTRIBUTES: &str = "OTEL_RESOURCE_ATTRIBUTES";

    /// Base URL of the OTLP collector. `/v1/traces` is appended.
    pub const OTLP_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

    /// Full URL of the OTLP traces endpoint, used as is.
    pub const OTLP_TRACES_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_TRACES_ENDPOINT";

    /// Export timeout in milliseconds.
    pub const OTLP_TIMEOUT: &str = "OTEL_EXPORTER_OTLP_TIMEOUT";

    /// Comma-separated list of context propagators to use.
    /// Valid values: tracecontext, xray, xray-lambda, none
    pub const PROPAGATORS: &str = "OTEL_PROPAGATORS";

    /// AWS Lambda function name (used as fallback service name).
    pub const AWS_LAMBDA_FUNCTION_NAME: &str = "AWS_LAMBDA_FUNCTION_NAME";

    /// Trace header Lambda sets for the current invocation when active tracing is on.
    pub const AWS_XRAY_TRACE_ID: &str = "_X_AMZN_TRACE_ID";

    /// Controls whether to enable the fmt layer for logging regardless of code settings.
    /// Set to "true" to force enable logging output.
    pub const ENABLE_FMT_LAYER: &str = "LAMBDA_TRACING_ENABLE_FMT_LAYER";

    /// Lambda log format, `JSON` switches the fmt layer to JSON lines.
    pub const LOG_FORMAT: &str = "AWS_LAMBDA_LOG_FORMAT";
}

/// Default values for configuration parameters.
pub mod defaults {
    use std::time::Duration;

    /// Default service name if not provided.
    pub const SERVICE_NAME: &str = "unknown_service";

    /// Collector base URL when nothing is configured.
    pub const OTLP_ENDPOINT: &str = "http://localhost:4318";

    /// Path appended to a base OTLP endpoint for trace export.
    pub const TRACES_PATH: &str = "/v1/traces";

    /// Default export timeout.
    pub const EXPORT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Default propagator list.
    pub const PROPAGATORS: &str = "xray-lambda";

    /// Default value for enabling fmt layer from environment.
    pub const ENABLE_FMT_LAYER: bool = false;
}

/// Header name used by the X-Ray propagation format.
pub const AWS_XRAY_TRACE_HEADER: &str = "x-amzn-trace-id";

/// Instrumentation scope attributes.
pub mod scope {
    /// Schema URL of the semantic conventions in use.
    pub const SCHEMA_URL: &str = "https://opentelemetry.io/schemas/1.30.0";
}
