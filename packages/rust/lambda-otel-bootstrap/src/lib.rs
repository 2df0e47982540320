//! OpenTelemetry bootstrap for Rust AWS Lambda functions.
//!
//! Everything a function needs to emit X-Ray compatible traces to an OTLP
//! collector, set up with one call before the runtime starts:
//!
//! - [`init_telemetry`]: installs the propagator, the tracer provider (X-Ray
//!   trace ids, Lambda resource, OTLP/HTTP export) and the `tracing` subscriber
//! - [`OtelTracingLayer`]: Tower layer giving every invocation a SERVER span
//!   parented on the incoming X-Ray header, flushed before the response returns
//! - [`AwsSdkTracingInterceptor`]: smithy interceptor adding CLIENT spans to
//!   AWS SDK calls and forwarding the trace context downstream
//!
//! # Configuration
//!
//! - `OTEL_EXPORTER_OTLP_TRACES_ENDPOINT` / `OTEL_EXPORTER_OTLP_ENDPOINT`:
//!   collector address, defaults to `http://localhost:4318`
//! - `OTEL_SERVICE_NAME`: falls back to `AWS_LAMBDA_FUNCTION_NAME`
//! - `OTEL_PROPAGATORS`: comma separated, `xray-lambda` by default
//! - `OTEL_RESOURCE_ATTRIBUTES`: extra resource attributes
//! - `LAMBDA_TRACING_ENABLE_FMT_LAYER`: also log to stdout
//!
//! # Example
//!
//! ```no_run
//! use lambda_otel_bootstrap::{init_telemetry, OtelTracingLayer, TelemetryConfig};
//! use lambda_runtime::{Error, LambdaEvent};
//! use serde_json::Value;
//! use tower::ServiceBuilder;
//!
//! async fn handler(event: LambdaEvent<Value>) -> Result<Value, Error> {
//!     Ok(event.payload)
//! }
//!
//! # async fn run() -> Result<(), Error> {
//! let telemetry = init_telemetry(TelemetryConfig::default())?;
//!
//! let service = ServiceBuilder::new()
//!     .layer(OtelTracingLayer::new(telemetry))
//!     .service_fn(handler);
//!
//! lambda_runtime::run(service).await
//! # }
//! ```

mod aws_sdk;
pub mod constants;
mod error;
mod exporter;
mod layer;
pub mod propagation;
mod resource;
mod telemetry;

pub use aws_sdk::AwsSdkTracingInterceptor;
pub use error::TelemetryError;
pub use layer::{CompletionFuture, OtelTracingLayer, OtelTracingService};
pub use propagation::LambdaXrayPropagator;
pub use resource::{get_lambda_resource, resolve_service_name};
pub use telemetry::{init_telemetry, TelemetryConfig, TelemetryConfigBuilder, TelemetryHandle};
