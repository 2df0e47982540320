//! Tracing bootstrap for Lambda functions.
//!
//! `init_telemetry` is meant to run once per execution environment, before
//! the runtime starts polling for invocations:
//! 1. Configuration is resolved from the builder and the environment
//! 2. A tracer provider is built with the X-Ray ID generator, the Lambda
//!    resource and a `SimpleSpanProcessor` exporting over OTLP/HTTP
//! 3. The `tracing` subscriber is installed with the OpenTelemetry bridge,
//!    filtered at INFO unless `RUST_LOG` or `AWS_LAMBDA_LOG_LEVEL` says otherwise
//! 4. The global propagator (X-Ray by default) and provider are registered
//!
//! Calling it again in the same process returns the handle created by the
//! first call and registers nothing new.
//!
//! # Example
//!
//! ```no_run
//! use lambda_otel_bootstrap::{init_telemetry, TelemetryConfig};
//!
//! # fn example() -> Result<(), lambda_otel_bootstrap::TelemetryError> {
//! let telemetry = init_telemetry(
//!     TelemetryConfig::builder()
//!         .service_name("samplefunc")
//!         .build(),
//! )?;
//! // ... run the Lambda runtime, calling telemetry.complete() after each invocation
//! # Ok(())
//! # }
//! ```

use crate::{
    constants::{defaults, env_vars, scope},
    error::TelemetryError,
    exporter::BlockingSpanExporter,
    propagation::propagators_from_names,
    resource::get_lambda_resource,
};
use bon::Builder;
use opentelemetry::propagation::TextMapCompositePropagator;
use opentelemetry::{global, trace::TracerProvider as _, InstrumentationScope, KeyValue};
use opentelemetry_aws::trace::XrayIdGenerator;
use opentelemetry_otlp::{Protocol, WithExportConfig, WithHttpConfig};
use opentelemetry_sdk::{
    trace::{SdkTracerProvider, SimpleSpanProcessor, SpanProcessor, Tracer, TracerProviderBuilder},
    Resource,
};
use std::{
    borrow::Cow,
    env,
    sync::{Arc, Mutex},
    time::Duration,
};
use tracing_subscriber::{filter::LevelFilter, layer::SubscriberExt};

/// Handle created once per process at bootstrap.
static INSTALLED: Mutex<Option<TelemetryHandle>> = Mutex::new(None);

/// Handle to the installed tracer provider.
///
/// Cheap to clone and safe to share between invocations; nothing in it is
/// mutated after bootstrap.
#[derive(Clone, Debug)]
pub struct TelemetryHandle {
    provider: Arc<SdkTracerProvider>,
    tracer: Tracer,
}

impl TelemetryHandle {
    pub fn new(provider: Arc<SdkTracerProvider>) -> Self {
        let scope = InstrumentationScope::builder(env!("CARGO_PKG_NAME"))
            .with_version(Cow::Borrowed(env!("CARGO_PKG_VERSION")))
            .with_schema_url(Cow::Borrowed(scope::SCHEMA_URL))
            .with_attributes(vec![
                KeyValue::new("library.language", "rust"),
                KeyValue::new("library.runtime", "aws_lambda"),
            ])
            .build();
        let tracer = provider.tracer_with_scope(scope);
        Self { provider, tracer }
    }

    /// The tracer used for spans created by this crate.
    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    pub fn provider(&self) -> &Arc<SdkTracerProvider> {
        &self.provider
    }

    /// Flush pending spans at the end of an invocation.
    ///
    /// Export is best-effort: failures are logged and otherwise ignored.
    pub fn complete(&self) {
        if let Err(e) = self.provider.force_flush() {
            tracing::warn!(error = ?e, "error flushing telemetry");
        }
    }

    /// Shut the provider down. Only useful when the process is about to exit.
    pub fn shutdown(&self) {
        if let Err(e) = self.provider.shutdown() {
            tracing::warn!(error = ?e, "error shutting down tracer provider");
        }
    }
}

/// Configuration for the tracing bootstrap.
///
/// Every unset field is resolved from the environment at `init_telemetry`
/// time, so `TelemetryConfig::default()` is what a deployed function uses.
#[derive(Builder, Debug)]
pub struct TelemetryConfig {
    #[builder(field)]
    provider_builder: TracerProviderBuilder,

    #[builder(field)]
    has_processor: bool,

    /// Value of `service.name`. Falls back to `OTEL_SERVICE_NAME`, then the
    /// function name.
    #[builder(into)]
    pub service_name: Option<String>,

    /// Full OTLP traces URL. Falls back to `OTEL_EXPORTER_OTLP_TRACES_ENDPOINT`,
    /// then `OTEL_EXPORTER_OTLP_ENDPOINT` + `/v1/traces`.
    #[builder(into)]
    pub endpoint: Option<String>,

    /// Comma-separated propagator names. Falls back to `OTEL_PROPAGATORS`,
    /// then `xray-lambda`.
    #[builder(into)]
    pub propagators: Option<String>,

    /// Timeout applied to each export request.
    pub export_timeout: Option<Duration>,

    /// Resource for all spans. Default: detected from the Lambda environment.
    pub resource: Option<Resource>,

    /// Print spans and events to the console as well.
    #[builder(default = false)]
    pub enable_fmt_layer: bool,

    /// Register the provider as the global OpenTelemetry provider.
    #[builder(default = true)]
    pub set_global_provider: bool,

    /// Environment variable holding the log filter. Default: `RUST_LOG` if set,
    /// otherwise `AWS_LAMBDA_LOG_LEVEL`.
    #[builder(into)]
    pub env_var_name: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl<S: telemetry_config_builder::State> TelemetryConfigBuilder<S> {
    /// Replace the default OTLP processor with a custom one.
    ///
    /// Can be called several times; every processor receives every span.
    pub fn with_span_processor<T>(mut self, processor: T) -> Self
    where
        T: SpanProcessor + 'static,
    {
        self.provider_builder = self.provider_builder.with_span_processor(processor);
        self.has_processor = true;
        self
    }
}

impl TelemetryConfig {
    /// The OTLP traces URL this configuration exports to.
    pub fn resolved_endpoint(&self) -> String {
        if let Some(endpoint) = &self.endpoint {
            return endpoint.clone();
        }
        if let Ok(endpoint) = env::var(env_vars::OTLP_TRACES_ENDPOINT) {
            return endpoint;
        }
        let base = env::var(env_vars::OTLP_ENDPOINT)
            .unwrap_or_else(|_| defaults::OTLP_ENDPOINT.to_string());
        format!(
            "{}{}",
            base.trim_end_matches('/'),
            defaults::TRACES_PATH
        )
    }

    fn resolved_timeout(&self) -> Duration {
        self.export_timeout
            .or_else(|| {
                env::var(env_vars::OTLP_TIMEOUT)
                    .ok()
                    .and_then(|ms| ms.parse::<u64>().ok())
                    .map(Duration::from_millis)
            })
            .unwrap_or(defaults::EXPORT_TIMEOUT)
    }

    fn resolved_propagators(&self) -> String {
        self.propagators
            .clone()
            .or_else(|| env::var(env_vars::PROPAGATORS).ok())
            .unwrap_or_else(|| defaults::PROPAGATORS.to_string())
    }

    fn fmt_layer_enabled(&self) -> bool {
        self.enable_fmt_layer
            || env::var(env_vars::ENABLE_FMT_LAYER)
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(defaults::ENABLE_FMT_LAYER)
    }
}

type OtlpProcessor = SimpleSpanProcessor<BlockingSpanExporter<opentelemetry_otlp::SpanExporter>>;

/// Build the OTLP/HTTP span exporter wrapped in a synchronous processor.
///
/// The processor exports each span as it ends, so a blocking HTTP client is
/// used. It is built on its own thread because reqwest's blocking client may
/// not be created from inside an async runtime, and every send goes through
/// [`BlockingSpanExporter`] for the same reason.
fn otlp_span_processor(
    endpoint: String,
    timeout: Duration,
) -> Result<OtlpProcessor, TelemetryError> {
    let http_client = std::thread::spawn(move || {
        reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
    })
    .join()
    .map_err(|_| TelemetryError::HttpClient("client builder thread panicked".to_string()))?
    .map_err(|e| TelemetryError::HttpClient(e.to_string()))?;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_http_client(http_client)
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(endpoint)
        .with_timeout(timeout)
        .build()?;

    Ok(SimpleSpanProcessor::new(BlockingSpanExporter::new(exporter)))
}

/// Initialize OpenTelemetry for the current execution environment.
///
/// Returns the handle used to flush spans after each invocation. A second
/// call returns the first handle unchanged.
///
/// Nothing global is registered unless every step succeeds, so a failed call
/// can be retried.
///
/// # Errors
///
/// Returns an error if the propagator list is invalid, the exporter cannot be
/// built, or a global `tracing` subscriber is already installed by someone else.
pub fn init_telemetry(mut config: TelemetryConfig) -> Result<TelemetryHandle, TelemetryError> {
    let mut installed = INSTALLED.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(handle) = installed.as_ref() {
        tracing::debug!("telemetry already initialized, reusing existing provider");
        return Ok(handle.clone());
    }

    let propagators = propagators_from_names(&config.resolved_propagators())?;

    if !config.has_processor {
        let endpoint = config.resolved_endpoint();
        let processor = otlp_span_processor(endpoint, config.resolved_timeout())?;
        config.provider_builder = config.provider_builder.with_span_processor(processor);
    }

    let resource = config
        .resource
        .take()
        .unwrap_or_else(|| get_lambda_resource(config.service_name.as_deref()));
    let provider_builder = std::mem::take(&mut config.provider_builder);
    let provider = Arc::new(
        provider_builder
            .with_id_generator(XrayIdGenerator::default())
            .with_resource(resource)
            .build(),
    );

    let handle = TelemetryHandle::new(provider);
    install_subscriber(&config, handle.tracer().clone())?;

    global::set_text_map_propagator(TextMapCompositePropagator::new(propagators));
    if config.set_global_provider {
        global::set_tracer_provider(handle.provider().as_ref().clone());
    }

    tracing::debug!(endpoint = %config.resolved_endpoint(), "telemetry initialized");
    *installed = Some(handle.clone());
    Ok(handle)
}

fn install_subscriber(config: &TelemetryConfig, tracer: Tracer) -> Result<(), TelemetryError> {
    let env_var_name = config.env_var_name.as_deref().unwrap_or_else(|| {
        if env::var("RUST_LOG").is_ok() {
            "RUST_LOG"
        } else {
            "AWS_LAMBDA_LOG_LEVEL"
        }
    });

    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var(env_var_name)
        .from_env_lossy();

    let subscriber = tracing_subscriber::registry::Registry::default()
        .with(tracing_opentelemetry::OpenTelemetryLayer::new(tracer))
        .with(env_filter);

    if !config.fmt_layer_enabled() {
        tracing::subscriber::set_global_default(subscriber)?;
        return Ok(());
    }

    let is_json = env::var(env_vars::LOG_FORMAT)
        .unwrap_or_default()
        .eq_ignore_ascii_case("JSON");

    if is_json {
        tracing::subscriber::set_global_default(
            subscriber.with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .without_time()
                    .json(),
            ),
        )?;
    } else {
        tracing::subscriber::set_global_default(
            subscriber.with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .without_time()
                    .with_ansi(false),
            ),
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::propagation::TextMapPropagator as _;
    use opentelemetry::trace::{Tracer as _, TracerProvider as _};
    use opentelemetry_sdk::trace::InMemorySpanExporter;
    use sealed_test::prelude::*;
    use serial_test::serial;

    fn in_memory_config(exporter: InMemorySpanExporter) -> TelemetryConfig {
        TelemetryConfig::builder()
            .service_name("samplefunc")
            .with_span_processor(SimpleSpanProcessor::new(exporter))
            .build()
    }

    #[test]
    fn config_defaults() {
        let config = TelemetryConfig::default();
        assert!(config.set_global_provider);
        assert!(!config.has_processor);
        assert!(!config.enable_fmt_layer);
        assert!(config.service_name.is_none());
    }

    #[test]
    #[serial]
    fn endpoint_resolution_order() {
        env::remove_var(env_vars::OTLP_TRACES_ENDPOINT);
        env::remove_var(env_vars::OTLP_ENDPOINT);
        assert_eq!(
            TelemetryConfig::default().resolved_endpoint(),
            "http://localhost:4318/v1/traces"
        );

        env::set_var(env_vars::OTLP_ENDPOINT, "http://collector.sample.com:4318/");
        assert_eq!(
            TelemetryConfig::default().resolved_endpoint(),
            "http://collector.sample.com:4318/v1/traces"
        );

        env::set_var(env_vars::OTLP_TRACES_ENDPOINT, "http://traces.internal/custom");
        assert_eq!(
            TelemetryConfig::default().resolved_endpoint(),
            "http://traces.internal/custom"
        );

        let explicit = TelemetryConfig::builder()
            .endpoint("http://explicit:4318/v1/traces")
            .build();
        assert_eq!(explicit.resolved_endpoint(), "http://explicit:4318/v1/traces");

        env::remove_var(env_vars::OTLP_TRACES_ENDPOINT);
        env::remove_var(env_vars::OTLP_ENDPOINT);
    }

    #[test]
    #[serial]
    fn timeout_from_env() {
        env::set_var(env_vars::OTLP_TIMEOUT, "2500");
        assert_eq!(
            TelemetryConfig::default().resolved_timeout(),
            Duration::from_millis(2500)
        );
        env::remove_var(env_vars::OTLP_TIMEOUT);
        assert_eq!(
            TelemetryConfig::default().resolved_timeout(),
            defaults::EXPORT_TIMEOUT
        );
    }

    #[sealed_test]
    fn init_is_idempotent() {
        let exporter = InMemorySpanExporter::default();
        let first = init_telemetry(in_memory_config(exporter.clone())).unwrap();
        let second = init_telemetry(in_memory_config(InMemorySpanExporter::default())).unwrap();

        assert!(Arc::ptr_eq(first.provider(), second.provider()));
    }

    #[sealed_test]
    fn spans_use_xray_ids_and_service_name() {
        let exporter = InMemorySpanExporter::default();
        let handle = init_telemetry(in_memory_config(exporter.clone())).unwrap();

        handle
            .provider()
            .tracer("test")
            .in_span("work", |_cx| {});
        handle.complete();

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);

        // X-Ray trace ids start with the epoch seconds of their creation.
        let trace_id = format!("{}", spans[0].span_context.trace_id());
        let epoch = u64::from_str_radix(&trace_id[..8], 16).unwrap();
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs();
        assert!(now.abs_diff(epoch) < 60);
    }

    #[sealed_test]
    fn info_spans_are_exported_without_log_level_env() {
        env::remove_var("RUST_LOG");
        env::remove_var("AWS_LAMBDA_LOG_LEVEL");
        let exporter = InMemorySpanExporter::default();
        let handle = init_telemetry(in_memory_config(exporter.clone())).unwrap();

        tracing::info_span!("handler", otel.kind = "server").in_scope(|| {
            tracing::debug_span!("internal").in_scope(|| {});
        });
        handle.complete();

        let spans = exporter.get_finished_spans().unwrap();
        let names: Vec<String> = spans.iter().map(|s| s.name.to_string()).collect();
        assert_eq!(names, ["handler"]);
    }

    #[sealed_test]
    fn failed_subscriber_install_registers_nothing() {
        tracing::subscriber::set_global_default(tracing_subscriber::registry()).unwrap();

        let result = init_telemetry(in_memory_config(InMemorySpanExporter::default()));
        assert!(matches!(result, Err(TelemetryError::Subscriber(_))));

        let propagated_fields =
            global::get_text_map_propagator(|propagator| propagator.fields().count());
        assert_eq!(propagated_fields, 0);

        // no handle was kept, so a retry runs the bootstrap again
        let retry = init_telemetry(in_memory_config(InMemorySpanExporter::default()));
        assert!(matches!(retry, Err(TelemetryError::Subscriber(_))));
    }

    #[sealed_test]
    fn default_otlp_export_does_not_block_runtime_workers() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let handle = init_telemetry(
                TelemetryConfig::builder()
                    .service_name("samplefunc")
                    .endpoint("http://127.0.0.1:9/v1/traces")
                    .export_timeout(Duration::from_millis(500))
                    .build(),
            )
            .unwrap();

            // the span ends on a worker thread, where the blocking send would panic
            tokio::spawn(async move {
                tracing::info_span!("handler", otel.kind = "server").in_scope(|| {});
                handle.complete();
            })
            .await
            .unwrap();
        });
    }

    #[sealed_test]
    fn unknown_propagator_is_rejected() {
        let config = TelemetryConfig::builder()
            .propagators("b3")
            .with_span_processor(SimpleSpanProcessor::new(
                InMemorySpanExporter::default(),
            ))
            .build();
        assert!(matches!(
            init_telemetry(config),
            Err(TelemetryError::UnknownPropagator(_))
        ));
    }
}
