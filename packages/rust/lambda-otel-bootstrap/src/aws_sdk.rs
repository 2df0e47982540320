//! Automatic spans for AWS SDK calls.
//!
//! [`AwsSdkTracingInterceptor`] plugs into any smithy-generated client and
//! produces, without changes to the calling code:
//! - one CLIENT span per operation, named `Service.Operation`
//! - one CLIENT span per HTTP attempt below it, named `HTTP <METHOD>`
//!
//! The attempt span's context is injected into the outgoing request through
//! the global propagator, so the callee continues the same trace.
//!
//! ```no_run
//! use lambda_otel_bootstrap::AwsSdkTracingInterceptor;
//!
//! # async fn example() {
//! let sdk_config = aws_config::load_from_env().await;
//! let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
//!     .interceptor(AwsSdkTracingInterceptor::new())
//!     .build();
//! let client = aws_sdk_s3::Client::from_conf(s3_config);
//! # }
//! ```

use aws_config::Region;
use aws_smithy_runtime_api::box_error::BoxError;
use aws_smithy_runtime_api::client::interceptors::context::{
    BeforeSerializationInterceptorContextRef, BeforeTransmitInterceptorContextMut,
    BeforeTransmitInterceptorContextRef, FinalizerInterceptorContextRef,
};
use aws_smithy_runtime_api::client::interceptors::Intercept;
use aws_smithy_runtime_api::client::orchestrator::{HttpResponse, Metadata};
use aws_smithy_runtime_api::client::runtime_components::RuntimeComponents;
use aws_smithy_runtime_api::http::Headers;
use aws_smithy_types::config_bag::{ConfigBag, Storable, StoreReplace};
use opentelemetry::propagation::Injector;
use tracing::field::Empty;
use tracing_opentelemetry::OpenTelemetrySpanExt;

const REQUEST_ID_HEADERS: [&str; 3] = ["x-amzn-requestid", "x-amz-request-id", "x-amzn-request-id"];

/// Span covering a whole SDK operation, retries included.
#[derive(Debug, Clone)]
struct OperationSpan(tracing::Span);

impl Storable for OperationSpan {
    type Storer = StoreReplace<Self>;
}

/// Span covering one HTTP attempt.
#[derive(Debug, Clone)]
struct AttemptSpan {
    span: tracing::Span,
    resend_count: u32,
}

impl Storable for AttemptSpan {
    type Storer = StoreReplace<Self>;
}

/// Interceptor that traces AWS SDK operations and their HTTP attempts.
#[derive(Debug, Default, Clone)]
pub struct AwsSdkTracingInterceptor;

impl AwsSdkTracingInterceptor {
    pub fn new() -> Self {
        Self
    }
}

/// Create the span for an SDK operation under the current span.
pub(crate) fn operation_span(service: &str, operation: &str) -> tracing::Span {
    let span = tracing::info_span!(
        "aws_sdk",
        otel.name = Empty,
        otel.kind = "client",
        otel.status_code = Empty,
        otel.status_message = Empty,
        rpc.system = "aws-api",
        rpc.service = service,
        rpc.method = operation,
        cloud.region = Empty,
        aws.request_id = Empty,
    );
    span.record("otel.name", format!("{service}.{operation}").as_str());
    span
}

fn attempt_span(parent: &tracing::Span, method: &str, url: &str, resend_count: u32) -> tracing::Span {
    let span = tracing::info_span!(
        parent: parent,
        "http_request",
        otel.name = Empty,
        otel.kind = "client",
        otel.status_code = Empty,
        http.request.method = method,
        url.full = url,
        http.request.resend_count = Empty,
        http.response.status_code = Empty,
    );
    span.record("otel.name", format!("HTTP {method}").as_str());
    if resend_count > 0 {
        span.record("http.request.resend_count", i64::from(resend_count));
    }
    span
}

/// Record the response status of an attempt; 4xx and 5xx mark it failed.
fn record_response_status(span: &tracing::Span, status: u16) {
    span.record("http.response.status_code", i64::from(status));
    if status >= 400 {
        span.record("otel.status_code", "ERROR");
    }
}

/// First request id header found on a response.
pub(crate) fn request_id(response: &HttpResponse) -> Option<&str> {
    REQUEST_ID_HEADERS
        .iter()
        .find_map(|name| response.headers().get(*name))
}

/// Adapter letting a propagator write into smithy request headers.
pub(crate) struct HeaderInjector<'a>(pub(crate) &'a mut Headers);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        if let Err(e) = self.0.try_insert(key.to_string(), value) {
            tracing::debug!(error = %e, header = key, "skipping invalid propagation header");
        }
    }
}

impl Intercept for AwsSdkTracingInterceptor {
    fn name(&self) -> &'static str {
        "AwsSdkTracingInterceptor"
    }

    fn read_before_execution(
        &self,
        _context: &BeforeSerializationInterceptorContextRef<'_>,
        cfg: &mut ConfigBag,
    ) -> Result<(), BoxError> {
        let (service, operation) = cfg
            .load::<Metadata>()
            .map(|m| (m.service().to_string(), m.name().to_string()))
            .unwrap_or_else(|| ("AWS".to_string(), "Unknown".to_string()));
        let span = operation_span(&service, &operation);
        if let Some(region) = cfg.load::<Region>() {
            span.record("cloud.region", region.as_ref());
        }
        cfg.interceptor_state().store_put(OperationSpan(span));
        Ok(())
    }

    fn read_before_attempt(
        &self,
        context: &BeforeTransmitInterceptorContextRef<'_>,
        _runtime_components: &RuntimeComponents,
        cfg: &mut ConfigBag,
    ) -> Result<(), BoxError> {
        let Some(OperationSpan(parent)) = cfg.load::<OperationSpan>().cloned() else {
            return Ok(());
        };
        let resend_count = cfg
            .load::<AttemptSpan>()
            .map(|previous| previous.resend_count + 1)
            .unwrap_or(0);
        let request = context.request();
        let span = attempt_span(&parent, request.method(), request.uri(), resend_count);
        cfg.interceptor_state()
            .store_put(AttemptSpan { span, resend_count });
        Ok(())
    }

    fn modify_before_signing(
        &self,
        context: &mut BeforeTransmitInterceptorContextMut<'_>,
        _runtime_components: &RuntimeComponents,
        cfg: &mut ConfigBag,
    ) -> Result<(), BoxError> {
        if let Some(attempt) = cfg.load::<AttemptSpan>() {
            let otel_context = attempt.span.context();
            let mut injector = HeaderInjector(context.request_mut().headers_mut());
            opentelemetry::global::get_text_map_propagator(|propagator| {
                propagator.inject_context(&otel_context, &mut injector)
            });
        }
        Ok(())
    }

    fn read_after_attempt(
        &self,
        context: &FinalizerInterceptorContextRef<'_>,
        _runtime_components: &RuntimeComponents,
        cfg: &mut ConfigBag,
    ) -> Result<(), BoxError> {
        let Some(attempt) = cfg.load::<AttemptSpan>() else {
            return Ok(());
        };
        match context.response() {
            Some(response) => record_response_status(&attempt.span, response.status().as_u16()),
            None => {
                attempt.span.record("otel.status_code", "ERROR");
            }
        }
        Ok(())
    }

    fn read_after_execution(
        &self,
        context: &FinalizerInterceptorContextRef<'_>,
        _runtime_components: &RuntimeComponents,
        cfg: &mut ConfigBag,
    ) -> Result<(), BoxError> {
        if let Some(OperationSpan(span)) = cfg.load::<OperationSpan>() {
            if let Some(id) = context.response().and_then(request_id) {
                span.record("aws.request_id", id);
            }
            match context.output_or_error() {
                Some(Ok(_)) => {
                    span.record("otel.status_code", "OK");
                }
                Some(Err(error)) => {
                    span.record("otel.status_code", "ERROR");
                    span.record("otel.status_message", format!("{error:?}").as_str());
                }
                None => {}
            }
        }
        cfg.interceptor_state().unset::<AttemptSpan>();
        cfg.interceptor_state().unset::<OperationSpan>();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_smithy_runtime_api::http::StatusCode;
    use aws_smithy_types::body::SdkBody;
    use opentelemetry::trace::{SpanKind, Status, TracerProvider as _};
    use opentelemetry::Value;
    use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider, SpanData};
    use serial_test::serial;
    use tracing_subscriber::prelude::*;

    fn attribute(span: &SpanData, key: &str) -> Option<Value> {
        span.attributes
            .iter()
            .find(|kv| kv.key.as_str() == key)
            .map(|kv| kv.value.clone())
    }

    fn setup() -> (InMemorySpanExporter, SdkTracerProvider, tracing::subscriber::DefaultGuard) {
        let exporter = InMemorySpanExporter::default();
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        let guard = tracing_subscriber::registry()
            .with(tracing_opentelemetry::OpenTelemetryLayer::new(
                provider.tracer("test"),
            ))
            .set_default();
        (exporter, provider, guard)
    }

    #[test]
    #[serial]
    fn operation_and_attempt_spans_nest() {
        let (exporter, _provider, _guard) = setup();

        let operation = operation_span("S3", "ListObjects");
        let attempt = attempt_span(&operation, "GET", "https://bucket.s3.amazonaws.com/?delimiter=%2F", 1);
        record_response_status(&attempt, 200);
        drop(attempt);
        drop(operation);

        let spans = exporter.get_finished_spans().unwrap();
        let op = spans.iter().find(|s| s.name == "S3.ListObjects").unwrap();
        let http = spans.iter().find(|s| s.name == "HTTP GET").unwrap();

        assert_eq!(op.span_kind, SpanKind::Client);
        assert_eq!(http.parent_span_id, op.span_context.span_id());
        assert!(op
            .attributes
            .iter()
            .any(|kv| kv.key.as_str() == "rpc.system" && kv.value == Value::from("aws-api")));
        assert_eq!(attribute(http, "http.request.resend_count"), Some(Value::I64(1)));
        assert_eq!(attribute(http, "http.response.status_code"), Some(Value::I64(200)));
    }

    #[test]
    #[serial]
    fn error_responses_fail_the_attempt() {
        let (exporter, _provider, _guard) = setup();

        let operation = operation_span("S3", "ListObjects");
        let attempt = attempt_span(&operation, "GET", "https://bucket.s3.amazonaws.com/", 0);
        record_response_status(&attempt, 403);
        drop(attempt);
        drop(operation);

        let spans = exporter.get_finished_spans().unwrap();
        let http = spans.iter().find(|s| s.name == "HTTP GET").unwrap();
        assert_eq!(attribute(http, "http.response.status_code"), Some(Value::I64(403)));
        assert_eq!(attribute(http, "http.request.resend_count"), None);
        assert!(matches!(http.status, Status::Error { .. }));
    }

    #[test]
    #[serial]
    fn injects_trace_header_into_request_headers() {
        opentelemetry::global::set_text_map_propagator(
            opentelemetry_aws::trace::XrayPropagator::default(),
        );
        let (_exporter, _provider, _guard) = setup();

        let span = operation_span("S3", "ListObjects");
        let mut headers = Headers::new();
        let cx = span.context();
        opentelemetry::global::get_text_map_propagator(|propagator| {
            propagator.inject_context(&cx, &mut HeaderInjector(&mut headers))
        });

        let header = headers.get("x-amzn-trace-id").unwrap();
        assert!(header.starts_with("Root=1-"));
        assert!(header.contains("Sampled=1"));
    }

    #[test]
    fn finds_request_id_headers() {
        let mut response = HttpResponse::new(StatusCode::try_from(200u16).unwrap(), SdkBody::empty());
        assert_eq!(request_id(&response), None);

        response.headers_mut().insert("x-amz-request-id", "4442587FB7D0A2F9");
        assert_eq!(request_id(&response), Some("4442587FB7D0A2F9"));
    }
}
