//! Tower middleware that traces every Lambda invocation.
//!
//! Wrapping the handler service with [`OtelTracingLayer`] gives each
//! invocation a SERVER span without touching handler code:
//! 1. The span carries `faas.invocation_id`, `cloud.resource_id`,
//!    `cloud.account.id`, `faas.trigger` and `faas.coldstart`
//! 2. Its parent comes from the invocation's X-Ray trace header, through the
//!    global propagator
//! 3. A `statusCode` field in the response is recorded as `http.status_code`;
//!    handler errors and 5xx responses mark the span as failed
//! 4. Once the span has closed, [`TelemetryHandle::complete`] flushes it
//!
//! ```no_run
//! use lambda_otel_bootstrap::{init_telemetry, OtelTracingLayer, TelemetryConfig};
//! use lambda_runtime::{Error, LambdaEvent};
//! use serde_json::Value;
//! use tower::ServiceBuilder;
//!
//! async fn handler(event: LambdaEvent<Value>) -> Result<Value, Error> {
//!     Ok(serde_json::json!({ "statusCode": 200 }))
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let telemetry = init_telemetry(TelemetryConfig::default())?;
//!     let service = ServiceBuilder::new()
//!         .layer(OtelTracingLayer::new(telemetry).with_name("samplefunc"))
//!         .service_fn(handler);
//!     lambda_runtime::run(service).await
//! }
//! ```

use crate::constants::AWS_XRAY_TRACE_HEADER;
use crate::TelemetryHandle;
use futures_util::ready;
use lambda_runtime::{Error, LambdaEvent};
use pin_project::pin_project;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::Poll;
use std::{future::Future, pin::Pin, task};
use tower::{Layer, Service};
use tracing::field::Empty;
use tracing::instrument::Instrumented;
use tracing::Instrument;
use tracing_opentelemetry::OpenTelemetrySpanExt;

static IS_COLD_START: AtomicBool = AtomicBool::new(true);

/// Future that records the result on the invocation span, closes the span
/// and then flushes telemetry.
#[pin_project]
pub struct CompletionFuture<Fut> {
    #[pin]
    future: Option<Fut>,
    telemetry: Option<TelemetryHandle>,
    span: Option<tracing::Span>,
}

impl<Fut, R> Future for CompletionFuture<Fut>
where
    Fut: Future<Output = Result<R, Error>>,
    R: Serialize + Send + 'static,
{
    type Output = Result<R, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<Self::Output> {
        let ready = ready!(self
            .as_mut()
            .project()
            .future
            .as_pin_mut()
            .expect("future polled after completion")
            .poll(cx));

        if let Some(span) = self.span.as_ref() {
            record_outcome(span, &ready);
        }

        Pin::set(&mut self.as_mut().project().future, None);
        let this = self.project();
        this.span.take();

        if let Some(telemetry) = this.telemetry.take() {
            telemetry.complete();
        }

        Poll::Ready(ready)
    }
}

fn record_outcome<R: Serialize>(span: &tracing::Span, result: &Result<R, Error>) {
    match result {
        Ok(response) => {
            let status_code = serde_json::to_value(response)
                .ok()
                .and_then(|value| value.get("statusCode").and_then(|s| s.as_i64()));
            match status_code {
                Some(code) if code >= 500 => {
                    span.record("http.status_code", code);
                    span.record("otel.status_code", "ERROR");
                    span.record(
                        "otel.status_message",
                        format!("HTTP {code} response").as_str(),
                    );
                }
                Some(code) => {
                    span.record("http.status_code", code);
                    span.record("otel.status_code", "OK");
                }
                None => {
                    span.record("otel.status_code", "OK");
                }
            }
        }
        Err(error) => {
            span.record("otel.status_code", "ERROR");
            span.record("otel.status_message", error.to_string().as_str());
        }
    }
}

/// Tower layer that creates one span per Lambda invocation.
#[derive(Clone)]
pub struct OtelTracingLayer {
    telemetry: TelemetryHandle,
    name: String,
}

impl OtelTracingLayer {
    pub fn new(telemetry: TelemetryHandle) -> Self {
        Self {
            telemetry,
            name: "lambda-invocation".to_string(),
        }
    }

    /// Set the span name, usually the function name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<S> Layer<S> for OtelTracingLayer {
    type Service = OtelTracingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        OtelTracingService {
            inner,
            telemetry: self.telemetry.clone(),
            name: self.name.clone(),
        }
    }
}

/// Service returned by [`OtelTracingLayer`].
#[derive(Clone)]
pub struct OtelTracingService<S> {
    inner: S,
    telemetry: TelemetryHandle,
    name: String,
}

impl<S, F, T, R> Service<LambdaEvent<T>> for OtelTracingService<S>
where
    S: Service<LambdaEvent<T>, Response = R, Error = Error, Future = F> + Send,
    F: Future<Output = Result<R, Error>> + Send + 'static,
    T: Send + 'static,
    R: Serialize + Send + 'static,
{
    type Response = R;
    type Error = Error;
    type Future = CompletionFuture<Instrumented<S::Future>>;

    fn poll_ready(&mut self, cx: &mut task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, event: LambdaEvent<T>) -> Self::Future {
        let is_cold = IS_COLD_START.swap(false, Ordering::Relaxed);
        let context = &event.context;

        let span = tracing::info_span!(
            parent: None,
            "handler",
            otel.name = %self.name,
            otel.kind = "server",
            otel.status_code = Empty,
            otel.status_message = Empty,
            faas.invocation_id = %context.request_id,
            faas.trigger = "other",
            faas.coldstart = is_cold,
            cloud.resource_id = %context.invoked_function_arn,
            cloud.account.id = Empty,
            http.status_code = Empty,
        );

        if let Some(account_id) = account_id_from_arn(&context.invoked_function_arn) {
            span.record("cloud.account.id", account_id);
        }

        if let Some(trace_header) = &context.xray_trace_id {
            let carrier = HashMap::from([(AWS_XRAY_TRACE_HEADER.to_string(), trace_header.clone())]);
            let parent_context = opentelemetry::global::get_text_map_propagator(|propagator| {
                propagator.extract(&carrier)
            });
            span.set_parent(parent_context);
        }

        let future = {
            let _guard = span.enter();
            self.inner.call(event)
        };

        CompletionFuture {
            future: Some(future.instrument(span.clone())),
            telemetry: Some(self.telemetry.clone()),
            span: Some(span),
        }
    }
}

fn account_id_from_arn(arn: &str) -> Option<&str> {
    arn.split(':').nth(4).filter(|id| !id.is_empty())
}
