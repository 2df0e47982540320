//! Context propagation for AWS Lambda.
//!
//! Provides the X-Ray propagator variant used by default, plus the parser for
//! the `OTEL_PROPAGATORS` list.

use crate::constants::{env_vars, AWS_XRAY_TRACE_HEADER};
use crate::error::TelemetryError;
use opentelemetry::{
    propagation::{text_map_propagator::FieldIter, Extractor, Injector, TextMapPropagator},
    trace::TraceContextExt,
    Context,
};
use opentelemetry_aws::trace::XrayPropagator;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use std::{collections::HashMap, env};

/// A propagator that wraps the `XrayPropagator` with Lambda-specific behavior.
///
/// When the carrier holds no valid context, the `_X_AMZN_TRACE_ID`
/// environment variable set by the Lambda runtime is tried instead.
#[derive(Debug, Default)]
pub struct LambdaXrayPropagator {
    inner: XrayPropagator,
}

impl LambdaXrayPropagator {
    pub fn new() -> Self {
        Self {
            inner: XrayPropagator::default(),
        }
    }
}

impl TextMapPropagator for LambdaXrayPropagator {
    fn fields(&self) -> FieldIter<'_> {
        self.inner.fields()
    }

    fn extract_with_context(&self, cx: &Context, extractor: &dyn Extractor) -> Context {
        let ctx = self.inner.extract_with_context(cx, extractor);
        if has_active_span(&ctx) {
            return ctx;
        }

        if let Ok(trace_id_value) = env::var(env_vars::AWS_XRAY_TRACE_ID) {
            tracing::debug!(header = %trace_id_value, "falling back to _X_AMZN_TRACE_ID");
            let env_carrier = HashMap::from([(AWS_XRAY_TRACE_HEADER.to_string(), trace_id_value)]);
            let env_ctx = self.inner.extract_with_context(cx, &env_carrier);
            if has_active_span(&env_ctx) {
                return env_ctx;
            }
        }

        ctx
    }

    fn extract(&self, extractor: &dyn Extractor) -> Context {
        self.extract_with_context(&Context::current(), extractor)
    }

    fn inject_context(&self, cx: &Context, injector: &mut dyn Injector) {
        self.inner.inject_context(cx, injector)
    }
}

fn has_active_span(cx: &Context) -> bool {
    cx.span().span_context().is_valid()
}

/// Build the propagators named in a comma-separated list.
///
/// `none` anywhere in the list disables propagation and yields an empty list.
pub fn propagators_from_names(
    names: &str,
) -> Result<Vec<Box<dyn TextMapPropagator + Send + Sync>>, TelemetryError> {
    let mut propagators: Vec<Box<dyn TextMapPropagator + Send + Sync>> = Vec::new();
    for name in names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        match name.to_lowercase().as_str() {
            "tracecontext" => propagators.push(Box::new(TraceContextPropagator::new())),
            "xray" => propagators.push(Box::new(XrayPropagator::default())),
            "xray-lambda" => propagators.push(Box::new(LambdaXrayPropagator::new())),
            "none" => return Ok(Vec::new()),
            other => return Err(TelemetryError::UnknownPropagator(other.to_string())),
        }
    }
    Ok(propagators)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::trace::{SpanContext, SpanId, TraceFlags, TraceId, TraceState};
    use serial_test::serial;

    const HEADER: &str = "Root=1-5759e988-bd862e3fe1be46a994272793;Parent=53995c3f42cd8ad8;Sampled=1";

    #[test]
    fn extracts_from_carrier() {
        let carrier = HashMap::from([(AWS_XRAY_TRACE_HEADER.to_string(), HEADER.to_string())]);
        let context = LambdaXrayPropagator::default().extract(&carrier);
        assert_eq!(
            context.span().span_context().trace_id(),
            TraceId::from_hex("5759e988bd862e3fe1be46a994272793").unwrap()
        );
    }

    #[test]
    #[serial]
    fn falls_back_to_env_var() {
        let original = env::var(env_vars::AWS_XRAY_TRACE_ID).ok();
        env::set_var(env_vars::AWS_XRAY_TRACE_ID, HEADER);

        let empty = HashMap::<String, String>::new();
        let context =
            LambdaXrayPropagator::default().extract_with_context(&Context::current(), &empty);
        assert!(context.span().span_context().is_valid());

        match original {
            Some(val) => env::set_var(env_vars::AWS_XRAY_TRACE_ID, val),
            None => env::remove_var(env_vars::AWS_XRAY_TRACE_ID),
        }
    }

    #[test]
    #[serial]
    fn carrier_takes_precedence_over_env() {
        let original = env::var(env_vars::AWS_XRAY_TRACE_ID).ok();
        env::set_var(env_vars::AWS_XRAY_TRACE_ID, HEADER);

        let carrier = HashMap::from([(
            AWS_XRAY_TRACE_HEADER.to_string(),
            "Root=1-58406520-a006649127e371903a2de979;Parent=4c721bf33e3caf8f;Sampled=1"
                .to_string(),
        )]);
        let context = LambdaXrayPropagator::default().extract(&carrier);
        assert_eq!(
            context.span().span_context().trace_id(),
            TraceId::from_hex("58406520a006649127e371903a2de979").unwrap()
        );

        match original {
            Some(val) => env::set_var(env_vars::AWS_XRAY_TRACE_ID, val),
            None => env::remove_var(env_vars::AWS_XRAY_TRACE_ID),
        }
    }

    #[test]
    fn injects_xray_header() {
        let span_context = SpanContext::new(
            TraceId::from_hex("5759e988bd862e3fe1be46a994272793").unwrap(),
            SpanId::from_hex("53995c3f42cd8ad8").unwrap(),
            TraceFlags::SAMPLED,
            true,
            TraceState::default(),
        );
        let context = Context::current().with_remote_span_context(span_context);

        let mut injector = HashMap::<String, String>::new();
        LambdaXrayPropagator::default().inject_context(&context, &mut injector);

        let header = injector.get(AWS_XRAY_TRACE_HEADER).unwrap();
        assert!(header.contains("Root=1-5759e988-bd862e3fe1be46a994272793"));
        assert!(header.contains("Parent=53995c3f42cd8ad8"));
        assert!(header.contains("Sampled=1"));
    }

    #[test]
    fn parses_propagator_names() {
        assert_eq!(propagators_from_names("xray-lambda").unwrap().len(), 1);
        assert_eq!(
            propagators_from_names("tracecontext, xray").unwrap().len(),
            2
        );
        assert!(propagators_from_names("xray,none").unwrap().is_empty());
        assert!(matches!(
            propagators_from_names("b3"),
            Err(TelemetryError::UnknownPropagator(name)) if name == "b3"
        ));
    }
}
