//! Resource attribute management for Lambda functions.
//!
//! Standard `faas.*` and `cloud.*` attributes come from the Lambda runtime
//! environment through the AWS Lambda resource detector. On top of that:
//!
//! - `service.name`: explicit name, else `OTEL_SERVICE_NAME`, else the
//!   function name, else `unknown_service`
//! - `cloud.platform`: `aws_lambda` whenever a function name is present
//! - anything listed in `OTEL_RESOURCE_ATTRIBUTES` (`key=value,key2=value2`,
//!   values may be URL-encoded)

use crate::constants::{defaults, env_vars};
use opentelemetry::KeyValue;
use opentelemetry_aws::detector::LambdaResourceDetector;
use opentelemetry_sdk::Resource;
use opentelemetry_semantic_conventions::resource as semres;
use std::env;
use urlencoding::decode;

/// Resolve the service name for the resource.
pub fn resolve_service_name(explicit: Option<&str>) -> String {
    explicit
        .map(str::to_string)
        .or_else(|| env::var(env_vars::SERVICE_NAME).ok())
        .or_else(|| env::var(env_vars::AWS_LAMBDA_FUNCTION_NAME).ok())
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| defaults::SERVICE_NAME.to_string())
}

/// Build the Lambda resource attached to every span.
pub fn get_lambda_resource(service_name: Option<&str>) -> Resource {
    let mut attributes = vec![
        KeyValue::new(semres::SERVICE_NAME, resolve_service_name(service_name)),
        KeyValue::new(semres::TELEMETRY_SDK_LANGUAGE, "rust"),
    ];

    if env::var(env_vars::AWS_LAMBDA_FUNCTION_NAME).is_ok() {
        attributes.push(KeyValue::new(semres::CLOUD_PLATFORM, "aws_lambda"));
    }

    attributes.extend(parse_resource_attributes(
        &env::var(env_vars::RESOURCE_ATTRIBUTES).unwrap_or_default(),
    ));

    Resource::builder_empty()
        .with_detector(Box::new(LambdaResourceDetector))
        .with_attributes(attributes)
        .build()
}

/// Parse `key=value` pairs, dropping malformed entries and empty values.
fn parse_resource_attributes(raw: &str) -> Vec<KeyValue> {
    raw.split(',')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let (key, value) = (key.trim(), value.trim());
            if key.is_empty() || value.is_empty() {
                return None;
            }
            let decoded = decode(value).ok()?.into_owned();
            Some(KeyValue::new(key.to_string(), decoded))
        })
        .collect()
}
