use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_s3::config::{Credentials, SharedCredentialsProvider};
use aws_smithy_http_client::test_util::capture_request;
use aws_smithy_types::body::SdkBody;
use lambda_runtime::{Context, LambdaEvent};
use list_bucket::{build_s3_client, ListBucketHandler, S3BucketLister};
use opentelemetry::trace::{Status, TracerProvider as _};
use opentelemetry::Value as AttributeValue;
use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider, SpanData};
use serde_json::Value;
use tracing_subscriber::prelude::*;

const LIST_OBJECTS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>sample-bucket</Name>
  <Prefix></Prefix>
  <Marker></Marker>
  <MaxKeys>1000</MaxKeys>
  <Delimiter>/</Delimiter>
  <IsTruncated>false</IsTruncated>
  <CommonPrefixes><Prefix>a/</Prefix></CommonPrefixes>
  <CommonPrefixes><Prefix>b/</Prefix></CommonPrefixes>
</ListBucketResult>"#;

fn attribute(span: &SpanData, key: &str) -> Option<AttributeValue> {
    span.attributes
        .iter()
        .find(|kv| kv.key.as_str() == key)
        .map(|kv| kv.value.clone())
}

#[tokio::test]
async fn sdk_call_is_traced_and_carries_the_trace_header() {
    opentelemetry::global::set_text_map_propagator(
        opentelemetry_aws::trace::XrayPropagator::default(),
    );
    let exporter = InMemorySpanExporter::default();
    let provider = SdkTracerProvider::builder()
        .with_simple_exporter(exporter.clone())
        .build();
    let _guard = tracing_subscriber::registry()
        .with(tracing_opentelemetry::OpenTelemetryLayer::new(
            provider.tracer("s3-client-test"),
        ))
        .set_default();

    let (http_client, captured) = capture_request(Some(
        http::Response::builder()
            .status(200)
            .header("x-amz-request-id", "4442587FB7D0A2F9")
            .body(SdkBody::from(LIST_OBJECTS_XML))
            .unwrap(),
    ));
    let sdk_config = SdkConfig::builder()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::from_static("ap-northeast-1"))
        .credentials_provider(SharedCredentialsProvider::new(Credentials::new(
            "AKIDEXAMPLE",
            "secret",
            None,
            None,
            "test",
        )))
        .http_client(http_client)
        .build();
    let handler = ListBucketHandler::new(
        S3BucketLister::new(build_s3_client(&sdk_config)),
        "sample-bucket",
    );

    let response = handler
        .handle(LambdaEvent::new(Value::Null, Context::default()))
        .await
        .unwrap();
    let body: Value = serde_json::from_str(&response.body).unwrap();
    assert_eq!(body["CommonPrefixes"][0]["Prefix"], "a/");
    assert_eq!(body["CommonPrefixes"][1]["Prefix"], "b/");
    assert_eq!(body["$metadata"]["requestId"], "4442587FB7D0A2F9");
    assert_eq!(body["$metadata"]["httpStatusCode"], 200);

    let request = captured.expect_request();
    assert!(request
        .uri()
        .starts_with("https://sample-bucket.s3.ap-northeast-1.amazonaws.com/"));
    assert!(request.uri().contains("delimiter=%2F"));
    let trace_header = request.headers().get("x-amzn-trace-id").unwrap().to_string();

    let spans = exporter.get_finished_spans().unwrap();
    let operation = spans.iter().find(|s| s.name == "S3.ListObjects").unwrap();
    let attempt = spans.iter().find(|s| s.name == "HTTP GET").unwrap();

    assert_eq!(attempt.parent_span_id, operation.span_context.span_id());
    assert!(trace_header.starts_with("Root=1-"));
    assert!(trace_header.contains(&format!("Parent={}", attempt.span_context.span_id())));

    assert_eq!(
        attribute(operation, "aws.request_id"),
        Some(AttributeValue::from("4442587FB7D0A2F9"))
    );
    assert_eq!(
        attribute(operation, "cloud.region"),
        Some(AttributeValue::from("ap-northeast-1"))
    );
    assert_eq!(operation.status, Status::Ok);
    assert_eq!(
        attribute(attempt, "http.response.status_code"),
        Some(AttributeValue::I64(200))
    );
}
