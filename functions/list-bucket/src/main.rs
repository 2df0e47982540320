use lambda_otel_bootstrap::{init_telemetry, OtelTracingLayer, TelemetryConfig};
use lambda_runtime::{Error, LambdaEvent, Runtime};
use list_bucket::{build_s3_client, FunctionConfig, ListBucketHandler, S3BucketLister};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceBuilder;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let telemetry = init_telemetry(TelemetryConfig::default())?;

    let config = FunctionConfig::from_env()?;
    let sdk_config = config.load_sdk_config().await;
    let lister = S3BucketLister::new(build_s3_client(&sdk_config));
    let handler = Arc::new(ListBucketHandler::new(lister, config.bucket_name));

    let service = ServiceBuilder::new()
        .layer(OtelTracingLayer::new(telemetry).with_name("samplefunc"))
        .service_fn(move |event: LambdaEvent<Value>| {
            let handler = Arc::clone(&handler);
            async move { handler.handle(event).await }
        });

    Runtime::new(service).run().await
}
