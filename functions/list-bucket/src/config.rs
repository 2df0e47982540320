//! Function configuration, read once at cold start.

use aws_config::meta::region::RegionProviderChain;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use lambda_otel_bootstrap::AwsSdkTracingInterceptor;
use std::env;
use thiserror::Error;

pub const BUCKET_NAME: &str = "BUCKET_NAME";
pub const AWS_REGION: &str = "AWS_REGION";

/// Region used when neither the environment nor the profile names one.
pub const FALLBACK_REGION: &str = "ap-northeast-1";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {0} is not set or empty")]
    MissingVar(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionConfig {
    pub bucket_name: String,
    pub region: Option<String>,
}

impl FunctionConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let bucket_name = env::var(BUCKET_NAME)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .ok_or(ConfigError::MissingVar(BUCKET_NAME))?;
        let region = env::var(AWS_REGION)
            .ok()
            .filter(|value| !value.trim().is_empty());

        Ok(Self {
            bucket_name,
            region,
        })
    }

    /// Load the shared AWS configuration.
    ///
    /// Region order: `AWS_REGION`, then the default provider chain, then
    /// [`FALLBACK_REGION`].
    pub async fn load_sdk_config(&self) -> SdkConfig {
        let region_provider = RegionProviderChain::first_try(self.region.clone().map(Region::new))
            .or_default_provider()
            .or_else(Region::from_static(FALLBACK_REGION));

        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(region_provider)
            .load()
            .await;
        tracing::debug!(region = ?sdk_config.region(), "loaded AWS config");
        sdk_config
    }
}

/// S3 client whose calls show up as child spans of the invocation.
pub fn build_s3_client(sdk_config: &SdkConfig) -> aws_sdk_s3::Client {
    let s3_config = aws_sdk_s3::config::Builder::from(sdk_config)
        .interceptor(AwsSdkTracingInterceptor::new())
        .build();
    aws_sdk_s3::Client::from_conf(s3_config)
}
