use crate::lister::BucketLister;
use crate::response::{HttpEnvelope, ListingBody};
use lambda_runtime::{Error, LambdaEvent};
use serde_json::Value;

/// Grouping delimiter: only top-level prefixes are listed.
pub const DELIMITER: &str = "/";

/// Lists the top level of one bucket on every invocation.
///
/// Built once per execution environment and shared by reference across
/// invocations.
pub struct ListBucketHandler<L> {
    lister: L,
    bucket: String,
}

impl<L: BucketLister> ListBucketHandler<L> {
    pub fn new(lister: L, bucket: impl Into<String>) -> Self {
        Self {
            lister,
            bucket: bucket.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Handle one invocation. The event payload is not read.
    ///
    /// Storage failures are returned as the original `SdkError`, boxed.
    pub async fn handle(&self, _event: LambdaEvent<Value>) -> Result<HttpEnvelope, Error> {
        let output = self.lister.list_top_level(&self.bucket, DELIMITER).await?;

        let body = ListingBody::from_output(&output);
        tracing::debug!(
            bucket = %self.bucket,
            prefixes = body.common_prefixes.len(),
            objects = body.contents.len(),
            "listed bucket"
        );

        Ok(HttpEnvelope::ok(&body)?)
    }
}
