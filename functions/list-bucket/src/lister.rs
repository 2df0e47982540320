use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::list_objects::{ListObjectsError, ListObjectsOutput};

pub type ListError = SdkError<ListObjectsError, HttpResponse>;

/// Storage seam of the handler.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BucketLister: Send + Sync {
    /// First page of `ListObjects` for `bucket`, grouped by `delimiter`.
    async fn list_top_level(
        &self,
        bucket: &str,
        delimiter: &str,
    ) -> Result<ListObjectsOutput, ListError>;
}

/// [`BucketLister`] backed by the S3 API.
#[derive(Clone, Debug)]
pub struct S3BucketLister {
    client: aws_sdk_s3::Client,
}

impl S3BucketLister {
    pub fn new(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BucketLister for S3BucketLister {
    async fn list_top_level(
        &self,
        bucket: &str,
        delimiter: &str,
    ) -> Result<ListObjectsOutput, ListError> {
        self.client
            .list_objects()
            .bucket(bucket)
            .delimiter(delimiter)
            .send()
            .await
    }
}
