//! Lambda function that lists the top-level prefixes of one S3 bucket.
//!
//! The bucket comes from `BUCKET_NAME`. Each invocation issues a single
//! `ListObjects` call with delimiter `/` and returns the response as JSON in
//! an HTTP style envelope. Storage errors are returned as is.

pub mod config;
pub mod handler;
pub mod lister;
pub mod response;

pub use config::{build_s3_client, ConfigError, FunctionConfig};
pub use handler::ListBucketHandler;
pub use lister::{BucketLister, ListError, S3BucketLister};
pub use response::{HttpEnvelope, ListingBody};
