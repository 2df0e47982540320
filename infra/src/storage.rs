use crate::config::BucketConfig;
use crate::error::SynthError;
use crate::template::{get_att, reference, sub, Resource, Template};
use serde_json::{json, Value};

pub const BUCKET_ID: &str = "SampleBucket";

#[derive(Debug, Clone)]
pub struct Bucket {
    pub name: Value,
    pub arn: Value,
}

/// Bucket named `<prefix>-<account id>`, removed with the stack.
pub fn build(template: &mut Template, config: &BucketConfig) -> Result<Bucket, SynthError> {
    template.add(
        BUCKET_ID,
        Resource::new(
            "AWS::S3::Bucket",
            json!({ "BucketName": sub(&format!("{}-${{AWS::AccountId}}", config.name_prefix)) }),
        )
        .delete_with_stack(),
    )?;

    Ok(Bucket {
        name: reference(BUCKET_ID),
        arn: get_att(BUCKET_ID, "Arn"),
    })
}
