//! IAM policy document helpers.

use serde_json::{json, Value};

pub const POLICY_VERSION: &str = "2012-10-17";

/// Actions of a read/write grant on a bucket and its objects.
pub const BUCKET_READ_WRITE_ACTIONS: [&str; 10] = [
    "s3:Abort*",
    "s3:DeleteObject*",
    "s3:GetBucket*",
    "s3:GetObject*",
    "s3:List*",
    "s3:PutObject",
    "s3:PutObjectLegalHold",
    "s3:PutObjectRetention",
    "s3:PutObjectTagging",
    "s3:PutObjectVersionTagging",
];

pub const XRAY_WRITE_ACTIONS: [&str; 2] = ["xray:PutTelemetryRecords", "xray:PutTraceSegments"];

pub const LOG_WRITE_ACTIONS: [&str; 2] = ["logs:CreateLogStream", "logs:PutLogEvents"];

/// Trust policy letting `service` assume the role.
pub fn assume_role_policy(service: &str) -> Value {
    json!({
        "Statement": [{
            "Action": "sts:AssumeRole",
            "Effect": "Allow",
            "Principal": { "Service": service }
        }],
        "Version": POLICY_VERSION
    })
}

pub fn allow(actions: &[&str], resources: Value) -> Value {
    json!({
        "Action": actions,
        "Effect": "Allow",
        "Resource": resources
    })
}

pub fn policy_document(statements: Vec<Value>) -> Value {
    json!({
        "Statement": statements,
        "Version": POLICY_VERSION
    })
}

/// Inline `AWS::IAM::Policy` properties attached to one role.
pub fn role_policy(policy_name: &str, role_logical_id: &str, statements: Vec<Value>) -> Value {
    json!({
        "PolicyDocument": policy_document(statements),
        "PolicyName": policy_name,
        "Roles": [crate::template::reference(role_logical_id)]
    })
}
