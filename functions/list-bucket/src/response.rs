//! JSON shapes returned by the function.
//!
//! `ListObjectsOutput` is not `Serialize`, so [`ListingBody`] mirrors it field
//! for field with the names S3 uses on the wire. Absent fields are omitted.

use aws_sdk_s3::operation::list_objects::ListObjectsOutput;
use aws_sdk_s3::operation::{RequestId, RequestIdExt};
use aws_sdk_s3::primitives::{DateTime, DateTimeFormat};
use aws_sdk_s3::types::{CommonPrefix, Object, Owner};
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListingBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_marker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_keys: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_truncated: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_charged: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub contents: Vec<ObjectEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub common_prefixes: Vec<PrefixEntry>,
    #[serde(rename = "$metadata")]
    pub metadata: ResponseMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ObjectEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    #[serde(rename = "ETag", skip_serializing_if = "Option::is_none")]
    pub e_tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<OwnerEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub checksum_algorithm: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct OwnerEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(rename = "ID", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PrefixEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extended_request_id: Option<String>,
}

impl ListingBody {
    pub fn from_output(output: &ListObjectsOutput) -> Self {
        Self {
            name: output.name().map(str::to_string),
            prefix: output.prefix().map(str::to_string),
            delimiter: output.delimiter().map(str::to_string),
            marker: output.marker().map(str::to_string),
            next_marker: output.next_marker().map(str::to_string),
            max_keys: output.max_keys(),
            is_truncated: output.is_truncated(),
            encoding_type: output.encoding_type().map(|e| e.as_str().to_string()),
            request_charged: output.request_charged().map(|r| r.as_str().to_string()),
            contents: output.contents().iter().map(ObjectEntry::from).collect(),
            common_prefixes: output
                .common_prefixes()
                .iter()
                .map(PrefixEntry::from)
                .collect(),
            metadata: ResponseMetadata {
                // ListObjects has no modeled success status other than 200
                http_status_code: Some(200),
                request_id: output.request_id().map(str::to_string),
                extended_request_id: output.extended_request_id().map(str::to_string),
            },
        }
    }
}

impl From<&Object> for ObjectEntry {
    fn from(object: &Object) -> Self {
        Self {
            key: object.key().map(str::to_string),
            last_modified: object.last_modified().and_then(rfc3339),
            e_tag: object.e_tag().map(str::to_string),
            size: object.size(),
            storage_class: object.storage_class().map(|s| s.as_str().to_string()),
            owner: object.owner().map(OwnerEntry::from),
            checksum_algorithm: object
                .checksum_algorithm()
                .iter()
                .map(|c| c.as_str().to_string())
                .collect(),
        }
    }
}

impl From<&Owner> for OwnerEntry {
    fn from(owner: &Owner) -> Self {
        Self {
            display_name: owner.display_name().map(str::to_string),
            id: owner.id().map(str::to_string),
        }
    }
}

impl From<&CommonPrefix> for PrefixEntry {
    fn from(prefix: &CommonPrefix) -> Self {
        Self {
            prefix: prefix.prefix().map(str::to_string),
        }
    }
}

fn rfc3339(timestamp: &DateTime) -> Option<String> {
    timestamp.fmt(DateTimeFormat::DateTime).ok()
}

/// API Gateway style response returned by the handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpEnvelope {
    pub status_code: u16,
    pub body: String,
}

impl HttpEnvelope {
    /// 200 response whose body is `body` encoded as JSON text.
    pub fn ok<T: Serialize>(body: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            status_code: 200,
            body: serde_json::to_string(body)?,
        })
    }
}
