//! S3 API response types
//!
//! Defines the XML documents returned by S3-compatible services.

use serde::Deserialize;

/// One entry of a ListObjectsV2 page
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ObjectInfo {
    /// Full object key within the bucket
    pub key: String,
    /// Object size in bytes
    #[serde(default)]
    pub size: u64,
    /// Entity tag as reported by the service (quoted)
    #[serde(default, rename = "ETag")]
    pub etag: Option<String>,
}

/// Response from a ListObjectsV2 request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListBucketResult {
    /// Objects in this page
    #[serde(default)]
    pub contents: Vec<ObjectInfo>,
    /// Whether more pages follow
    #[serde(default)]
    pub is_truncated: bool,
    /// Token for the next page (present when truncated)
    #[serde(default)]
    pub next_continuation_token: Option<String>,
}

/// Error document returned with non-2xx responses
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ErrorDocument {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl ListBucketResult {
    /// Parse a ListObjectsV2 XML body
    pub fn from_xml(body: &str) -> Result<Self, quick_xml::de::DeError> {
        quick_xml::de::from_str(body)
    }
}

impl ErrorDocument {
    /// Best-effort parse of an error body; falls back to the raw text
    pub fn describe(body: &str) -> String {
        match quick_xml::de::from_str::<ErrorDocument>(body) {
            Ok(doc) if !doc.code.is_empty() => format!("{}: {}", doc.code, doc.message),
            _ => body.to_string(),
        }
    }
}
