//! Resumable upload storage backend.
//!
//! Adapts the tus resumable-upload protocol onto an S3-compatible object
//! store. [`UploadStore`] is the top-level entry point (C5 in the design);
//! it orchestrates the object-store client ([`crate::s3::S3Client`]), the
//! metadata sidecar ([`metadata::MetadataStore`]), the stream splitter
//! ([`splitter::StreamSplitter`]), and the part coordinator
//! ([`coordinator::PartCoordinator`]).

pub mod coordinator;
pub mod lifecycle;
pub mod metadata;
pub mod splitter;

pub use lifecycle::{UploadStore, UploadStoreConfig};
pub use metadata::{MetadataStore, UploadSession};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// tus protocol extensions this backend declares support for. Dispatching
/// them onto HTTP verbs is the job of the (out-of-scope) front end.
pub const SUPPORTED_EXTENSIONS: &[&str] =
    &["creation", "creation-with-upload", "creation-defer-length"];

/// S3's floor for a non-final multipart part.
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// S3's limit on the number of parts in one multipart upload.
pub const MAX_PARTS: u32 = 10_000;

/// A tus upload: the data that survives in the `{id}.info` sidecar.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Upload {
    pub id: String,
    pub upload_length: Option<u64>,
    #[serde(default)]
    pub upload_defer_length: bool,
    #[serde(default)]
    pub upload_metadata: Option<String>,
    #[serde(default)]
    pub creation_date: Option<String>,
}

/// The current offset of an upload, reconstructed from S3's part listing.
#[derive(Debug, Clone)]
pub struct UploadOffset {
    pub upload: Upload,
    pub size: u64,
    pub parts: Vec<crate::s3::S3Part>,
}

/// One decoded entry from a tus `Upload-Metadata` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataEntry {
    pub encoded: String,
    pub decoded: Option<String>,
}

/// Parse the tus metadata wire format: comma-separated `key base64(value)`
/// pairs. A key with no value (just the bare name) yields `decoded: None`.
pub fn parse_metadata_string(raw: &str) -> HashMap<String, MetadataEntry> {
    let mut result = HashMap::new();
    if raw.trim().is_empty() {
        return result;
    }

    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let mut parts = entry.splitn(2, ' ');
        let key = match parts.next() {
            Some(k) if !k.is_empty() => k.to_string(),
            _ => continue,
        };
        let encoded = parts.next().unwrap_or("").to_string();
        let decoded = if encoded.is_empty() {
            None
        } else {
            use base64::Engine;
            base64::engine::general_purpose::STANDARD
                .decode(&encoded)
                .ok()
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        };

        result.insert(key, MetadataEntry { encoded, decoded });
    }

    result
}

/// Replace non-ASCII bytes with `?`, the coercion S3 user metadata requires
/// (invariant I5). The original string is unaffected; only what reaches the
/// `x-amz-meta-*` header is coerced.
pub fn ascii_coerce(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_ascii() { c } else { '?' })
        .collect()
}

/// Error kinds surfaced by the upload backend (see the error-kind table).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("bucket is missing or unreachable")]
    BucketMissing,

    #[error("upload '{0}' not found")]
    FileNotFound(String),

    #[error("request timed out mid-upload")]
    RequestTimeout,

    #[error("no such multipart upload")]
    NoSuchUpload,

    #[error("object-store transport error: {0}")]
    Transport(#[from] crate::s3::S3ClientError),

    #[error("filesystem error: {0}")]
    Filesystem(#[from] std::io::Error),

    #[error("metadata serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl StoreError {
    /// Classify an [`crate::s3::S3ClientError`] into a domain error. The
    /// same HTTP status means different things depending on which call
    /// produced it, so the caller supplies the interpretation for a plain
    /// 404 via `not_found`.
    pub fn classify(err: crate::s3::S3ClientError, not_found: StoreError) -> StoreError {
        match err.code() {
            Some("NoSuchUpload") => StoreError::NoSuchUpload,
            Some("RequestTimeout") => StoreError::RequestTimeout,
            Some("NoSuchBucket") => StoreError::BucketMissing,
            _ => match err.status() {
                Some(404) => not_found,
                Some(408) => StoreError::RequestTimeout,
                _ => StoreError::Transport(err),
            },
        }
    }
}

/// The interface a tus HTTP front end depends on, so it need not know this
/// backend is S3-backed. Out of scope: routing HTTP verbs onto these calls.
#[async_trait]
pub trait UploadBackend: Send + Sync {
    async fn create(&self, upload: Upload) -> Result<Upload, StoreError>;

    async fn write(
        &self,
        id: &str,
        readable: crate::store::splitter::ByteStream,
    ) -> Result<u64, StoreError>;

    async fn get_offset(&self, id: &str) -> Result<UploadOffset, StoreError>;

    async fn declare_upload_length(&self, id: &str, length: u64) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_metadata_string_empty() {
        assert!(parse_metadata_string("").is_empty());
        assert!(parse_metadata_string("   ").is_empty());
    }

    #[test]
    fn test_parse_metadata_string_basic() {
        let raw = "filename d29ybGRfZG9taW5hdGlvbl9wbGFuLnBkZg==,is_confidential";
        let parsed = parse_metadata_string(raw);

        let filename = parsed.get("filename").unwrap();
        assert_eq!(filename.decoded.as_deref(), Some("world_domination_plan.pdf"));

        let flag = parsed.get("is_confidential").unwrap();
        assert_eq!(flag.encoded, "");
        assert_eq!(flag.decoded, None);
    }

    #[test]
    fn test_parse_metadata_string_content_type() {
        let raw = "contentType dGV4dC9wbGFpbg==";
        let parsed = parse_metadata_string(raw);
        assert_eq!(parsed.get("contentType").unwrap().decoded.as_deref(), Some("text/plain"));
    }

    #[test]
    fn test_ascii_coerce_replaces_non_ascii() {
        assert_eq!(ascii_coerce("héllo"), "h?llo");
        assert_eq!(ascii_coerce("plain"), "plain");
    }

    #[test]
    fn test_classify_no_such_upload_by_code() {
        let err = crate::s3::S3ClientError::Response {
            status: 404,
            code: Some("NoSuchUpload".into()),
            message: "gone".into(),
        };
        assert!(matches!(
            StoreError::classify(err, StoreError::FileNotFound("x".into())),
            StoreError::NoSuchUpload
        ));
    }

    #[test]
    fn test_classify_plain_404_uses_caller_supplied_kind() {
        let err = crate::s3::S3ClientError::Response {
            status: 404,
            code: None,
            message: "missing".into(),
        };
        assert!(matches!(
            StoreError::classify(err, StoreError::BucketMissing),
            StoreError::BucketMissing
        ));
    }

    #[test]
    fn test_classify_request_timeout_by_status() {
        let err = crate::s3::S3ClientError::Response {
            status: 408,
            code: None,
            message: "timed out".into(),
        };
        assert!(matches!(
            StoreError::classify(err, StoreError::FileNotFound("x".into())),
            StoreError::RequestTimeout
        ));
    }
}
