//! Metadata store (C2)
//!
//! Persists per-upload metadata as a zero-byte `{id}.info` sidecar object
//! and caches it in a process-wide [`DashMap`], the concurrent-map crate
//! the teacher already depends on for exactly this access pattern.

use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;

use crate::s3::S3Client;
use crate::store::{StoreError, Upload};

const TUS_VERSION: &str = "1.0.0";

/// A cached view of an upload: its tus attributes plus the S3 multipart
/// upload id that owns it.
#[derive(Debug, Clone)]
pub struct UploadSession {
    pub file: Upload,
    pub upload_id: String,
    pub tus_version: String,
}

pub struct MetadataStore {
    client: Arc<S3Client>,
    cache: DashMap<String, UploadSession>,
}

impl MetadataStore {
    pub fn new(client: Arc<S3Client>) -> Self {
        Self {
            client,
            cache: DashMap::new(),
        }
    }

    fn sidecar_key(id: &str) -> String {
        format!("{id}.info")
    }

    #[tracing::instrument(name = "store.metadata.save", skip(self, upload), fields(upload.id = %upload.id), err)]
    pub async fn save_metadata(&self, upload: &Upload, upload_id: &str) -> Result<(), StoreError> {
        let file_json = serde_json::to_string(upload)?;
        let user_metadata = [
            ("file", file_json.as_str()),
            ("upload_id", upload_id),
            ("tus_version", TUS_VERSION),
        ];

        self.client
            .put_object(&Self::sidecar_key(&upload.id), Bytes::new(), None, &user_metadata)
            .await
            .map_err(|e| StoreError::classify(e, StoreError::BucketMissing))?;

        self.cache.insert(
            upload.id.clone(),
            UploadSession {
                file: upload.clone(),
                upload_id: upload_id.to_string(),
                tus_version: TUS_VERSION.to_string(),
            },
        );

        Ok(())
    }

    #[tracing::instrument(name = "store.metadata.get", skip(self), fields(upload.id = %id), err)]
    pub async fn get_metadata(&self, id: &str) -> Result<UploadSession, StoreError> {
        if let Some(session) = self.cache.get(id) {
            return Ok(session.clone());
        }

        let response = self
            .client
            .head_object(&Self::sidecar_key(id))
            .await
            .map_err(|e| StoreError::classify(e, StoreError::FileNotFound(id.to_string())))?;

        let file_json = response
            .metadata
            .get("file")
            .ok_or_else(|| StoreError::FileNotFound(id.to_string()))?;
        let file: Upload = serde_json::from_str(file_json)?;

        // DigitalOcean Spaces and some other S3-compatible providers
        // normalize metadata keys, surfacing `upload-id` instead of the
        // `upload_id` key AWS S3 preserves.
        let upload_id = response
            .metadata
            .get("upload_id")
            .or_else(|| response.metadata.get("upload-id"))
            .ok_or_else(|| {
                StoreError::Other(format!("sidecar for '{id}' is missing an upload id"))
            })?
            .clone();

        let tus_version = response
            .metadata
            .get("tus_version")
            .cloned()
            .unwrap_or_else(|| TUS_VERSION.to_string());

        let session = UploadSession {
            file,
            upload_id,
            tus_version,
        };
        self.cache.insert(id.to_string(), session.clone());
        Ok(session)
    }

    pub fn clear_cache(&self, id: &str) {
        self.cache.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::s3::S3ClientConfig;

    fn test_store() -> MetadataStore {
        let client = Arc::new(
            S3Client::new(S3ClientConfig {
                bucket: "test".into(),
                region: "us-east-1".into(),
                endpoint: Some("http://127.0.0.1:1".into()),
                access_key: None,
                secret_key: None,
                retry: None,
                timeout: None,
            })
            .unwrap(),
        );
        MetadataStore::new(client)
    }

    #[test]
    fn test_sidecar_key_format() {
        assert_eq!(MetadataStore::sidecar_key("abc123"), "abc123.info");
    }

    #[test]
    fn test_clear_cache_is_idempotent() {
        let store = test_store();
        store.clear_cache("nonexistent");
        store.clear_cache("nonexistent");
    }

    #[test]
    fn test_cache_round_trip() {
        let store = test_store();
        let upload = Upload {
            id: "abc".into(),
            upload_length: Some(10),
            upload_defer_length: false,
            upload_metadata: None,
            creation_date: None,
        };
        store.cache.insert(
            upload.id.clone(),
            UploadSession {
                file: upload.clone(),
                upload_id: "mpu-1".into(),
                tus_version: TUS_VERSION.to_string(),
            },
        );

        let cached = store.cache.get("abc").unwrap();
        assert_eq!(cached.upload_id, "mpu-1");
        assert_eq!(cached.file, upload);
    }
}
