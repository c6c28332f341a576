//! Upload lifecycle (C5)
//!
//! The top-level entry point: orchestrates the metadata store, the part
//! coordinator, and the object-store client through the four operations a
//! tus front end drives a PATCH/HEAD/POST handler with. Grounded in the
//! teacher's `MultipartHandler`, which owned the same
//! create/upload/complete sequencing against a single S3 key.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use crate::s3::{CredentialsProvider, S3Client, S3ClientConfig, S3CompletedPart, S3Part};
use crate::store::coordinator::PartCoordinator;
use crate::store::metadata::{MetadataStore, UploadSession};
use crate::store::splitter::{ByteStream, SplitterConfig};
use crate::store::{parse_metadata_string, ascii_coerce, StoreError, Upload, UploadBackend, UploadOffset};

pub struct UploadStoreConfig {
    pub s3: S3ClientConfig,
    pub part_size: u64,
    pub temp_dir: Option<PathBuf>,
}

impl UploadStoreConfig {
    /// Build from the crate's top-level configuration surface. Falls back
    /// to `AWS_ACCESS_KEY_ID`/`AWS_SECRET_ACCESS_KEY` when the config omits
    /// credentials, so operators can keep keys out of the YAML file.
    pub fn from_config(config: &crate::config::StoreConfig) -> Self {
        let resolved = CredentialsProvider::resolve(config);
        let (access_key, secret_key) = match resolved {
            Some(creds) => (
                Some(creds.access_key_id().to_string()),
                Some(creds.secret_access_key().to_string()),
            ),
            None => (None, None),
        };

        Self {
            s3: S3ClientConfig {
                bucket: config.bucket.clone(),
                region: config.region.clone(),
                endpoint: config.endpoint.clone(),
                access_key,
                secret_key,
                retry: None,
                timeout: None,
            },
            part_size: config.part_size as u64,
            temp_dir: config.temp_dir.clone(),
        }
    }
}

pub struct UploadStore {
    client: Arc<S3Client>,
    metadata: MetadataStore,
    coordinator: PartCoordinator,
    part_size: u64,
    temp_dir: PathBuf,
}

impl UploadStore {
    pub fn new(config: UploadStoreConfig) -> Result<Self, StoreError> {
        let client = Arc::new(S3Client::new(config.s3).map_err(StoreError::Transport)?);
        let metadata = MetadataStore::new(Arc::clone(&client));
        let coordinator = PartCoordinator::new(Arc::clone(&client));
        let temp_dir = config
            .temp_dir
            .unwrap_or_else(|| std::env::temp_dir().join(format!("tus-s3-store-{}", std::process::id())));

        Ok(Self {
            client,
            metadata,
            coordinator,
            part_size: config.part_size,
            temp_dir,
        })
    }

    /// Create a multipart upload and persist its metadata sidecar.
    #[tracing::instrument(name = "store.lifecycle.create", skip(self, upload), fields(upload.id = %upload.id), err)]
    pub async fn create(&self, mut upload: Upload) -> Result<Upload, StoreError> {
        if let Err(e) = self.client.bucket_exists().await {
            self.metadata.clear_cache(&upload.id);
            return Err(StoreError::classify(e, StoreError::BucketMissing));
        }

        if upload.creation_date.is_none() {
            upload.creation_date = Some(chrono::Utc::now().to_rfc3339());
        }

        let parsed = upload
            .upload_metadata
            .as_deref()
            .map(parse_metadata_string)
            .unwrap_or_default();
        let content_type = parsed.get("contentType").and_then(|e| e.decoded.clone());
        let original_name = parsed.get("filename").map(|e| ascii_coerce(&e.encoded));

        let upload_length_str = upload.upload_length.map(|len| len.to_string());
        let mut user_metadata: Vec<(&str, &str)> = vec![("tus_version", "1.0.0")];
        if let Some(ref len) = upload_length_str {
            user_metadata.push(("upload_length", len));
        }
        if upload.upload_defer_length {
            user_metadata.push(("upload_defer_length", "1"));
        }
        if let Some(ref raw) = upload.upload_metadata {
            user_metadata.push(("upload_metadata", raw));
        }
        if let Some(ref name) = original_name {
            user_metadata.push(("original_name", name));
        }

        let created = match self
            .client
            .create_multipart_upload(&upload.id, content_type.as_deref(), &user_metadata)
            .await
        {
            Ok(created) => created,
            Err(e) => {
                self.metadata.clear_cache(&upload.id);
                return Err(StoreError::classify(e, StoreError::BucketMissing));
            }
        };

        if let Err(e) = self.metadata.save_metadata(&upload, &created.upload_id).await {
            tracing::warn!(upload.id = %upload.id, "aborting orphaned multipart upload after metadata save failure");
            let _ = self.client.abort_multipart_upload(&upload.id, &created.upload_id).await;
            crate::metrics::record_multipart_aborted();
            self.metadata.clear_cache(&upload.id);
            return Err(e);
        }

        Ok(upload)
    }

    /// Consume one `PATCH` body, uploading eligible chunks as S3 parts and
    /// completing the multipart upload once the declared length is reached.
    #[tracing::instrument(name = "store.lifecycle.write", skip(self, readable), fields(upload.id = %id), err)]
    pub async fn write(&self, id: &str, readable: ByteStream) -> Result<u64, StoreError> {
        let session = self.metadata.get_metadata(id).await?;
        let parts = self.retrieve_parts_for(id, &session).await?;
        let next_part_number = parts.len() as u32 + 1;
        let starting_offset: u64 = parts.iter().map(|p| p.size).sum();

        let splitter_config = SplitterConfig {
            max_chunk_size: self.part_size,
            directory: self.temp_dir.join(id),
        };

        let started_at = std::time::Instant::now();
        let outcome = self
            .coordinator
            .run(
                id,
                &session.upload_id,
                readable,
                splitter_config,
                next_part_number,
                starting_offset,
                session.file.upload_length,
            )
            .await;
        crate::metrics::record_write_duration(started_at.elapsed().as_secs_f64());

        crate::metrics::record_bytes_accepted(outcome.bytes_accepted.saturating_sub(starting_offset));

        if let Some(err) = outcome.error {
            return match err {
                StoreError::RequestTimeout | StoreError::NoSuchUpload => {
                    tracing::warn!(upload.id = %id, "client disconnected mid-upload, offset preserved");
                    self.get_offset(id).await.map(|o| o.size)
                }
                other => {
                    crate::metrics::record_error(store_error_kind(&other));
                    self.metadata.clear_cache(id);
                    Err(other)
                }
            };
        }

        let offset = self.get_offset(id).await?;

        if let Some(length) = offset.upload.upload_length {
            if offset.size == length && !offset.parts.is_empty() {
                let completed_parts: Vec<S3CompletedPart> = offset
                    .parts
                    .iter()
                    .map(|p| S3CompletedPart {
                        part_number: p.part_number,
                        etag: p.etag.clone(),
                    })
                    .collect();

                let parts_count = offset.parts.len();
                self.client
                    .complete_multipart_upload(id, &session.upload_id, completed_parts)
                    .await
                    .map_err(|e| StoreError::classify(e, StoreError::NoSuchUpload))?;

                crate::metrics::record_multipart_completed(parts_count);
                self.metadata.clear_cache(id);
            }
        }

        Ok(offset.size)
    }

    #[tracing::instrument(name = "store.lifecycle.get_offset", skip(self), fields(upload.id = %id), err)]
    pub async fn get_offset(&self, id: &str) -> Result<UploadOffset, StoreError> {
        let session = self.metadata.get_metadata(id).await?;
        match self.retrieve_parts_for(id, &session).await {
            Ok(parts) => {
                let size = parts.iter().map(|p| p.size).sum();
                Ok(UploadOffset {
                    upload: session.file,
                    size,
                    parts,
                })
            }
            Err(StoreError::NoSuchUpload) => Ok(UploadOffset {
                upload: session.file.clone(),
                size: session.file.upload_length.unwrap_or(0),
                parts: vec![],
            }),
            Err(e) => Err(e),
        }
    }

    #[tracing::instrument(name = "store.lifecycle.declare_upload_length", skip(self), fields(upload.id = %id, upload.length = length), err)]
    pub async fn declare_upload_length(&self, id: &str, length: u64) -> Result<(), StoreError> {
        let mut session = self.metadata.get_metadata(id).await?;
        session.file.upload_length = Some(length);
        session.file.upload_defer_length = false;
        self.metadata.save_metadata(&session.file, &session.upload_id).await
    }

    pub async fn count_parts(&self, id: &str) -> Result<usize, StoreError> {
        let session = self.metadata.get_metadata(id).await?;
        Ok(self.retrieve_parts_for(id, &session).await?.len())
    }

    /// Enumerate an upload's parts, paginating ListParts until exhausted,
    /// then restricting the result to the contiguous `[1..N]` prefix: a gap
    /// means a part upload failed partway, and everything past the gap is
    /// unusable for offset/completion purposes even if S3 still holds it.
    pub async fn retrieve_parts(&self, id: &str) -> Result<Vec<S3Part>, StoreError> {
        let session = self.metadata.get_metadata(id).await?;
        self.retrieve_parts_for(id, &session).await
    }

    async fn retrieve_parts_for(&self, id: &str, session: &UploadSession) -> Result<Vec<S3Part>, StoreError> {
        let mut parts = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let page = self
                .client
                .list_parts(id, &session.upload_id, marker.as_deref())
                .await
                .map_err(|e| StoreError::classify(e, StoreError::NoSuchUpload))?;

            parts.extend(page.parts);
            match page.next_part_number_marker {
                Some(m) => marker = Some(m),
                None => break,
            }
        }

        parts.sort_by_key(|p| p.part_number);
        Ok(filter_contiguous_parts(parts))
    }
}

fn store_error_kind(err: &StoreError) -> &'static str {
    match err {
        StoreError::BucketMissing => "bucket_missing",
        StoreError::FileNotFound(_) => "file_not_found",
        StoreError::RequestTimeout => "request_timeout",
        StoreError::NoSuchUpload => "no_such_upload",
        StoreError::Transport(_) => "transport",
        StoreError::Filesystem(_) => "filesystem",
        StoreError::Serialization(_) => "serialization",
        StoreError::Other(_) => "other",
    }
}

/// Keep only the prefix of parts numbered `1, 2, 3, ...` with no gaps.
fn filter_contiguous_parts(parts: Vec<S3Part>) -> Vec<S3Part> {
    let mut contiguous = Vec::with_capacity(parts.len());
    for (i, part) in parts.into_iter().enumerate() {
        if part.part_number == (i as u32) + 1 {
            contiguous.push(part);
        } else {
            break;
        }
    }
    contiguous
}

#[async_trait]
impl UploadBackend for UploadStore {
    async fn create(&self, upload: Upload) -> Result<Upload, StoreError> {
        UploadStore::create(self, upload).await
    }

    async fn write(&self, id: &str, readable: ByteStream) -> Result<u64, StoreError> {
        UploadStore::write(self, id, readable).await
    }

    async fn get_offset(&self, id: &str) -> Result<UploadOffset, StoreError> {
        UploadStore::get_offset(self, id).await
    }

    async fn declare_upload_length(&self, id: &str, length: u64) -> Result<(), StoreError> {
        UploadStore::declare_upload_length(self, id, length).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(part_number: u32, size: u64) -> S3Part {
        S3Part {
            part_number,
            etag: format!("\"e{part_number}\""),
            size,
        }
    }

    #[test]
    fn test_filter_contiguous_parts_keeps_full_run() {
        let parts = vec![part(1, 10), part(2, 10), part(3, 5)];
        let filtered = filter_contiguous_parts(parts);
        assert_eq!(filtered.len(), 3);
    }

    #[test]
    fn test_filter_contiguous_parts_stops_at_gap() {
        let parts = vec![part(1, 10), part(3, 5)];
        let filtered = filter_contiguous_parts(parts);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].part_number, 1);
    }

    #[test]
    fn test_filter_contiguous_parts_empty() {
        assert!(filter_contiguous_parts(vec![]).is_empty());
    }

    #[test]
    fn test_upload_store_config_from_config() {
        let config = crate::config::StoreConfig {
            bucket: "b".into(),
            region: "us-east-1".into(),
            endpoint: Some("http://localhost:9000".into()),
            access_key_id: Some("ak".into()),
            secret_access_key: Some("sk".into()),
            part_size: 8 * 1024 * 1024,
            temp_dir: None,
        };
        let store_config = UploadStoreConfig::from_config(&config);
        assert_eq!(store_config.s3.bucket, "b");
        assert_eq!(store_config.part_size, 8 * 1024 * 1024);
    }
}
