//! Part coordinator (C4)
//!
//! Drives one `PATCH` request through the stream splitter, assigns S3 part
//! numbers in emission order, applies the small-tail policy, and uploads
//! eligible chunks as S3 parts concurrently. Grounded in the teacher's
//! `MultipartHandler` (same create/upload_part/complete shape), generalized
//! from a single in-memory body to a sequence of spilled chunk files.

use bytes::Bytes;
use std::sync::Arc;

use crate::s3::{S3Client, S3CompletedPart};
use crate::store::splitter::{ByteStream, ChunkEvent, SplitterConfig, StreamSplitter};
use crate::store::{StoreError, MIN_PART_SIZE};

/// Result of coordinating one `PATCH` body to completion (or failure).
pub struct CoordinatorOutcome {
    /// Parts successfully uploaded during this call, sorted by part number.
    pub parts_uploaded: Vec<S3CompletedPart>,
    /// Cumulative size accepted during this call (small-tail rejects excluded).
    pub bytes_accepted: u64,
    /// First error encountered, if any. Chunks uploaded before the error
    /// remain valid at S3 and are still reported in `parts_uploaded`.
    pub error: Option<StoreError>,
}

pub struct PartCoordinator {
    client: Arc<S3Client>,
}

impl PartCoordinator {
    pub fn new(client: Arc<S3Client>) -> Self {
        Self { client }
    }

    #[tracing::instrument(
        name = "store.coordinator.run",
        skip(self, readable, splitter_config),
        fields(s3.key = %key, s3.upload_id = %upload_id, part_number.start = next_part_number)
    )]
    pub async fn run(
        &self,
        key: &str,
        upload_id: &str,
        readable: ByteStream,
        splitter_config: SplitterConfig,
        mut next_part_number: u32,
        mut current_size: u64,
        upload_length: Option<u64>,
    ) -> CoordinatorOutcome {
        let mut rx = StreamSplitter::spawn(readable, splitter_config);
        let mut tasks = Vec::new();
        let mut error = None;

        while let Some(event) = rx.recv().await {
            match event {
                ChunkEvent::Started(_) => {}
                ChunkEvent::Finished { path, size } => {
                    crate::metrics::record_chunk_finished();
                    current_size += size;
                    let part_number = next_part_number;
                    next_part_number += 1;

                    let is_final = upload_length.map(|len| current_size == len).unwrap_or(false);

                    if !is_final && size < MIN_PART_SIZE {
                        tracing::debug!(
                            part_number,
                            size,
                            "small-tail policy: discarding chunk below S3's minimum part size"
                        );
                        crate::metrics::record_chunk_discarded();
                        let _ = tokio::fs::remove_file(&path).await;
                        current_size -= size;
                        continue;
                    }

                    let client = Arc::clone(&self.client);
                    let key = key.to_string();
                    let upload_id = upload_id.to_string();

                    tasks.push(tokio::spawn(async move {
                        let result = upload_chunk_file(&client, &key, &upload_id, part_number, &path).await;
                        let _ = tokio::fs::remove_file(&path).await;
                        result
                    }));
                }
                ChunkEvent::Error(e) => {
                    error = Some(e);
                    break;
                }
                ChunkEvent::Done => break,
            }
        }

        let mut parts = Vec::new();
        for task in tasks {
            match task.await {
                Ok(Ok(part)) => parts.push(part),
                Ok(Err(e)) => {
                    if error.is_none() {
                        error = Some(e);
                    }
                }
                Err(_) => {
                    if error.is_none() {
                        error = Some(StoreError::Other("chunk upload task panicked".into()));
                    }
                }
            }
        }
        parts.sort_by_key(|p| p.part_number);

        CoordinatorOutcome {
            parts_uploaded: parts,
            bytes_accepted: current_size,
            error,
        }
    }
}

async fn upload_chunk_file(
    client: &S3Client,
    key: &str,
    upload_id: &str,
    part_number: u32,
    path: &std::path::Path,
) -> Result<S3CompletedPart, StoreError> {
    let data = tokio::fs::read(path).await?;
    let result = client
        .upload_part(key, upload_id, part_number, Bytes::from(data))
        .await
        .map_err(|e| StoreError::classify(e, StoreError::NoSuchUpload));

    crate::metrics::record_part_uploaded(result.is_ok());

    result.map(|response| S3CompletedPart {
        part_number,
        etag: response.etag,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::s3::S3ClientConfig;
    use futures::stream;

    fn test_client() -> Arc<S3Client> {
        Arc::new(
            S3Client::new(S3ClientConfig {
                bucket: "test".into(),
                region: "us-east-1".into(),
                endpoint: Some("http://127.0.0.1:1".into()),
                access_key: None,
                secret_key: None,
                retry: Some(crate::s3::RetryConfig {
                    max_retries: 0,
                    ..Default::default()
                }),
                timeout: None,
            })
            .unwrap(),
        )
    }

    fn byte_stream(data: &'static [u8]) -> ByteStream {
        Box::pin(stream::iter(vec![Ok(Bytes::from_static(data))]))
    }

    #[tokio::test]
    async fn test_small_tail_chunk_is_discarded_without_upload() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = PartCoordinator::new(test_client());

        let outcome = coordinator
            .run(
                "upload-1",
                "abc",
                byte_stream(b"tiny"),
                SplitterConfig {
                    max_chunk_size: 8 * 1024 * 1024,
                    directory: dir.path().to_path_buf(),
                },
                1,
                0,
                Some(100 * 1024 * 1024),
            )
            .await;

        assert!(outcome.parts_uploaded.is_empty());
        assert_eq!(outcome.bytes_accepted, 0);
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn test_final_tail_under_min_size_is_attempted() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = PartCoordinator::new(test_client());

        let outcome = coordinator
            .run(
                "upload-1",
                "abc",
                byte_stream(b"tiny"),
                SplitterConfig {
                    max_chunk_size: 8 * 1024 * 1024,
                    directory: dir.path().to_path_buf(),
                },
                1,
                0,
                Some(4),
            )
            .await;

        // Unreachable MinIO endpoint: upload fails, but the chunk was not
        // silently discarded by the small-tail policy (bytes_accepted
        // still reflects the attempted final chunk before failure).
        assert!(outcome.error.is_some());
    }
}
