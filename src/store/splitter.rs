//! Stream splitter (C3)
//!
//! Consumes an arbitrary-length byte stream and spills it into temporary
//! files of bounded size, emitting [`ChunkEvent`]s down a channel as each
//! file is opened and finalized. Mirrors the teacher's temp-file-per-unit
//! pattern (see `TempFileUpload`) but streams incrementally instead of
//! buffering a whole chunk in memory first.

use bytes::Bytes;
use futures::Stream;
use std::path::PathBuf;
use std::pin::Pin;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::store::StoreError;

/// A readable byte stream supplied by the (out-of-scope) HTTP front end for
/// one `PATCH` request.
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

#[derive(Debug, Clone)]
pub struct SplitterConfig {
    /// Target size of each spilled file; the final chunk may be smaller.
    pub max_chunk_size: u64,
    /// Directory new chunk files are created in. Created if missing.
    pub directory: PathBuf,
}

/// Lifecycle events emitted in strict chunk order, strictly before `Done`.
#[derive(Debug)]
pub enum ChunkEvent {
    Started(PathBuf),
    Finished { path: PathBuf, size: u64 },
    Done,
    Error(StoreError),
}

pub struct StreamSplitter;

impl StreamSplitter {
    /// Spawn the splitter as a background task and return the event
    /// channel. The channel is bounded so a slow consumer applies
    /// backpressure to the writer rather than buffering unboundedly.
    pub fn spawn(readable: ByteStream, config: SplitterConfig) -> mpsc::Receiver<ChunkEvent> {
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(run_splitter(readable, config, tx));
        rx
    }
}

async fn run_splitter(mut readable: ByteStream, config: SplitterConfig, tx: mpsc::Sender<ChunkEvent>) {
    use futures::StreamExt;

    if let Err(e) = tokio::fs::create_dir_all(&config.directory).await {
        let _ = tx.send(ChunkEvent::Error(StoreError::Filesystem(e))).await;
        return;
    }

    let mut current: Option<(PathBuf, tokio::fs::File, u64)> = None;

    loop {
        match readable.next().await {
            Some(Ok(bytes)) => {
                let mut data = bytes;
                while !data.is_empty() {
                    if current.is_none() {
                        let path = config.directory.join(format!("{}.part", uuid::Uuid::new_v4()));
                        match tokio::fs::File::create(&path).await {
                            Ok(file) => {
                                if tx.send(ChunkEvent::Started(path.clone())).await.is_err() {
                                    return;
                                }
                                current = Some((path, file, 0));
                            }
                            Err(e) => {
                                let _ = tx.send(ChunkEvent::Error(StoreError::Filesystem(e))).await;
                                return;
                            }
                        }
                    }

                    let finished = {
                        let (_, file, written) = current.as_mut().expect("just inserted");
                        let space_left = (config.max_chunk_size - *written) as usize;
                        let take = space_left.min(data.len());
                        let chunk = data.split_to(take);
                        if let Err(e) = file.write_all(&chunk).await {
                            let _ = tx.send(ChunkEvent::Error(StoreError::Filesystem(e))).await;
                            return;
                        }
                        *written += take as u64;
                        *written >= config.max_chunk_size
                    };

                    if finished {
                        let (path, mut file, written) = current.take().expect("checked above");
                        if let Err(e) = file.flush().await {
                            let _ = tx.send(ChunkEvent::Error(StoreError::Filesystem(e))).await;
                            return;
                        }
                        if tx
                            .send(ChunkEvent::Finished { path, size: written })
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                }
            }
            Some(Err(e)) => {
                // A pending file's path was already emitted via `Started`;
                // the coordinator is responsible for deleting it.
                let _ = tx.send(ChunkEvent::Error(StoreError::Filesystem(e))).await;
                return;
            }
            None => {
                if let Some((path, mut file, written)) = current.take() {
                    if let Err(e) = file.flush().await {
                        let _ = tx.send(ChunkEvent::Error(StoreError::Filesystem(e))).await;
                        return;
                    }
                    if tx
                        .send(ChunkEvent::Finished { path, size: written })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                let _ = tx.send(ChunkEvent::Done).await;
                return;
            }
        }
    }
}
