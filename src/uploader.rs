//! Uploader — drains finished CSV artifacts and ships them to an S3
//! bucket, deleting the local copy regardless of upload outcome.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::batcher::safe_remove_csv;
use crate::error::UploadError;
use crate::signals::Signal;

/// The object store the uploader ships finished CSV windows to. Implemented
/// by the real S3 client in production and by an in-memory fixture in
/// tests — the drain loop never depends on a reachable AWS account, the
/// same isolation `FrameSource` gives Packet Capture from a real adapter.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, path: &Path, bucket: &str) -> Result<(), UploadError>;
}

/// Builds an S3 client using the ambient AWS credential/region chain
/// (environment, shared config, instance metadata).
pub async fn create_s3_client() -> Client {
    let config = aws_config::load_from_env().await;
    Client::new(&config)
}

#[async_trait]
impl ObjectStore for Client {
    /// Uploads one file to `bucket`, keyed by its basename. Returns `Ok(())`
    /// only once the object store has accepted the upload.
    async fn put(&self, path: &Path, bucket: &str) -> Result<(), UploadError> {
        let object_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| UploadError::FileMissing(path.to_path_buf()))?;

        info!(?path, object_name, bucket, "attempting upload");

        let body = ByteStream::from_path(path).await?;

        self.put_object()
            .bucket(bucket)
            .key(object_name)
            .body(body)
            .send()
            .await?;

        info!(?path, "uploaded file successfully");
        Ok(())
    }
}

/// Runs the uploader loop.
///
/// While the CSV batcher is still producing windows, reads from
/// `upload_rx` block indefinitely (the queue is the only wake source).
/// Once the batcher has exited, reads become non-blocking — any attempt
/// to read from an already-empty, already-closed-producer queue returns
/// immediately rather than hanging forever. Every file is deleted locally
/// once handled, whether the upload succeeded or failed; a missing file
/// is logged but does not count against the error budget.
///
/// Returns `Err(UploadError::ErrorBudgetExceeded)` once `max_error_count`
/// upload failures have accumulated — this is a fatal condition (spec.md
/// §7), propagated to the supervisor in `main`, rather than a condition the
/// uploader silently logs and keeps running past.
pub async fn run_uploader(
    mut upload_rx: mpsc::Receiver<Option<PathBuf>>,
    store: Box<dyn ObjectStore>,
    bucket: String,
    max_error_count: u32,
    csv_writer_exit: Signal,
) -> Result<(), UploadError> {
    let mut upload_error_count = 0u32;

    while upload_error_count < max_error_count {
        let file_name = if !csv_writer_exit.is_set() {
            match upload_rx.recv().await {
                Some(name) => name,
                None => break,
            }
        } else {
            match upload_rx.try_recv() {
                Ok(name) => name,
                Err(_) => {
                    info!("queue is empty and csv writer has exited");
                    break;
                }
            }
        };

        let Some(file_name) = file_name else {
            info!("received termination message from queue");
            break;
        };

        if !file_name.exists() {
            error!(?file_name, "file doesn't exist, cannot upload");
            continue;
        }

        match store.put(&file_name, &bucket).await {
            Ok(()) => info!(?file_name, "uploaded file successfully"),
            Err(e) => {
                upload_error_count += 1;
                error!(
                    ?file_name,
                    error = %e,
                    total_errors = upload_error_count,
                    "failed to upload file"
                );
            }
        }
        safe_remove_csv(&file_name);
    }

    info!("terminating uploader");
    if upload_error_count >= max_error_count {
        error!(
            total_errors = upload_error_count,
            max_error_count, "exceeded maximum allowed upload errors"
        );
        return Err(UploadError::ErrorBudgetExceeded {
            count: upload_error_count,
        });
    }
    Ok(())
}
