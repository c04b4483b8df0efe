//! Background upload queue.
//!
//! Staged buckets are submitted once every sink has closed. At most
//! `max_concurrent` uploads run at a time; submissions wait when the queue
//! is full. The first failed upload stops the queue and is reported from
//! [`UploadQueue::finish`].
//!
//! Staging files below the multipart threshold are read whole and sent with
//! one PUT. Larger files are streamed from disk in `part_size` parts, so
//! memory per upload stays bounded by the parts in flight.

use futures::stream::{FuturesUnordered, StreamExt};
use object_store::Attributes;
use snafu::ResultExt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use crate::config::{
    DEFAULT_MULTIPART_THRESHOLD, DEFAULT_PART_SIZE, MAX_CONCURRENT_UPLOADS, MAX_PARTS_IN_FLIGHT,
};
use crate::emit;
use crate::error::{
    PutSnafu, ReadStagingSnafu, RemoveStagingSnafu, UploadError, UploadTaskJoinSnafu,
};
use crate::metrics::events::{ActiveUploads, UploadCompleted, UploadStatus};
use crate::storage::{MultipartWriter, StorageProviderRef};

/// Concurrency and part sizing for the upload queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadLimits {
    /// Objects uploading at once.
    pub max_concurrent: usize,
    /// Staged size from which an object is uploaded in parts.
    pub multipart_threshold: u64,
    pub part_size: usize,
    /// Parts of one object uploading at once.
    pub max_parts_in_flight: usize,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_concurrent: MAX_CONCURRENT_UPLOADS,
            multipart_threshold: DEFAULT_MULTIPART_THRESHOLD as u64,
            part_size: DEFAULT_PART_SIZE,
            max_parts_in_flight: MAX_PARTS_IN_FLIGHT,
        }
    }
}

/// One staged bucket waiting for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadJob {
    pub bucket: usize,
    pub staging_path: PathBuf,
    /// Object key, including the output prefix.
    pub key: String,
    pub size: u64,
}

/// A bucket that reached durable storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedObject {
    pub bucket: usize,
    pub key: String,
    pub size: u64,
}

type UploadFuture = Pin<Box<dyn Future<Output = Result<UploadedObject, UploadError>> + Send>>;

/// Handle to the background upload task.
pub struct UploadQueue {
    tx: mpsc::Sender<UploadJob>,
    handle: JoinHandle<Result<Vec<UploadedObject>, UploadError>>,
}

impl UploadQueue {
    /// Spawn the upload task.
    pub fn spawn(storage: StorageProviderRef, attributes: Attributes, limits: UploadLimits) -> Self {
        let limits = UploadLimits {
            max_concurrent: limits.max_concurrent.max(1),
            ..limits
        };
        let (tx, rx) = mpsc::channel(limits.max_concurrent);
        let handle = tokio::spawn(Self::run(rx, storage, attributes, limits));
        Self { tx, handle }
    }

    /// Submit a job, waiting while the queue is full.
    ///
    /// Fails once the task has stopped; call [`finish`](Self::finish) for
    /// the reason.
    pub async fn submit(&self, job: UploadJob) -> Result<(), UploadError> {
        self.tx
            .send(job)
            .await
            .map_err(|_| UploadError::UploadQueueClosed)
    }

    /// Close the queue and wait for every submitted upload.
    pub async fn finish(self) -> Result<Vec<UploadedObject>, UploadError> {
        drop(self.tx);
        self.handle.await.context(UploadTaskJoinSnafu)?
    }

    async fn run(
        mut rx: mpsc::Receiver<UploadJob>,
        storage: StorageProviderRef,
        attributes: Attributes,
        limits: UploadLimits,
    ) -> Result<Vec<UploadedObject>, UploadError> {
        let mut uploads: FuturesUnordered<UploadFuture> = FuturesUnordered::new();
        let mut uploaded = Vec::new();
        let mut channel_open = true;

        loop {
            if !channel_open && uploads.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                Some(result) = uploads.next(), if !uploads.is_empty() => {
                    emit!(ActiveUploads { count: uploads.len() });
                    let object = result?;
                    debug!(
                        "[upload] Completed bucket {} (active: {})",
                        object.bucket,
                        uploads.len()
                    );
                    uploaded.push(object);
                }

                job = rx.recv(), if channel_open && uploads.len() < limits.max_concurrent => {
                    match job {
                        Some(job) => {
                            debug!(
                                "[upload] Starting bucket {} ({} bytes, active: {})",
                                job.bucket,
                                job.size,
                                uploads.len() + 1
                            );
                            uploads.push(Box::pin(upload_bucket(
                                storage.clone(),
                                attributes.clone(),
                                limits,
                                job,
                            )));
                            emit!(ActiveUploads { count: uploads.len() });
                        }
                        None => {
                            channel_open = false;
                            debug!("[upload] Queue closed, draining {} pending uploads", uploads.len());
                        }
                    }
                }
            }
        }

        emit!(ActiveUploads { count: 0 });
        info!(
            "[upload] Finished: {} objects, {} bytes",
            uploaded.len(),
            uploaded.iter().map(|o| o.size).sum::<u64>()
        );
        uploaded.sort_by_key(|o| o.bucket);
        Ok(uploaded)
    }
}

/// Upload one staging file, then delete it.
async fn upload_bucket(
    storage: StorageProviderRef,
    attributes: Attributes,
    limits: UploadLimits,
    job: UploadJob,
) -> Result<UploadedObject, UploadError> {
    let start = Instant::now();
    let result = put_staged(&storage, &attributes, limits, &job).await;

    let status = if result.is_ok() {
        UploadStatus::Success
    } else {
        UploadStatus::Failed
    };
    emit!(UploadCompleted {
        status,
        bytes: job.size,
        duration: start.elapsed(),
    });

    if let Err(e) = &result {
        warn!(bucket = job.bucket, error = %e, "[upload] Upload failed");
    }
    result
}

async fn put_staged(
    storage: &StorageProviderRef,
    attributes: &Attributes,
    limits: UploadLimits,
    job: &UploadJob,
) -> Result<UploadedObject, UploadError> {
    let path = &job.staging_path;
    let staged = tokio::fs::metadata(path)
        .await
        .context(ReadStagingSnafu { path })?
        .len();

    let size = if storage.use_multipart(staged, limits.multipart_threshold) {
        put_in_parts(storage, attributes, limits, job).await?
    } else {
        let bytes = tokio::fs::read(path)
            .await
            .context(ReadStagingSnafu { path })?;
        let size = bytes.len() as u64;
        storage
            .put_object(&job.key, bytes.into(), attributes)
            .await
            .context(PutSnafu {
                key: storage.display_location(&job.key),
            })?;
        size
    };

    tokio::fs::remove_file(path)
        .await
        .context(RemoveStagingSnafu { path })?;

    info!(
        bucket = job.bucket,
        bytes = size,
        "[upload] Uploaded {}",
        storage.display_location(&job.key)
    );

    Ok(UploadedObject {
        bucket: job.bucket,
        key: job.key.clone(),
        size,
    })
}

/// Stream a staging file to a multipart upload, aborting it on failure.
async fn put_in_parts(
    storage: &StorageProviderRef,
    attributes: &Attributes,
    limits: UploadLimits,
    job: &UploadJob,
) -> Result<u64, UploadError> {
    let path = &job.staging_path;
    let file = tokio::fs::File::open(path)
        .await
        .context(ReadStagingSnafu { path })?;

    let mut writer = storage
        .put_multipart(
            &job.key,
            attributes,
            limits.part_size,
            limits.max_parts_in_flight,
        )
        .await
        .context(PutSnafu {
            key: storage.display_location(&job.key),
        })?;
    debug!(
        "[upload] Streaming bucket {} in {} byte parts",
        job.bucket, limits.part_size
    );

    match write_parts(storage, &mut writer, file, limits.part_size, job).await {
        Ok(size) => {
            writer.finish().await.context(PutSnafu {
                key: storage.display_location(&job.key),
            })?;
            Ok(size)
        }
        Err(e) => {
            if let Err(abort) = writer.abort().await {
                warn!(bucket = job.bucket, error = %abort, "[upload] Failed to abort multipart upload");
            }
            Err(e)
        }
    }
}

async fn write_parts(
    storage: &StorageProviderRef,
    writer: &mut MultipartWriter,
    file: tokio::fs::File,
    part_size: usize,
    job: &UploadJob,
) -> Result<u64, UploadError> {
    let path = &job.staging_path;
    let mut chunks = ReaderStream::with_capacity(file, part_size);
    let mut size = 0u64;

    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.context(ReadStagingSnafu { path })?;
        size += chunk.len() as u64;
        writer.write(chunk).await.context(PutSnafu {
            key: storage.display_location(&job.key),
        })?;
    }
    Ok(size)
}
