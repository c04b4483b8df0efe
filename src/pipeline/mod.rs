//! The split pipeline.
//!
//! # Architecture
//!
//! A run has two phases:
//! - **Fan-out**: the coordinator reads records, extracts keys, selects
//!   buckets and writes to N staging sinks, pausing input while any sink
//!   is over its high-water mark.
//! - **Upload**: once input is exhausted and every sink has closed, each
//!   staging file is PUT to `<output base><run id>.<bucket>` with bounded
//!   concurrency and then deleted.
//!
//! Any error aborts the run. Nothing is uploaded unless every record was
//! routed.

mod completion;
mod fanout;
mod input;
mod upload;

use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::SplitConfig;
use crate::error::PipelineError;
use crate::sink::{SinkSet, StagingConfig};
use crate::storage::{StorageProvider, StorageProviderRef, attributes_from_headers};

pub use completion::CompletionState;
pub use fanout::{FanoutCoordinator, Handoff, RoutingStats};
pub use input::{Record, RecordDecoder};
pub use upload::{UploadJob, UploadLimits, UploadQueue, UploadedObject};

/// Summary of a finished run.
#[derive(Debug, Clone)]
pub struct SplitStats {
    pub run_id: Uuid,
    pub records: u64,
    pub bytes_staged: u64,
    /// Records per bucket, indexed by bucket.
    pub bucket_records: Vec<u64>,
    pub input_pauses: u64,
    pub objects: Vec<UploadedObject>,
}

impl SplitStats {
    pub fn objects_uploaded(&self) -> usize {
        self.objects.len()
    }

    pub fn bytes_uploaded(&self) -> u64 {
        self.objects.iter().map(|o| o.size).sum()
    }
}

/// Split `input` according to `config`, uploading to the configured output base.
pub async fn run_split<R>(config: &SplitConfig, input: R) -> Result<SplitStats, PipelineError>
where
    R: AsyncRead + Unpin,
{
    let storage = StorageProvider::for_url_with_options(
        &config.output_base,
        config.storage_options.clone(),
    )
    .await?;
    run_split_with_storage(config, Arc::new(storage), input).await
}

/// Split `input` into buckets and upload them through `storage`.
pub async fn run_split_with_storage<R>(
    config: &SplitConfig,
    storage: StorageProviderRef,
    input: R,
) -> Result<SplitStats, PipelineError>
where
    R: AsyncRead + Unpin,
{
    let run_id = Uuid::new_v4();
    info!(
        %run_id,
        reducers = config.reducers,
        key = config.extractor.mode(),
        "Starting split"
    );

    let staging = StagingConfig {
        dir: config.staging_dir.clone(),
        process_id: std::process::id(),
        high_water_mark: config.high_water_mark,
    };
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let sinks = SinkSet::spawn(config.reducers, &staging, events_tx);

    let handoff = FanoutCoordinator::new(&config.extractor, config.partitioner, sinks, events_rx)
        .run(input)
        .await?;
    debug!(buckets = handoff.staged.len(), "Handing off to upload");

    let attributes = attributes_from_headers(&config.headers, config.copies);
    let queue = UploadQueue::spawn(storage.clone(), attributes, config.upload);
    for staged in &handoff.staged {
        let job = UploadJob {
            bucket: staged.bucket,
            staging_path: staged.path.clone(),
            key: storage.object_key(&format!("{run_id}.{}", staged.bucket)),
            size: staged.bytes,
        };
        if queue.submit(job).await.is_err() {
            // The queue stopped on a failed upload; finish() returns it.
            break;
        }
    }
    let objects = queue.finish().await?;

    let stats = SplitStats {
        run_id,
        records: handoff.stats.records,
        bytes_staged: handoff.stats.bytes,
        bucket_records: handoff.stats.bucket_records,
        input_pauses: handoff.stats.input_pauses,
        objects,
    };
    info!(
        %run_id,
        records = stats.records,
        objects = stats.objects_uploaded(),
        bytes = stats.bytes_uploaded(),
        pauses = stats.input_pauses,
        "Split complete"
    );
    Ok(stats)
}
