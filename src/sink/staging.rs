//! Writer task behind each sink.

use bytes::Bytes;
use snafu::ResultExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{Backlog, SinkEvent, StagedBucket};
use crate::emit;
use crate::error::{CreateStagingSnafu, FlushStagingSnafu, SinkError, WriteStagingSnafu};
use crate::metrics::events::{BytesStaged, SinkClosed};

/// Own the staging file for `bucket` until the handle ends the sink.
///
/// Reports `Opened` once the file exists, `Drained` after saturation clears,
/// and finally `Closed` or `Failed`. The chunk receiver is held until the
/// final event is sent, so a failed writer's event is queued before any
/// further write on the handle can fail.
pub(super) async fn run_writer(
    bucket: usize,
    path: PathBuf,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    backlog: Arc<Backlog>,
    high_water_mark: usize,
    events: mpsc::UnboundedSender<SinkEvent>,
) {
    let event = match write_staging(bucket, &path, &mut rx, &backlog, high_water_mark, &events).await
    {
        Ok(staged) => {
            emit!(SinkClosed {
                bucket,
                bytes: staged.bytes,
            });
            SinkEvent::Closed(staged)
        }
        Err(error) => {
            warn!(bucket, error = %error, "[sink] Writer failed");
            SinkEvent::Failed { bucket, error }
        }
    };

    // The coordinator may already be gone after a fatal error elsewhere.
    let _ = events.send(event);
    drop(rx);
}

async fn write_staging(
    bucket: usize,
    path: &Path,
    rx: &mut mpsc::UnboundedReceiver<Bytes>,
    backlog: &Backlog,
    high_water_mark: usize,
    events: &mpsc::UnboundedSender<SinkEvent>,
) -> Result<StagedBucket, SinkError> {
    let file = File::create(path).await.context(CreateStagingSnafu { path })?;
    debug!(bucket, path = %path.display(), "[sink] Staging file created");
    let _ = events.send(SinkEvent::Opened { bucket });

    let mut writer = BufWriter::new(file);
    let mut bytes = 0u64;
    let mut records = 0u64;

    while let Some(chunk) = rx.recv().await {
        writer
            .write_all(&chunk)
            .await
            .context(WriteStagingSnafu { path })?;

        bytes += chunk.len() as u64;
        records += 1;
        emit!(BytesStaged {
            bytes: chunk.len() as u64,
        });

        let remaining = backlog
            .outstanding
            .fetch_sub(chunk.len(), Ordering::AcqRel)
            .saturating_sub(chunk.len());
        if remaining < high_water_mark && backlog.needs_drain.swap(false, Ordering::AcqRel) {
            let _ = events.send(SinkEvent::Drained { bucket });
        }
    }

    writer.flush().await.context(FlushStagingSnafu { path })?;
    let mut file = writer.into_inner();
    file.sync_all().await.context(FlushStagingSnafu { path })?;
    file.shutdown().await.context(FlushStagingSnafu { path })?;

    debug!(bucket, bytes, records, "[sink] Staging file closed");
    Ok(StagedBucket {
        bucket,
        path: path.to_path_buf(),
        bytes,
        records,
    })
}
