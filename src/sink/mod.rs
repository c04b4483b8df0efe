//! Per-bucket staging sinks.
//!
//! Each bucket gets one sink: a writer task that owns a staging file and
//! appends every chunk it receives, in order. The coordinator talks to a
//! sink through its [`SinkHandle`] and hears back through [`SinkEvent`]s on
//! a shared channel.
//!
//! Backpressure is byte accounting: a handle counts bytes handed to the
//! writer but not yet written, and reports saturation once that count
//! reaches the high-water mark. The writer sends `Drained` when it falls
//! back below the mark.

mod staging;

use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::SinkError;

/// Lifecycle of a sink as seen by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    /// Created, staging file not yet open.
    Unopened,
    /// Staging file open, waiting for every sink to open.
    Open,
    /// Accepting records.
    Writable,
    /// At or above the high-water mark.
    Saturated,
    /// Told no more records are coming; flushing.
    Draining,
    /// Staging file flushed and closed.
    Closed,
}

impl SinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SinkState::Unopened => "unopened",
            SinkState::Open => "open",
            SinkState::Writable => "writable",
            SinkState::Saturated => "saturated",
            SinkState::Draining => "draining",
            SinkState::Closed => "closed",
        }
    }

    /// Whether `next` may follow this state.
    pub fn can_become(&self, next: SinkState) -> bool {
        use SinkState::*;
        matches!(
            (self, next),
            (Unopened, Open)
                | (Open, Writable)
                | (Open, Draining)
                | (Writable, Saturated)
                | (Saturated, Writable)
                | (Writable, Draining)
                | (Saturated, Draining)
                | (Draining, Closed)
        )
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow.
    pub fn transition(&mut self, bucket: usize, next: SinkState) -> Result<(), SinkError> {
        if !self.can_become(next) {
            return Err(SinkError::InvalidTransition {
                bucket,
                from: self.as_str(),
                to: next.as_str(),
            });
        }
        *self = next;
        Ok(())
    }
}

/// A bucket's staging file after its sink closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedBucket {
    pub bucket: usize,
    pub path: PathBuf,
    pub bytes: u64,
    pub records: u64,
}

/// Notification from a sink's writer task.
#[derive(Debug)]
pub enum SinkEvent {
    /// Staging file created.
    Opened { bucket: usize },
    /// Buffered bytes fell below the high-water mark after saturation.
    Drained { bucket: usize },
    /// All data flushed and the file closed.
    Closed(StagedBucket),
    /// The writer hit an error and stopped.
    Failed { bucket: usize, error: SinkError },
}

impl SinkEvent {
    pub fn bucket(&self) -> usize {
        match self {
            SinkEvent::Opened { bucket }
            | SinkEvent::Drained { bucket }
            | SinkEvent::Failed { bucket, .. } => *bucket,
            SinkEvent::Closed(staged) => staged.bucket,
        }
    }
}

/// Byte accounting shared between a handle and its writer task.
#[derive(Debug, Default)]
struct Backlog {
    /// Bytes sent to the writer and not yet written.
    outstanding: AtomicUsize,
    /// Set when the handle reported saturation; cleared when the writer
    /// reports the drain.
    needs_drain: AtomicBool,
}

/// Staging file location for a bucket.
pub fn staging_path(dir: &Path, process_id: u32, bucket: usize) -> PathBuf {
    dir.join(format!("sleet-{process_id}-{bucket}"))
}

/// Coordinator-side handle to one sink.
#[derive(Debug)]
pub struct SinkHandle {
    bucket: usize,
    tx: Option<mpsc::UnboundedSender<Bytes>>,
    backlog: Arc<Backlog>,
    high_water_mark: usize,
}

impl SinkHandle {
    /// Queue a chunk for the staging file.
    ///
    /// Returns `Ok(false)` when the sink is saturated; the chunk is still
    /// accepted and the caller should stop writing until `Drained`.
    pub fn write(&self, chunk: Bytes) -> Result<bool, SinkError> {
        let len = chunk.len();
        let tx = self
            .tx
            .as_ref()
            .ok_or(SinkError::SinkGone { bucket: self.bucket })?;

        let outstanding = self.backlog.outstanding.fetch_add(len, Ordering::AcqRel) + len;
        let saturated = outstanding >= self.high_water_mark;
        if saturated {
            // Must be visible before the writer can consume this chunk.
            self.backlog.needs_drain.store(true, Ordering::Release);
        }

        tx.send(chunk)
            .map_err(|_| SinkError::SinkGone { bucket: self.bucket })?;
        Ok(!saturated)
    }

    /// Signal that no more data is coming. The writer flushes and closes.
    pub fn end(&mut self) {
        if self.tx.take().is_some() {
            debug!(bucket = self.bucket, "[sink] End of input");
        }
    }
}

/// Settings shared by every sink of a run.
#[derive(Debug, Clone)]
pub struct StagingConfig {
    pub dir: PathBuf,
    pub process_id: u32,
    pub high_water_mark: usize,
}

/// The N sinks of a run, indexed by bucket.
#[derive(Debug)]
pub struct SinkSet {
    sinks: Vec<SinkHandle>,
}

impl SinkSet {
    /// Spawn one writer task per bucket.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        reducers: usize,
        config: &StagingConfig,
        events: mpsc::UnboundedSender<SinkEvent>,
    ) -> Self {
        let sinks = (0..reducers)
            .map(|bucket| {
                let path = staging_path(&config.dir, config.process_id, bucket);
                let (tx, rx) = mpsc::unbounded_channel();
                let backlog = Arc::new(Backlog::default());

                tokio::spawn(staging::run_writer(
                    bucket,
                    path,
                    rx,
                    Arc::clone(&backlog),
                    config.high_water_mark,
                    events.clone(),
                ));

                SinkHandle {
                    bucket,
                    tx: Some(tx),
                    backlog,
                    high_water_mark: config.high_water_mark,
                }
            })
            .collect();

        Self { sinks }
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn get(&self, bucket: usize) -> Option<&SinkHandle> {
        self.sinks.get(bucket)
    }

    /// End every sink.
    pub fn end_all(&mut self) {
        for sink in &mut self.sinks {
            sink.end();
        }
    }
}
