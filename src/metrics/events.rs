//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence in the splitter.
//! Events implement the `InternalEvent` trait which emits the corresponding
//! counter, gauge or histogram.

use metrics::{counter, gauge, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Event emitted once per bucket, when its sink closes, with the records
/// routed to it.
pub struct RecordsRouted {
    pub bucket: usize,
    pub count: u64,
}

impl InternalEvent for RecordsRouted {
    fn emit(self) {
        trace!(bucket = self.bucket, count = self.count, "Records routed");
        counter!("sleet_records_routed_total", "bucket" => self.bucket.to_string())
            .increment(self.count);
    }
}

/// Event emitted when bytes are appended to a staging file.
pub struct BytesStaged {
    pub bytes: u64,
}

impl InternalEvent for BytesStaged {
    fn emit(self) {
        trace!(bytes = self.bytes, "Bytes staged");
        counter!("sleet_bytes_staged_total").increment(self.bytes);
    }
}

/// Event emitted when a sink crosses its high-water mark.
pub struct SinkSaturated {
    pub bucket: usize,
}

impl InternalEvent for SinkSaturated {
    fn emit(self) {
        trace!(bucket = self.bucket, "Sink saturated");
        counter!("sleet_sink_saturations_total").increment(1);
    }
}

/// Event emitted when the number of saturated sinks changes.
pub struct BlockedSinks {
    pub count: usize,
}

impl InternalEvent for BlockedSinks {
    fn emit(self) {
        trace!(count = self.count, "Blocked sinks");
        gauge!("sleet_blocked_sinks").set(self.count as f64);
    }
}

/// Event emitted when input reading is paused for backpressure.
pub struct InputPaused;

impl InternalEvent for InputPaused {
    fn emit(self) {
        trace!("Input paused");
        counter!("sleet_input_pauses_total").increment(1);
    }
}

/// Event emitted when a sink finishes flushing its staging file.
pub struct SinkClosed {
    pub bucket: usize,
    pub bytes: u64,
}

impl InternalEvent for SinkClosed {
    fn emit(self) {
        trace!(bucket = self.bucket, bytes = self.bytes, "Sink closed");
        counter!("sleet_sinks_closed_total").increment(1);
    }
}

// ============================================================================
// Upload events
// ============================================================================

/// Status of an upload.
#[derive(Debug, Clone, Copy)]
pub enum UploadStatus {
    Success,
    Failed,
}

impl UploadStatus {
    fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Success => "success",
            UploadStatus::Failed => "failed",
        }
    }
}

/// Event emitted when an upload finishes.
pub struct UploadCompleted {
    pub status: UploadStatus,
    pub bytes: u64,
    pub duration: Duration,
}

impl InternalEvent for UploadCompleted {
    fn emit(self) {
        trace!(
            status = self.status.as_str(),
            bytes = self.bytes,
            duration_ms = self.duration.as_millis(),
            "Upload completed"
        );
        counter!("sleet_uploads_total", "status" => self.status.as_str()).increment(1);
        if matches!(self.status, UploadStatus::Success) {
            counter!("sleet_bytes_uploaded_total").increment(self.bytes);
        }
        histogram!("sleet_upload_duration_seconds").record(self.duration.as_secs_f64());
    }
}

/// Event emitted when the number of active uploads changes.
pub struct ActiveUploads {
    pub count: usize,
}

impl InternalEvent for ActiveUploads {
    fn emit(self) {
        trace!(count = self.count, "Active uploads");
        gauge!("sleet_active_uploads").set(self.count as f64);
    }
}

// ============================================================================
// Storage operation events
// ============================================================================

/// Status of a storage request.
#[derive(Debug, Clone, Copy)]
pub enum RequestStatus {
    Success,
    Error,
}

impl RequestStatus {
    fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Success => "success",
            RequestStatus::Error => "error",
        }
    }
}

/// Kind of storage request.
#[derive(Debug, Clone, Copy)]
pub enum StorageOperation {
    /// Single-request PUT.
    Put,
    /// A complete multipart upload, from create to commit.
    Multipart,
}

impl StorageOperation {
    fn as_str(&self) -> &'static str {
        match self {
            StorageOperation::Put => "put",
            StorageOperation::Multipart => "multipart",
        }
    }
}

/// Event emitted when a storage write completes.
pub struct StorageRequest {
    pub operation: StorageOperation,
    pub status: RequestStatus,
    pub duration: Duration,
}

impl InternalEvent for StorageRequest {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            status = self.status.as_str(),
            duration_ms = self.duration.as_millis(),
            "Storage request"
        );
        counter!(
            "sleet_storage_requests_total",
            "operation" => self.operation.as_str(),
            "status" => self.status.as_str()
        )
        .increment(1);
        histogram!(
            "sleet_storage_request_duration_seconds",
            "operation" => self.operation.as_str()
        )
        .record(self.duration.as_secs_f64());
    }
}
