//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence in a conversion run.
//! Events implement the `InternalEvent` trait which emits the corresponding
//! Prometheus metric.

use metrics::{counter, gauge, histogram};
use std::time::Duration;
use tracing::trace;

use crate::metadata::ProcessingStatus;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Event emitted when a job enters a new processing status.
///
/// Also tracks how many jobs are between IN_PROGRESS and a terminal status.
pub struct JobStatusChanged {
    pub status: ProcessingStatus,
}

impl InternalEvent for JobStatusChanged {
    fn emit(self) {
        trace!(status = self.status.as_str(), "Job status changed");
        counter!("parquet_relay_job_transitions_total", "status" => self.status.as_str())
            .increment(1);

        if self.status == ProcessingStatus::InProgress {
            gauge!("parquet_relay_jobs_in_flight").increment(1.0);
        } else if self.status.is_terminal() {
            gauge!("parquet_relay_jobs_in_flight").decrement(1.0);
        }
    }
}

/// Event emitted when a status update could not be persisted.
pub struct MetadataUpdateFailed {
    pub status: ProcessingStatus,
}

impl InternalEvent for MetadataUpdateFailed {
    fn emit(self) {
        trace!(status = self.status.as_str(), "Metadata update failed");
        counter!(
            "parquet_relay_metadata_update_failures_total",
            "status" => self.status.as_str()
        )
        .increment(1);
    }
}

/// Event emitted when rows are encoded as JSON lines.
pub struct RecordsConverted {
    pub count: u64,
}

impl InternalEvent for RecordsConverted {
    fn emit(self) {
        trace!(count = self.count, "Records converted");
        counter!("parquet_relay_records_converted_total").increment(self.count);
    }
}

/// Event emitted when source bytes are read.
pub struct BytesRead {
    pub bytes: u64,
}

impl InternalEvent for BytesRead {
    fn emit(self) {
        trace!(bytes = self.bytes, "Bytes read");
        counter!("parquet_relay_bytes_read_total").increment(self.bytes);
    }
}

/// Event emitted when output bytes are written.
pub struct BytesWritten {
    pub bytes: u64,
}

impl InternalEvent for BytesWritten {
    fn emit(self) {
        trace!(bytes = self.bytes, "Bytes written");
        counter!("parquet_relay_bytes_written_total").increment(self.bytes);
    }
}

/// Event emitted when a conversion finishes, successfully or not.
pub struct ConversionCompleted {
    pub status: ProcessingStatus,
    pub duration: Duration,
}

impl InternalEvent for ConversionCompleted {
    fn emit(self) {
        trace!(
            status = self.status.as_str(),
            duration_ms = self.duration.as_millis(),
            "Conversion completed"
        );
        histogram!(
            "parquet_relay_conversion_duration_seconds",
            "status" => self.status.as_str()
        )
        .record(self.duration.as_secs_f64());
    }
}

// ============================================================================
// Storage operation events
// ============================================================================

/// Storage operation types.
#[derive(Debug, Clone, Copy)]
pub enum StorageOperation {
    Get,
    Head,
    Put,
    /// A streamed object upload, from first byte to completion.
    Upload,
    AbortUpload,
}

impl StorageOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageOperation::Get => "get",
            StorageOperation::Head => "head",
            StorageOperation::Put => "put",
            StorageOperation::Upload => "upload",
            StorageOperation::AbortUpload => "abort_upload",
        }
    }
}

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

/// Event emitted when a storage request completes.
pub struct StorageRequest {
    pub operation: StorageOperation,
    pub status: RequestStatus,
}

impl InternalEvent for StorageRequest {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            status = self.status.as_str(),
            "Storage request"
        );
        counter!(
            "parquet_relay_storage_requests_total",
            "operation" => self.operation.as_str(),
            "status" => self.status.as_str()
        )
        .increment(1);
    }
}

/// Event emitted when a storage request completes with duration.
pub struct StorageRequestDuration {
    pub operation: StorageOperation,
    pub duration: Duration,
}

impl InternalEvent for StorageRequestDuration {
    fn emit(self) {
        histogram!(
            "parquet_relay_storage_request_duration_seconds",
            "operation" => self.operation.as_str()
        )
        .record(self.duration.as_secs_f64());
    }
}
