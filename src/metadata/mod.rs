//! Per-file status records.
//!
//! A status record is keyed by file id and is only ever changed through
//! partial upserts: each update sets `processing_status` and `updated_at`,
//! merges the supplied attributes, and deletes the attributes marked for
//! removal. Fields not named by an update are left untouched. The update
//! that creates a record also stamps its `created_at`.
//!
//! [`MetadataClient`] is what the pipeline talks to. It never fails: a
//! store error is logged and counted, and the run carries on.

mod memory;
mod object;
mod record;

pub use memory::MemoryMetadataStore;
pub use object::ObjectMetadataStore;
pub use record::{Attributes, FileRecord, fields};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::emit;
use crate::error::MetadataError;
use crate::metrics::events::MetadataUpdateFailed;

/// Lifecycle state of one file conversion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "PENDING",
            ProcessingStatus::InProgress => "IN_PROGRESS",
            ProcessingStatus::Completed => "COMPLETED",
            ProcessingStatus::Failed => "FAILED",
        }
    }

    /// True once the run has ended, successfully or not.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessingStatus::Completed | ProcessingStatus::Failed
        )
    }

    /// Whether a job in this state may move to `next` within one run.
    pub fn can_transition_to(&self, next: ProcessingStatus) -> bool {
        matches!(
            (self, next),
            (ProcessingStatus::Pending, ProcessingStatus::InProgress)
                | (ProcessingStatus::InProgress, ProcessingStatus::Completed)
                | (ProcessingStatus::InProgress, ProcessingStatus::Failed)
        )
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable key-value store holding one status record per file id.
///
/// Each `update` call must be atomic per key: concurrent updates to the
/// same record may interleave, but neither may lose the other's fields.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Upsert the record for `file_id`, creating it if absent.
    async fn update(
        &self,
        file_id: &str,
        status: ProcessingStatus,
        attributes: &Attributes,
    ) -> Result<(), MetadataError>;

    /// Read the record for `file_id`, if one has been written.
    async fn get(&self, file_id: &str) -> Result<Option<FileRecord>, MetadataError>;
}

/// Format a timestamp the way it is stored in status records.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Merge one update into the stored document for `file_id`.
///
/// `file_id`, `processing_status` and `updated_at` are always set from the
/// arguments, and `created_at` is set once when the record is first
/// written; attributes with those names are ignored.
pub fn apply_update(
    document: &mut Map<String, Value>,
    file_id: &str,
    status: ProcessingStatus,
    attributes: &Attributes,
    now: DateTime<Utc>,
) {
    for key in attributes.removals() {
        if !fields::is_reserved(key) {
            document.remove(key);
        }
    }

    for (key, value) in attributes.values() {
        if fields::is_reserved(key) {
            debug!("Ignoring reserved attribute {} for {}", key, file_id);
            continue;
        }
        document.insert(key.clone(), value.clone());
    }

    document.insert(fields::FILE_ID.to_string(), Value::from(file_id));
    document.insert(
        fields::PROCESSING_STATUS.to_string(),
        Value::from(status.as_str()),
    );
    document.insert(
        fields::UPDATED_AT.to_string(),
        Value::from(format_timestamp(now)),
    );
    document
        .entry(fields::CREATED_AT)
        .or_insert_with(|| Value::from(format_timestamp(now)));
}

/// Best-effort status recorder used by the pipeline.
#[derive(Clone)]
pub struct MetadataClient {
    store: Arc<dyn MetadataStore>,
}

impl fmt::Debug for MetadataClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MetadataClient")
    }
}

impl MetadataClient {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }

    /// Record a status change. Failures are logged and swallowed.
    pub async fn update(&self, file_id: &str, status: ProcessingStatus, attributes: Attributes) {
        match self.store.update(file_id, status, &attributes).await {
            Ok(()) => debug!("Recorded {} for {}", status, file_id),
            Err(e) => {
                emit!(MetadataUpdateFailed { status });
                warn!(
                    file_id = file_id,
                    status = status.as_str(),
                    "Error updating metadata: {}",
                    e
                );
            }
        }
    }

    /// Read back a record. Unlike `update`, errors are returned.
    pub async fn get(&self, file_id: &str) -> Result<Option<FileRecord>, MetadataError> {
        self.store.get(file_id).await
    }
}
