//! Status record contents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use snafu::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

use super::{ProcessingStatus, format_timestamp};
use crate::error::{DeserializeSnafu, MetadataError};

/// Field names used in status records.
pub mod fields {
    pub const FILE_ID: &str = "file_id";
    pub const PROCESSING_STATUS: &str = "processing_status";
    pub const UPDATED_AT: &str = "updated_at";
    pub const CREATED_AT: &str = "created_at";
    pub const SOURCE_FILE_PATH: &str = "source_file_path";
    pub const STARTED_AT: &str = "started_at";
    pub const ENDED_AT: &str = "ended_at";
    pub const OUTPUT_FILE_PATH: &str = "output_file_path";
    pub const RECORD_COUNT: &str = "record_count";
    pub const ERROR_MESSAGE: &str = "error_message";

    /// Fields owned by the store rather than by callers.
    pub fn is_reserved(name: &str) -> bool {
        matches!(name, FILE_ID | PROCESSING_STATUS | UPDATED_AT | CREATED_AT)
    }
}

/// A partial update: attributes to set and attributes to delete.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes {
    values: BTreeMap<String, Value>,
    removals: BTreeSet<String>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key`, cancelling any earlier removal of it.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        self.removals.remove(&key);
        self.values.insert(key, value.into());
        self
    }

    /// Store a timestamp under `key`.
    pub fn set_timestamp(self, key: impl Into<String>, at: DateTime<Utc>) -> Self {
        self.set(key, format_timestamp(at))
    }

    /// Delete `key` from the stored record, cancelling any earlier set.
    pub fn remove(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.values.remove(&key);
        self.removals.insert(key);
        self
    }

    pub fn values(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn removals(&self) -> impl Iterator<Item = &String> {
        self.removals.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.removals.is_empty()
    }

    /// Attributes for entering IN_PROGRESS.
    ///
    /// Clears every field left over from an earlier run of the same file.
    pub fn in_progress(started_at: DateTime<Utc>, source_file_path: &str) -> Self {
        Self::new()
            .set_timestamp(fields::STARTED_AT, started_at)
            .set(fields::SOURCE_FILE_PATH, source_file_path)
            .remove(fields::ENDED_AT)
            .remove(fields::RECORD_COUNT)
            .remove(fields::ERROR_MESSAGE)
            .remove(fields::OUTPUT_FILE_PATH)
    }

    /// Attributes for entering COMPLETED.
    pub fn completed(ended_at: DateTime<Utc>, output_file_path: &str, record_count: u64) -> Self {
        Self::new()
            .set_timestamp(fields::ENDED_AT, ended_at)
            .set(fields::OUTPUT_FILE_PATH, output_file_path)
            .set(fields::RECORD_COUNT, record_count)
            .remove(fields::ERROR_MESSAGE)
    }

    /// Attributes for entering FAILED.
    pub fn failed(ended_at: DateTime<Utc>, error_message: &str) -> Self {
        Self::new()
            .set_timestamp(fields::ENDED_AT, ended_at)
            .set(fields::ERROR_MESSAGE, error_message)
            .remove(fields::RECORD_COUNT)
            .remove(fields::OUTPUT_FILE_PATH)
    }
}

/// Typed view of a stored status record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub file_id: String,
    pub processing_status: ProcessingStatus,
    pub updated_at: DateTime<Utc>,
    /// When the record was first written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Attributes beyond the well-known ones.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FileRecord {
    /// Interpret a stored document.
    pub fn from_document(file_id: &str, document: Map<String, Value>) -> Result<Self, MetadataError> {
        serde_json::from_value(Value::Object(document)).context(DeserializeSnafu { file_id })
    }
}
