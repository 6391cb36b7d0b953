//! Process-local status store.
//!
//! Nothing is persisted. Used by tests and by `--dry-run`.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use super::{Attributes, FileRecord, MetadataStore, ProcessingStatus, apply_update};
use crate::clock::{Clock, SystemClock};
use crate::error::MetadataError;

fn poisoned<T>(_: PoisonError<T>) -> MetadataError {
    MetadataError::Unavailable {
        message: "lock poisoned".to_string(),
    }
}

/// In-memory status store keyed by file id.
pub struct MemoryMetadataStore {
    records: Mutex<HashMap<String, Map<String, Value>>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for MemoryMetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryMetadataStore").finish_non_exhaustive()
    }
}

impl Default for MemoryMetadataStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MemoryMetadataStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Raw stored document, including attributes `FileRecord` does not model.
    pub fn document(&self, file_id: &str) -> Option<Map<String, Value>> {
        self.records.lock().ok()?.get(file_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn update(
        &self,
        file_id: &str,
        status: ProcessingStatus,
        attributes: &Attributes,
    ) -> Result<(), MetadataError> {
        let now = self.clock.now();
        let mut records = self.records.lock().map_err(poisoned)?;
        let document = records.entry(file_id.to_string()).or_default();
        apply_update(document, file_id, status, attributes, now);
        Ok(())
    }

    async fn get(&self, file_id: &str) -> Result<Option<FileRecord>, MetadataError> {
        let document = self.records.lock().map_err(poisoned)?.get(file_id).cloned();
        document
            .map(|doc| FileRecord::from_document(file_id, doc))
            .transpose()
    }
}
