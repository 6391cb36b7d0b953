//! Status store backed by object storage.
//!
//! The record for file id K in table T is the JSON document `T/K.json`
//! under the store root. Updates are read-merge-write with a conditional
//! put, retried when another writer got there first.

use async_trait::async_trait;
use object_store::path::Path;
use object_store::{PutMode, PutPayload};
use serde_json::{Map, Value};
use snafu::prelude::*;
use std::sync::Arc;
use tracing::debug;

use super::{Attributes, FileRecord, MetadataStore, ProcessingStatus, apply_update};
use crate::clock::Clock;
use crate::config::is_single_segment;
use crate::error::{
    ConflictSnafu, DeserializeSnafu, InvalidRecordKeySnafu, MetadataError, SerializeSnafu, StoreSnafu,
};
use crate::storage::StorageProviderRef;

/// Attempts per update before giving up on a contended record.
const MAX_ATTEMPTS: usize = 5;

pub struct ObjectMetadataStore {
    storage: StorageProviderRef,
    table: String,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for ObjectMetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectMetadataStore")
            .field("root", &self.storage.canonical_url())
            .field("table", &self.table)
            .finish()
    }
}

impl ObjectMetadataStore {
    pub fn new(storage: StorageProviderRef, table: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage,
            table: table.into(),
            clock,
        }
    }

    fn record_path(&self, file_id: &str) -> Result<Path, MetadataError> {
        ensure!(is_single_segment(file_id), InvalidRecordKeySnafu { file_id });
        Path::parse(format!("{}/{file_id}.json", self.table))
            .ok()
            .context(InvalidRecordKeySnafu { file_id })
    }

    fn parse(file_id: &str, bytes: &[u8]) -> Result<Map<String, Value>, MetadataError> {
        serde_json::from_slice(bytes).context(DeserializeSnafu { file_id })
    }
}

#[async_trait]
impl MetadataStore for ObjectMetadataStore {
    async fn update(
        &self,
        file_id: &str,
        status: ProcessingStatus,
        attributes: &Attributes,
    ) -> Result<(), MetadataError> {
        let path = self.record_path(file_id)?;

        for attempt in 1..=MAX_ATTEMPTS {
            let current = self
                .storage
                .get_versioned(&path)
                .await
                .context(StoreSnafu)?;

            let (mut document, mode) = match current {
                Some((bytes, version)) => (Self::parse(file_id, &bytes)?, PutMode::Update(version)),
                None => (Map::new(), PutMode::Create),
            };

            apply_update(&mut document, file_id, status, attributes, self.clock.now());
            let body = serde_json::to_vec(&document).context(SerializeSnafu)?;

            match self
                .storage
                .put_conditional(&path, PutPayload::from(body), mode)
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) if e.is_conflict() => {
                    debug!(
                        "Concurrent update to {} (attempt {}/{}), retrying",
                        path, attempt, MAX_ATTEMPTS
                    );
                }
                Err(source) => return Err(MetadataError::Store { source }),
            }
        }

        ConflictSnafu {
            file_id,
            attempts: MAX_ATTEMPTS,
        }
        .fail()
    }

    async fn get(&self, file_id: &str) -> Result<Option<FileRecord>, MetadataError> {
        let path = self.record_path(file_id)?;
        let Some((bytes, _)) = self
            .storage
            .get_versioned(&path)
            .await
            .context(StoreSnafu)?
        else {
            return Ok(None);
        };

        let document = Self::parse(file_id, &bytes)?;
        FileRecord::from_document(file_id, document).map(Some)
    }
}
