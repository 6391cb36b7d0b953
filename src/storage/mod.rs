//! Multi-cloud storage abstraction.
//!
//! Provides a unified interface for reading and writing objects on S3, GCS,
//! Azure Blob Storage, and the local filesystem. A provider is rooted at a
//! URL (container plus optional key prefix); object paths are relative to it.
//! Object keys are parsed verbatim with [`parse_key`], never percent-encoded.

mod backend;
mod url;

pub use backend::{AzureConfig, BackendConfig, GcsConfig, LocalConfig, S3Config};
pub use url::{parse_key, split_object_url};

use bytes::Bytes;
use object_store::buffered::BufWriter;
use object_store::path::Path;
use object_store::{ObjectMeta, ObjectStore, PutMode, PutOptions, PutPayload, UpdateVersion};
use snafu::prelude::*;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::emit;
use crate::error::{ObjectStoreSnafu, StorageError};
use crate::metrics::events::{
    RequestStatus, StorageOperation, StorageRequest, StorageRequestDuration,
};

/// A reference-counted storage provider.
pub type StorageProviderRef = Arc<StorageProvider>;

/// Settings for streamed uploads.
#[derive(Debug, Clone, Copy)]
pub struct UploadConfig {
    /// Size of each uploaded part in bytes. Objects smaller than one part
    /// are written with a single PUT.
    pub part_size: usize,
    /// Maximum parts uploaded concurrently.
    pub max_concurrent_parts: usize,
}

/// Storage provider that abstracts over different cloud storage backends.
#[derive(Clone)]
pub struct StorageProvider {
    /// Key prefix under the container that all paths are relative to.
    key: Option<Path>,
    object_store: Arc<dyn ObjectStore>,
    canonical_url: String,
}

impl std::fmt::Debug for StorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StorageProvider<{}>", self.canonical_url)
    }
}

/// Record status and latency of a single storage request.
pub(crate) fn record_request<T, E>(
    operation: StorageOperation,
    start: Instant,
    result: &Result<T, E>,
) {
    let status = if result.is_ok() {
        RequestStatus::Success
    } else {
        RequestStatus::Error
    };
    emit!(StorageRequest { operation, status });
    emit!(StorageRequestDuration {
        operation,
        duration: start.elapsed(),
    });
}

impl StorageProvider {
    /// Create a storage provider rooted at `url`, creating a missing local root.
    pub async fn for_url_with_options(
        url: &str,
        options: HashMap<String, String>,
    ) -> Result<Self, StorageError> {
        Self::open(url, &options, true).await
    }

    /// Create a storage provider for a location that must already exist.
    ///
    /// Unlike [`Self::for_url_with_options`], a missing local directory is
    /// not created.
    pub async fn for_existing_url_with_options(
        url: &str,
        options: HashMap<String, String>,
    ) -> Result<Self, StorageError> {
        Self::open(url, &options, false).await
    }

    async fn open(
        url: &str,
        options: &HashMap<String, String>,
        create_local_root: bool,
    ) -> Result<Self, StorageError> {
        let config = BackendConfig::parse_url(url)?;
        let stores = config.build(options, create_local_root).await?;

        Ok(Self {
            key: config.key().cloned(),
            object_store: stores.object_store,
            canonical_url: stores.canonical_url,
        })
    }

    /// Wrap an existing object store, rooted at `canonical_url`.
    ///
    /// Used to plug in stores without a URL scheme of their own.
    pub fn from_object_store(
        object_store: Arc<dyn ObjectStore>,
        canonical_url: impl Into<String>,
    ) -> Self {
        Self {
            key: None,
            object_store,
            canonical_url: canonical_url.into(),
        }
    }

    /// Canonical URL of the provider root.
    pub fn canonical_url(&self) -> &str {
        &self.canonical_url
    }

    /// The underlying store, for readers that issue their own range requests.
    pub fn object_store(&self) -> Arc<dyn ObjectStore> {
        self.object_store.clone()
    }

    /// Qualify a path with the configured key prefix.
    pub fn qualify_path<'a>(&self, path: &'a Path) -> Cow<'a, Path> {
        match &self.key {
            Some(prefix) => Cow::Owned(prefix.parts().chain(path.parts()).collect()),
            None => Cow::Borrowed(path),
        }
    }

    /// Get the contents of an object.
    pub async fn get(&self, path: &Path) -> Result<Bytes, StorageError> {
        let start = Instant::now();
        let result = self.object_store.get(&self.qualify_path(path)).await;
        record_request(StorageOperation::Get, start, &result);

        result
            .context(ObjectStoreSnafu)?
            .bytes()
            .await
            .context(ObjectStoreSnafu)
    }

    /// Get an object's metadata without fetching its contents.
    pub async fn head(&self, path: &Path) -> Result<ObjectMeta, StorageError> {
        let start = Instant::now();
        let result = self.object_store.head(&self.qualify_path(path)).await;
        record_request(StorageOperation::Head, start, &result);

        result.context(ObjectStoreSnafu)
    }

    /// Get an object together with the version token for a conditional update.
    ///
    /// Returns `None` if the object does not exist.
    pub async fn get_versioned(
        &self,
        path: &Path,
    ) -> Result<Option<(Bytes, UpdateVersion)>, StorageError> {
        let start = Instant::now();
        let result = self.object_store.get(&self.qualify_path(path)).await;
        record_request(StorageOperation::Get, start, &result);

        let result = match result {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(source) => return Err(StorageError::ObjectStore { source }),
        };

        let version = UpdateVersion {
            e_tag: result.meta.e_tag.clone(),
            version: result.meta.version.clone(),
        };
        let bytes = result.bytes().await.context(ObjectStoreSnafu)?;
        Ok(Some((bytes, version)))
    }

    /// Put a payload to a path, replacing any existing object.
    pub async fn put_payload(&self, path: &Path, payload: PutPayload) -> Result<(), StorageError> {
        let start = Instant::now();
        let result = self
            .object_store
            .put(&self.qualify_path(path), payload)
            .await;
        record_request(StorageOperation::Put, start, &result);

        result.context(ObjectStoreSnafu)?;
        Ok(())
    }

    /// Put a payload only if the stored object still matches `mode`.
    ///
    /// Backends without conditional put support fall back to an
    /// unconditional overwrite. A lost race surfaces as an error for which
    /// [`StorageError::is_conflict`] is true.
    pub async fn put_conditional(
        &self,
        path: &Path,
        payload: PutPayload,
        mode: PutMode,
    ) -> Result<(), StorageError> {
        let qualified = self.qualify_path(path);
        let options = PutOptions {
            mode,
            ..Default::default()
        };

        let start = Instant::now();
        let result = self
            .object_store
            .put_opts(&qualified, payload.clone(), options)
            .await;

        match result {
            Err(object_store::Error::NotImplemented) => {
                debug!(
                    "Conditional put unsupported by {}, overwriting {}",
                    self.canonical_url, qualified
                );
                self.put_payload(path, payload).await
            }
            result => {
                record_request(StorageOperation::Put, start, &result);
                result.context(ObjectStoreSnafu)?;
                Ok(())
            }
        }
    }

    /// Open a buffered writer for `path`.
    ///
    /// Writes below `upload.part_size` are sent as a single PUT when the
    /// writer is shut down; larger ones switch to a multipart upload with
    /// parts of that size. Nothing is visible at `path` until shutdown
    /// succeeds, and an aborted writer leaves no parts behind.
    pub fn buffered_writer(&self, path: &Path, upload: UploadConfig) -> BufWriter {
        BufWriter::with_capacity(
            self.object_store.clone(),
            self.qualify_path(path).into_owned(),
            upload.part_size.max(1),
        )
        .with_max_concurrency(upload.max_concurrent_parts.max(1))
    }
}
