//! Source object access.
//!
//! A source location is the URL of a single Parquet object. The provider
//! is rooted at the object's parent so that a missing object surfaces as
//! a not-found read rather than a configuration problem. The object name
//! is used verbatim, so `report[1].parquet` is read as exactly that key.

pub mod reader;

pub use reader::ParquetDataset;

use object_store::path::Path;
use parquet::arrow::async_reader::ParquetObjectReader;
use snafu::prelude::*;
use std::collections::HashMap;
use tracing::debug;

use crate::emit;
use crate::error::{FetchSnafu, OpenSourceSnafu, ReadError};
use crate::metrics::events::BytesRead;
use crate::storage::{StorageProvider, parse_key, split_object_url};

/// A single source object.
#[derive(Debug)]
pub struct SourceObject {
    url: String,
    name: Path,
    storage: StorageProvider,
}

impl SourceObject {
    /// Resolve `url` to a storage backend without fetching anything.
    pub async fn open(url: &str, options: HashMap<String, String>) -> Result<Self, ReadError> {
        let (parent, name) = split_object_url(url).context(OpenSourceSnafu { url })?;
        let name = parse_key(name).context(OpenSourceSnafu { url })?;
        let storage = StorageProvider::for_existing_url_with_options(parent, options)
            .await
            .context(OpenSourceSnafu { url })?;

        Ok(Self {
            url: url.to_string(),
            name,
            storage,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Look the object up and open it as a Parquet dataset.
    ///
    /// A missing object fails here with a not-found [`ReadError::Fetch`];
    /// row data is only pulled once the dataset is streamed.
    pub async fn dataset(&self, batch_size: usize) -> Result<ParquetDataset, ReadError> {
        let meta = self
            .storage
            .head(&self.name)
            .await
            .context(FetchSnafu { url: &self.url })?;

        emit!(BytesRead { bytes: meta.size });
        debug!("Opening {} ({} bytes)", self.url, meta.size);

        let location = self.storage.qualify_path(&self.name).into_owned();
        let reader = ParquetObjectReader::new(self.storage.object_store(), location)
            .with_file_size(meta.size);
        ParquetDataset::open(reader, batch_size, &self.url).await
    }
}
