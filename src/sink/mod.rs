//! Writing converted output to object storage.
//!
//! Output is streamed: chunks of encoded lines are handed to an
//! [`OutputWriter`] as they are produced and uploaded part by part. The
//! object only appears at its key once [`OutputWriter::finish`] succeeds,
//! replacing any object already there.

mod buffer;

pub use buffer::LineBuffer;

use bytes::Bytes;
use object_store::buffered::BufWriter;
use snafu::prelude::*;
use std::collections::HashMap;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::emit;
use crate::error::{IoSnafu, ObjectStoreSnafu, OpenOutputSnafu, UploadSnafu, WriteError};
use crate::metrics::events::{BytesWritten, StorageOperation};
use crate::path::OutputPath;
use crate::storage::{StorageProvider, UploadConfig, record_request};

/// Writes line-delimited objects under an output root.
#[derive(Debug)]
pub struct LineDelimitedSink {
    storage: StorageProvider,
    upload: UploadConfig,
}

impl LineDelimitedSink {
    /// Open the output root, creating it when it is a missing local directory.
    pub async fn open(
        output_root: &str,
        options: HashMap<String, String>,
        upload: UploadConfig,
    ) -> Result<Self, WriteError> {
        let storage = StorageProvider::for_url_with_options(output_root, options)
            .await
            .context(OpenOutputSnafu { url: output_root })?;
        Ok(Self::from_storage(storage, upload))
    }

    pub fn from_storage(storage: StorageProvider, upload: UploadConfig) -> Self {
        Self { storage, upload }
    }

    /// Start writing the object at `output`.
    pub fn create(&self, output: &OutputPath) -> OutputWriter {
        OutputWriter {
            writer: self.storage.buffered_writer(output.key(), self.upload),
            url: output.location(),
            bytes_written: 0,
            start: Instant::now(),
        }
    }
}

/// An in-flight output object.
///
/// Ends in either [`finish`](Self::finish) or [`abort`](Self::abort),
/// never both.
pub struct OutputWriter {
    writer: BufWriter,
    url: String,
    bytes_written: u64,
    start: Instant,
}

impl std::fmt::Debug for OutputWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputWriter")
            .field("url", &self.url)
            .field("bytes_written", &self.bytes_written)
            .finish_non_exhaustive()
    }
}

impl OutputWriter {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Append a chunk of complete lines.
    pub async fn put(&mut self, chunk: Bytes) -> Result<(), WriteError> {
        let size = chunk.len() as u64;
        self.writer
            .put(chunk)
            .await
            .context(ObjectStoreSnafu)
            .context(UploadSnafu { url: &self.url })?;
        self.bytes_written += size;
        Ok(())
    }

    /// Complete the upload, returning the number of bytes written.
    ///
    /// A writer that fails here has already been shut down and cannot be
    /// aborted.
    pub async fn finish(mut self) -> Result<u64, WriteError> {
        let result = self.writer.shutdown().await;
        record_request(StorageOperation::Upload, self.start, &result);
        result
            .context(IoSnafu)
            .context(UploadSnafu { url: &self.url })?;

        emit!(BytesWritten {
            bytes: self.bytes_written
        });
        info!(
            "Wrote {} bytes to {} in {}ms",
            self.bytes_written,
            self.url,
            self.start.elapsed().as_millis()
        );
        Ok(self.bytes_written)
    }

    /// Discard everything written so far. Failures are logged.
    ///
    /// Only valid before [`finish`](Self::finish).
    pub async fn abort(&mut self) {
        let start = Instant::now();
        let result = self.writer.abort().await;
        record_request(StorageOperation::AbortUpload, start, &result);

        match result {
            Ok(()) => debug!("Aborted upload to {}", self.url),
            Err(e) => warn!("Failed to abort upload to {}: {}", self.url, e),
        }
    }
}
