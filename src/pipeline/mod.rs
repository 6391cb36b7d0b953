//! Status-tracked conversion of one Parquet object to JSON lines.
//!
//! A run moves its [`FileJob`] through PENDING → IN_PROGRESS →
//! COMPLETED | FAILED and mirrors each transition into the status store:
//!
//! 1. Record IN_PROGRESS with `started_at` and `source_file_path`
//! 2. Open the source object and read its footer
//! 3. Resolve the date-partitioned output path
//! 4. Stream batches through the encoder into the output upload,
//!    checking the row count against the footer
//! 5. Complete the upload, replacing any earlier output
//! 6. Record COMPLETED with `ended_at`, `output_file_path`, `record_count`
//!
//! If any of steps 2-5 fails, the partial upload is aborted, FAILED is
//! recorded with `ended_at` and `error_message`, and the error is returned
//! unchanged. Status store failures never change the outcome of a run.
//!
//! Step 4 runs three parts at once, joined by bounded channels: an async
//! reader pulling record batches, a blocking encoder turning them into
//! chunks of lines, and an async uploader. Only a few batches and chunks
//! are in memory at any time.

mod job;

pub use job::FileJob;

use arrow::array::RecordBatch;
use arrow::error::ArrowError;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use parquet::errors::ParquetError;
use snafu::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::clock::{Clock, SystemClock};
use crate::config::{Config, JobParameters};
use crate::emit;
use crate::error::{
    MetadataLocationSnafu, PipelineError, RecordCountMismatchSnafu, TaskJoinSnafu, TransformError,
    WriteError,
};
use crate::metadata::{Attributes, MetadataClient, ObjectMetadataStore, ProcessingStatus};
use crate::metrics::events::{ConversionCompleted, RecordsConverted};
use crate::path::{self, OutputPath};
use crate::sink::{LineBuffer, LineDelimitedSink, OutputWriter};
use crate::source::{ParquetDataset, SourceObject};
use crate::storage::{StorageProvider, UploadConfig};
use crate::transform::JsonLinesEncoder;

/// Encoded bytes handed to the uploader at a time.
const CHUNK_SIZE: usize = 1024 * 1024;

/// Batches or chunks allowed to queue between stages.
const CHANNEL_DEPTH: usize = 2;

/// Tunables for a run.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// Rows per decoded record batch.
    pub batch_size: usize,
    pub upload: UploadConfig,
    /// Extension of the output object.
    pub extension: String,
    pub source_options: HashMap<String, String>,
    pub sink_options: HashMap<String, String>,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl RunnerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch_size: config.source.batch_size,
            upload: config.sink.upload_config(),
            extension: config.sink.extension.clone(),
            source_options: config.source.storage_options.clone(),
            sink_options: config.sink.storage_options.clone(),
        }
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub file_id: String,
    pub record_count: u64,
    pub bytes_written: u64,
    pub output_location: String,
    pub duration: Duration,
}

/// What the data path produced before the terminal status is recorded.
struct Converted {
    output: OutputPath,
    record_count: u64,
    bytes_written: u64,
}

/// Runs conversions for a single output root.
pub struct PipelineRunner {
    metadata: MetadataClient,
    clock: Arc<dyn Clock>,
    settings: RunnerSettings,
    output_root: String,
}

impl std::fmt::Debug for PipelineRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineRunner")
            .field("output_root", &self.output_root)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl PipelineRunner {
    pub fn new(
        metadata: MetadataClient,
        clock: Arc<dyn Clock>,
        settings: RunnerSettings,
        output_root: impl Into<String>,
    ) -> Self {
        Self {
            metadata,
            clock,
            settings,
            output_root: output_root.into(),
        }
    }

    /// Build a runner backed by the object-storage status store.
    ///
    /// The store location is checked here, so a bad location is reported
    /// before any status is written.
    pub async fn from_config(
        config: &Config,
        params: &JobParameters,
    ) -> Result<Self, PipelineError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let root = config.metadata.root_url(&params.output_root);
        let storage = StorageProvider::for_url_with_options(
            &root,
            config.metadata.storage_options.clone(),
        )
        .await
        .context(MetadataLocationSnafu { url: &root })?;

        info!(
            "Recording status in {}/{}",
            storage.canonical_url(),
            params.metadata_table
        );
        let store =
            ObjectMetadataStore::new(Arc::new(storage), &params.metadata_table, clock.clone());

        Ok(Self::new(
            MetadataClient::new(Arc::new(store)),
            clock,
            RunnerSettings::from_config(config),
            &params.output_root,
        ))
    }

    pub fn output_root(&self) -> &str {
        &self.output_root
    }

    /// Where the output for `source_location` would be written today.
    pub fn resolve_output(&self, source_location: &str) -> Result<OutputPath, PipelineError> {
        let output = path::resolve_with_extension(
            &self.output_root,
            source_location,
            self.clock.today(),
            &self.settings.extension,
        )?;
        Ok(output)
    }

    /// Convert the job's source object and record the outcome.
    ///
    /// Only PENDING jobs are accepted. On failure the job is left FAILED
    /// and the error that caused it is returned.
    pub async fn run(&self, job: &mut FileJob) -> Result<RunSummary, PipelineError> {
        let start = Instant::now();

        let started_at = self.clock.now();
        job.start(started_at)?;
        self.metadata
            .update(
                job.file_id(),
                ProcessingStatus::InProgress,
                Attributes::in_progress(started_at, job.source_location()),
            )
            .await;

        info!(
            file_id = job.file_id(),
            "Reading parquet file from: {}",
            job.source_location()
        );

        match self.convert(job).await {
            Ok(converted) => {
                let ended_at = self.clock.now();
                let location = converted.output.location();
                job.complete(ended_at, location.clone(), converted.record_count)?;
                self.metadata
                    .update(
                        job.file_id(),
                        ProcessingStatus::Completed,
                        Attributes::completed(ended_at, &location, converted.record_count),
                    )
                    .await;

                let duration = start.elapsed();
                emit!(ConversionCompleted {
                    status: ProcessingStatus::Completed,
                    duration,
                });
                info!(
                    file_id = job.file_id(),
                    "Successfully processed {} records", converted.record_count
                );

                Ok(RunSummary {
                    file_id: job.file_id().to_string(),
                    record_count: converted.record_count,
                    bytes_written: converted.bytes_written,
                    output_location: location,
                    duration,
                })
            }
            Err(e) => {
                let ended_at = self.clock.now();
                let message = e.to_string();
                error!(file_id = job.file_id(), "Error processing file: {}", message);

                job.fail(ended_at, message.clone())?;
                self.metadata
                    .update(
                        job.file_id(),
                        ProcessingStatus::Failed,
                        Attributes::failed(ended_at, &message),
                    )
                    .await;

                emit!(ConversionCompleted {
                    status: ProcessingStatus::Failed,
                    duration: start.elapsed(),
                });
                Err(e)
            }
        }
    }

    async fn convert(&self, job: &FileJob) -> Result<Converted, PipelineError> {
        let source =
            SourceObject::open(job.source_location(), self.settings.source_options.clone())
                .await?;
        let dataset = source.dataset(self.settings.batch_size).await?;
        let expected = dataset.num_rows();
        info!(file_id = job.file_id(), "Processing {} records", expected);

        let output = self.resolve_output(job.source_location())?;
        info!(
            file_id = job.file_id(),
            "Writing JSON output to: {}",
            output.location()
        );

        let sink = LineDelimitedSink::open(
            &self.output_root,
            self.settings.sink_options.clone(),
            self.settings.upload,
        )
        .await?;
        let mut writer = sink.create(&output);

        let streamed = stream_lines(dataset, &mut writer)
            .await
            .and_then(|actual| {
                ensure_count(expected, actual)?;
                Ok(actual)
            });
        let record_count = match streamed {
            Ok(count) => count,
            Err(e) => {
                writer.abort().await;
                return Err(e);
            }
        };

        let bytes_written = writer.finish().await?;
        emit!(RecordsConverted {
            count: record_count
        });

        Ok(Converted {
            output,
            record_count,
            bytes_written,
        })
    }
}

/// Stream every row of `dataset` into `writer`, returning the row count.
///
/// The writer is left open: the caller finishes or aborts it.
async fn stream_lines(
    dataset: ParquetDataset,
    writer: &mut OutputWriter,
) -> Result<u64, PipelineError> {
    let (batch_tx, batch_rx) = mpsc::channel(CHANNEL_DEPTH);
    let (chunk_tx, chunk_rx) = mpsc::channel(CHANNEL_DEPTH);

    let encoder =
        tokio::task::spawn_blocking(move || encode_lines(batch_rx, chunk_tx, CHUNK_SIZE));
    let ((), uploaded, encoded) = tokio::join!(
        forward_batches(dataset.into_stream(), batch_tx),
        upload_chunks(writer, chunk_rx),
        encoder,
    );

    // A failed upload stops the encoder early, so its error comes first
    uploaded?;
    let record_count = encoded.context(TaskJoinSnafu)??;
    Ok(record_count)
}

/// Feed decoded batches to the encoder until the stream ends, a batch
/// fails, or the encoder hangs up.
async fn forward_batches<S>(stream: S, batches: mpsc::Sender<Result<RecordBatch, ArrowError>>)
where
    S: Stream<Item = Result<RecordBatch, ParquetError>>,
{
    let mut stream = std::pin::pin!(stream);
    while let Some(batch) = stream.next().await {
        let failed = batch.is_err();
        if batches.send(batch.map_err(ArrowError::from)).await.is_err() || failed {
            break;
        }
    }
}

/// Encode batches into chunks of about `chunk_size` bytes. Runs on the
/// blocking pool.
///
/// Returns the number of rows encoded. Stops quietly if the uploader hangs
/// up, leaving the upload error to be reported.
fn encode_lines(
    mut batches: mpsc::Receiver<Result<RecordBatch, ArrowError>>,
    chunks: mpsc::Sender<Bytes>,
    chunk_size: usize,
) -> Result<u64, TransformError> {
    let records = JsonLinesEncoder::new().encode(std::iter::from_fn(|| batches.blocking_recv()));
    let mut buffer = LineBuffer::with_capacity(chunk_size);

    for line in records {
        buffer.push(&line?);
        if buffer.len() >= chunk_size && chunks.blocking_send(buffer.split()).is_err() {
            debug!("Uploader stopped after {} lines", buffer.lines());
            return Ok(buffer.lines());
        }
    }

    if !buffer.is_empty() && chunks.blocking_send(buffer.split()).is_err() {
        debug!("Uploader stopped before the last chunk");
    }
    Ok(buffer.lines())
}

/// Upload chunks in arrival order. Dropping `chunks` on error stops the
/// encoder.
async fn upload_chunks(
    writer: &mut OutputWriter,
    mut chunks: mpsc::Receiver<Bytes>,
) -> Result<(), WriteError> {
    while let Some(chunk) = chunks.recv().await {
        writer.put(chunk).await?;
    }
    Ok(())
}

fn ensure_count(expected: u64, actual: u64) -> Result<(), TransformError> {
    ensure!(
        expected == actual,
        RecordCountMismatchSnafu { expected, actual }
    );
    Ok(())
}
