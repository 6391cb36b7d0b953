//! parquet-relay: status-tracked Parquet to JSON Lines conversion.
//!
//! Each run converts a single Parquet object into a line-delimited JSON
//! object under a date-partitioned output root, and records the run's
//! progress (IN_PROGRESS, then COMPLETED or FAILED) in a per-file status
//! record.
//!
//! # Example
//!
//! ```ignore
//! use parquet_relay::{Config, FileJob, PipelineRunner};
//!
//! let mut config = Config::default();
//! config.job.merge(job_from_cli);
//! let params = config.job_parameters()?;
//!
//! let runner = PipelineRunner::from_config(&config, &params).await?;
//! let mut job = FileJob::new(&params.file_id, &params.source_location);
//! let summary = runner.run(&mut job).await?;
//! println!("Wrote {} records to {}", summary.record_count, summary.output_location);
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod metadata;
pub mod metrics;
pub mod path;
pub mod pipeline;
pub mod sink;
pub mod source;
pub mod storage;
pub mod transform;

// Re-export main types
pub use config::Config;
pub use metadata::{MetadataClient, MetadataStore, ProcessingStatus};
pub use pipeline::{FileJob, PipelineRunner, RunSummary};
pub use storage::{StorageProvider, StorageProviderRef};
