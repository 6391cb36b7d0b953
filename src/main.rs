//! parquet-relay: convert one Parquet object to JSON Lines and record the
//! outcome in a per-file status store.

use clap::Parser;
use snafu::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use parquet_relay::clock::SystemClock;
use parquet_relay::config::{Config, JobConfig, JobParameters};
use parquet_relay::error::{ConfigSnafu, MetricsSnafu, PipelineError};
use parquet_relay::metadata::{MemoryMetadataStore, MetadataClient};
use parquet_relay::metrics;
use parquet_relay::pipeline::{FileJob, PipelineRunner, RunnerSettings};

/// Parquet to JSON Lines conversion with status tracking.
#[derive(Parser, Debug)]
#[command(name = "parquet-relay")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// URL of the Parquet object to convert.
    #[arg(long, env = "SOURCE_LOCATION")]
    source_location: Option<String>,

    /// Root URL under which output objects are written.
    #[arg(long, env = "OUTPUT_ROOT")]
    output_root: Option<String>,

    /// Name of the status table.
    #[arg(long, env = "METADATA_TABLE")]
    metadata_table: Option<String>,

    /// Key of this file's status record.
    #[arg(long, env = "FILE_ID")]
    file_id: Option<String>,

    /// Path to an optional configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Dry run - validate parameters and print the output path without
    /// touching storage.
    #[arg(long)]
    dry_run: bool,
}

impl Args {
    fn job_overrides(&self) -> JobConfig {
        JobConfig {
            source_location: self.source_location.clone(),
            output_root: self.output_root.clone(),
            metadata_table: self.metadata_table.clone(),
            file_id: self.file_id.clone(),
        }
    }
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), PipelineError> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = build_config(&args)?;
    let params = config.job_parameters().context(ConfigSnafu)?;

    if args.dry_run {
        let runner = PipelineRunner::new(
            MetadataClient::new(Arc::new(MemoryMetadataStore::default())),
            Arc::new(SystemClock),
            RunnerSettings::from_config(&config),
            &params.output_root,
        );
        let output = runner.resolve_output(&params.source_location)?;

        info!("Dry run mode - validating configuration");
        info!("File id: {}", params.file_id);
        info!("Source: {}", params.source_location);
        info!("Output: {}", output.location());
        info!(
            "Status store: {}/{}",
            config.metadata.root_url(&params.output_root),
            params.metadata_table
        );
        info!("Configuration is valid");
        return Ok(());
    }

    // Initialize metrics if enabled
    if config.metrics.enabled {
        metrics::init().context(MetricsSnafu)?;
    }

    let result = run(&config, &params).await;

    if config.metrics.enabled {
        let path = config.metrics.snapshot_path.as_deref().map(Path::new);
        if let Err(e) = metrics::flush(path) {
            warn!("Failed to flush metrics: {}", e);
        }
    }

    result
}

async fn run(config: &Config, params: &JobParameters) -> Result<(), PipelineError> {
    let runner = PipelineRunner::from_config(config, params).await?;
    let mut job = FileJob::new(&params.file_id, &params.source_location);
    let summary = runner.run(&mut job).await?;

    info!("Conversion completed successfully");
    info!("  Records: {}", summary.record_count);
    info!("  Bytes written: {}", summary.bytes_written);
    info!("  Output: {}", summary.output_location);
    info!("  Duration: {}ms", summary.duration.as_millis());

    Ok(())
}

/// Build configuration from the optional file and command-line values.
fn build_config(args: &Args) -> Result<Config, PipelineError> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path).context(ConfigSnafu)?,
        None => Config::default(),
    };
    config.job.merge(args.job_overrides());
    Ok(config)
}
