//! Configuration loading and invocation parameters.
//!
//! Ambient settings come from an optional YAML file with `${VAR}`
//! interpolation. The four invocation parameters usually come from the
//! command line (or their environment variables) and override the `job`
//! section of the file.

mod vars;

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::HashMap;
use std::path::Path;

use crate::error::{
    ConfigError, EnvInterpolationSnafu, InvalidFileIdSnafu, MissingParameterSnafu, ReadFileSnafu,
    YamlParseSnafu, ZeroSettingSnafu,
};
use crate::storage::UploadConfig;

/// Byte size constants (binary/IEC units).
pub const KB: usize = 1024;
pub const MB: usize = 1024 * KB;

/// Directory under the output root that holds status records by default.
pub const DEFAULT_METADATA_DIR: &str = "_metadata";

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub job: JobConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Metrics configuration (optional, disabled by default).
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// The four invocation parameters as they appear in a config file.
///
/// Every field is optional here; presence is checked by
/// [`Config::job_parameters`] after CLI overrides are applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    pub source_location: Option<String>,
    pub output_root: Option<String>,
    pub metadata_table: Option<String>,
    pub file_id: Option<String>,
}

impl JobConfig {
    /// Overlay the values set in `other` on top of this one.
    pub fn merge(&mut self, other: JobConfig) {
        if other.source_location.is_some() {
            self.source_location = other.source_location;
        }
        if other.output_root.is_some() {
            self.output_root = other.output_root;
        }
        if other.metadata_table.is_some() {
            self.metadata_table = other.metadata_table;
        }
        if other.file_id.is_some() {
            self.file_id = other.file_id;
        }
    }
}

/// Validated invocation parameters for one conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobParameters {
    pub source_location: String,
    pub output_root: String,
    pub metadata_table: String,
    pub file_id: String,
}

/// Source configuration for reading the Parquet object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Storage options (credentials, region, etc.)
    #[serde(default)]
    pub storage_options: HashMap<String, String>,

    /// Rows per decoded record batch (default: 8192)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            storage_options: HashMap::new(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_batch_size() -> usize {
    8192
}

/// Sink configuration for writing the JSON Lines object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Storage options (credentials, region, etc.)
    #[serde(default)]
    pub storage_options: HashMap<String, String>,

    /// Target size per multipart part in MB (default: 32)
    /// Outputs smaller than one part are written with a single PUT
    #[serde(default = "default_part_size_mb")]
    pub part_size_mb: usize,

    /// Maximum concurrent parts per multipart upload (default: 8)
    #[serde(default = "default_max_concurrent_parts")]
    pub max_concurrent_parts: usize,

    /// Extension given to output objects (default: "json")
    #[serde(default = "default_extension")]
    pub extension: String,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            storage_options: HashMap::new(),
            part_size_mb: default_part_size_mb(),
            max_concurrent_parts: default_max_concurrent_parts(),
            extension: default_extension(),
        }
    }
}

fn default_part_size_mb() -> usize {
    32
}

fn default_max_concurrent_parts() -> usize {
    8
}

fn default_extension() -> String {
    "json".to_string()
}

impl SinkConfig {
    /// Multipart settings in bytes.
    pub fn upload_config(&self) -> UploadConfig {
        UploadConfig {
            part_size: self.part_size_mb * MB,
            max_concurrent_parts: self.max_concurrent_parts,
        }
    }
}

/// Status store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// Root URL for status records. Defaults to `<output_root>/_metadata`.
    #[serde(default)]
    pub path: Option<String>,

    /// Storage options (credentials, region, etc.)
    #[serde(default)]
    pub storage_options: HashMap<String, String>,
}

impl MetadataConfig {
    /// Root URL of the status store for a job writing under `output_root`.
    pub fn root_url(&self, output_root: &str) -> String {
        match &self.path {
            Some(path) => path.clone(),
            None => format!(
                "{}/{}",
                output_root.trim_end_matches('/'),
                DEFAULT_METADATA_DIR
            ),
        }
    }
}

/// Metrics configuration.
///
/// The process exits after one run, so metrics are recorded in-process and
/// written out once at exit instead of being served.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether to record metrics (default: false).
    #[serde(default)]
    pub enabled: bool,
    /// File to write the Prometheus text snapshot to at exit, e.g. a
    /// node-exporter textfile collector path. When unset the snapshot is
    /// logged instead.
    #[serde(default)]
    pub snapshot_path: Option<String>,
}

impl Config {
    /// Load configuration from a YAML file, expanding `${VAR}` placeholders.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).context(ReadFileSnafu {
            path: path.display().to_string(),
        })?;

        let content =
            vars::expand_env(&content).map_err(|message| EnvInterpolationSnafu { message }.build())?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text without interpolation.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        // An empty document means "all defaults"
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Config = serde_yaml::from_str(content).context(YamlParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the ambient settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(
            self.source.batch_size > 0,
            ZeroSettingSnafu {
                name: "source.batch_size"
            }
        );
        ensure!(
            self.sink.part_size_mb > 0,
            ZeroSettingSnafu {
                name: "sink.part_size_mb"
            }
        );
        ensure!(
            self.sink.max_concurrent_parts > 0,
            ZeroSettingSnafu {
                name: "sink.max_concurrent_parts"
            }
        );
        Ok(())
    }

    /// Check that every invocation parameter is present and usable.
    pub fn job_parameters(&self) -> Result<JobParameters, ConfigError> {
        let source_location = required(&self.job.source_location, "source_location")?;
        let output_root = required(&self.job.output_root, "output_root")?;
        let metadata_table = required(&self.job.metadata_table, "metadata_table")?;
        let file_id = required(&self.job.file_id, "file_id")?;

        ensure!(
            is_single_segment(&file_id),
            InvalidFileIdSnafu { file_id: &file_id }
        );

        Ok(JobParameters {
            source_location,
            output_root,
            metadata_table,
            file_id,
        })
    }
}

fn required(value: &Option<String>, name: &'static str) -> Result<String, ConfigError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => MissingParameterSnafu { name }.fail(),
    }
}

/// True if `id` can be used as one object key segment.
pub(crate) fn is_single_segment(id: &str) -> bool {
    !id.is_empty() && id != "." && id != ".." && !id.contains(['/', '\\'])
}
