//! Error types for parquet-relay using snafu.
//!
//! Data-path errors (`ReadError`, `TransformError`, `InvalidPathError`,
//! `WriteError`) are recorded as FAILED and propagated unchanged.
//! `MetadataError` never leaves the metadata client.

use snafu::prelude::*;

use crate::metadata::ProcessingStatus;

// ============ Storage Errors ============

/// Errors that can occur during storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// Invalid storage URL format.
    #[snafu(display("Invalid storage URL: {url}"))]
    InvalidUrl { url: String },

    /// An object key is not a valid store path.
    #[snafu(display("Invalid object key {path:?}: {source}"))]
    InvalidPath {
        path: String,
        source: object_store::path::Error,
    },

    /// Object store operation failed.
    #[snafu(display("Storage operation failed: {source}"))]
    ObjectStore { source: object_store::Error },

    /// IO error during storage operations.
    #[snafu(display("IO error: {source}"))]
    Io { source: std::io::Error },

    /// S3 configuration error.
    #[snafu(display("S3 configuration error: {source}"))]
    S3Config { source: object_store::Error },

    /// GCS configuration error.
    #[snafu(display("GCS configuration error: {source}"))]
    GcsConfig { source: object_store::Error },

    /// Azure configuration error.
    #[snafu(display("Azure configuration error: {source}"))]
    AzureConfig { source: object_store::Error },
}

impl StorageError {
    /// Check if this error represents a "not found" condition (404, NoSuchKey, etc.)
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::ObjectStore { source } => {
                matches!(source, object_store::Error::NotFound { .. })
            }
            _ => false,
        }
    }

    /// Check if a conditional write lost a race against another writer.
    pub fn is_conflict(&self) -> bool {
        match self {
            StorageError::ObjectStore { source } => matches!(
                source,
                object_store::Error::Precondition { .. }
                    | object_store::Error::AlreadyExists { .. }
            ),
            _ => false,
        }
    }
}

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
///
/// All of these are raised before the first metadata write.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// A required invocation parameter is absent or empty.
    #[snafu(display("Missing required parameter: {name}"))]
    MissingParameter { name: &'static str },

    /// The file id cannot be used as a status-store key.
    #[snafu(display("Invalid file id {file_id:?}: must be a single non-empty path segment"))]
    InvalidFileId { file_id: String },

    /// The metadata store location could not be opened.
    #[snafu(display("Invalid metadata store location {url}: {source}"))]
    MetadataLocation { url: String, source: StorageError },

    /// A numeric setting that must be positive is zero.
    #[snafu(display("Setting {name} must be greater than zero"))]
    ZeroSetting { name: &'static str },

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML configuration: {source}"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file {path}: {source}"))]
    ReadFile {
        path: String,
        source: std::io::Error,
    },
}

// ============ Read Errors ============

/// Errors that can occur while reading the source object.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ReadError {
    /// The source location could not be mapped to a storage backend.
    #[snafu(display("Cannot open source {url}: {source}"))]
    OpenSource { url: String, source: StorageError },

    /// The source object could not be fetched.
    #[snafu(display("Failed to read {url}: {source}"))]
    Fetch { url: String, source: StorageError },

    /// The source object is not a readable Parquet file.
    #[snafu(display("Failed to decode Parquet file {url}: {source}"))]
    Decode {
        url: String,
        source: parquet::errors::ParquetError,
    },
}

impl ReadError {
    /// Check if the source object does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            ReadError::Fetch { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}

// ============ Transform Errors ============

/// Errors that can occur while encoding rows as JSON lines.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TransformError {
    /// A record batch could not be read from the dataset.
    #[snafu(display("Failed to read record batch: {source}"))]
    ReadBatch {
        source: arrow::error::ArrowError,
    },

    /// A row could not be encoded.
    #[snafu(display("Failed to encode record batch as JSON: {source}"))]
    Encode {
        source: arrow::error::ArrowError,
    },

    /// The number of encoded lines does not match the file footer.
    #[snafu(display("Encoded {actual} records but the source declares {expected}"))]
    RecordCountMismatch { expected: u64, actual: u64 },
}

// ============ Path Errors ============

/// Errors that can occur while resolving the output location.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum InvalidPathError {
    /// The source key has no identifiable base filename.
    #[snafu(display("Source key {source_key:?} has no base filename"))]
    MissingBaseName { source_key: String },

    /// The derived output key is not a valid object key.
    #[snafu(display("Output key {key:?} is not a valid object key: {source}"))]
    InvalidKey {
        key: String,
        source: object_store::path::Error,
    },
}

// ============ Write Errors ============

/// Errors that can occur while writing the output object.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum WriteError {
    /// The output root could not be mapped to a storage backend.
    #[snafu(display("Cannot open output root {url}: {source}"))]
    OpenOutput { url: String, source: StorageError },

    /// The output object could not be written.
    #[snafu(display("Failed to write {url}: {source}"))]
    Upload { url: String, source: StorageError },
}

// ============ Metadata Errors ============

/// Errors raised by a status store. Never propagated past `MetadataClient`.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetadataError {
    /// The backing storage failed.
    #[snafu(display("Status store request failed: {source}"))]
    Store { source: StorageError },

    /// A record could not be serialized.
    #[snafu(display("Failed to serialize status record: {source}"))]
    Serialize { source: serde_json::Error },

    /// A stored record is not valid JSON.
    #[snafu(display("Corrupt status record for {file_id}: {source}"))]
    Deserialize {
        file_id: String,
        source: serde_json::Error,
    },

    /// The key cannot be stored.
    #[snafu(display("Invalid status record key {file_id:?}"))]
    #[snafu(context(name(InvalidRecordKeySnafu)))]
    InvalidKey { file_id: String },

    /// Concurrent writers kept invalidating the conditional update.
    #[snafu(display("Gave up updating {file_id} after {attempts} conflicting attempts"))]
    Conflict { file_id: String, attempts: usize },

    /// The store refused the request.
    #[snafu(display("Status store unavailable: {message}"))]
    Unavailable { message: String },
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to initialize Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder: {source}"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },

    /// A recorder was already installed in this process.
    #[snafu(display("Metrics recorder already initialized"))]
    AlreadyInitialized,

    /// No recorder has been installed.
    #[snafu(display("Metrics recorder not initialized"))]
    NotInitialized,

    /// The metrics snapshot could not be written.
    #[snafu(display("Failed to write metrics snapshot to {path}: {source}"))]
    WriteSnapshot {
        path: String,
        source: std::io::Error,
    },
}

// ============ Pipeline Error (top-level) ============

/// Top-level errors returned by a conversion run.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    /// Configuration error.
    #[snafu(display("Configuration error: {source}"))]
    Config { source: ConfigError },

    /// Source read error.
    #[snafu(display("Read error: {source}"))]
    Read { source: ReadError },

    /// Row encoding error.
    #[snafu(display("Transform error: {source}"))]
    Transform { source: TransformError },

    /// Output path error.
    #[snafu(display("Invalid path: {source}"))]
    #[snafu(context(name(PipelineInvalidPathSnafu)))]
    InvalidPath { source: InvalidPathError },

    /// Output write error.
    #[snafu(display("Write error: {source}"))]
    Write { source: WriteError },

    /// The job is not in a state that allows the requested transition.
    #[snafu(display("Invalid status transition {from} -> {to}"))]
    InvalidTransition {
        from: ProcessingStatus,
        to: ProcessingStatus,
    },

    /// The blocking encoder task panicked or was cancelled.
    #[snafu(display("Task join error: {source}"))]
    TaskJoin { source: tokio::task::JoinError },

    /// Metrics error.
    #[snafu(display("Metrics error: {source}"))]
    Metrics { source: MetricsError },
}

impl PipelineError {
    /// Check if this error represents a "not found" condition.
    pub fn is_not_found(&self) -> bool {
        match self {
            PipelineError::Read { source } => source.is_not_found(),
            _ => false,
        }
    }
}

impl From<ConfigError> for PipelineError {
    fn from(source: ConfigError) -> Self {
        PipelineError::Config { source }
    }
}

impl From<ReadError> for PipelineError {
    fn from(source: ReadError) -> Self {
        PipelineError::Read { source }
    }
}

impl From<TransformError> for PipelineError {
    fn from(source: TransformError) -> Self {
        PipelineError::Transform { source }
    }
}

impl From<InvalidPathError> for PipelineError {
    fn from(source: InvalidPathError) -> Self {
        PipelineError::InvalidPath { source }
    }
}

impl From<WriteError> for PipelineError {
    fn from(source: WriteError) -> Self {
        PipelineError::Write { source }
    }
}
