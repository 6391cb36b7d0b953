//! Backend-specific object store construction.

use object_store::aws::AmazonS3Builder;
use object_store::azure::MicrosoftAzureBuilder;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::local::LocalFileSystem;
use object_store::path::Path;
use object_store::{ObjectStore, RetryConfig};
use snafu::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::{
    AzureConfigSnafu, GcsConfigSnafu, IoSnafu, ObjectStoreSnafu, S3ConfigSnafu, StorageError,
};

/// S3 storage configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Config {
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub bucket: String,
    pub key: Option<Path>,
}

/// Google Cloud Storage configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcsConfig {
    pub bucket: String,
    pub key: Option<Path>,
}

/// Azure Blob Storage configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzureConfig {
    pub account: String,
    pub container: String,
    pub key: Option<Path>,
}

/// Local filesystem configuration. The store is rooted at `path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalConfig {
    pub path: String,
}

/// Backend configuration enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    S3(S3Config),
    Gcs(GcsConfig),
    Azure(AzureConfig),
    Local(LocalConfig),
}

/// Object store produced for one backend.
pub(super) struct BackendStores {
    pub object_store: Arc<dyn ObjectStore>,
    pub canonical_url: String,
}

impl BackendConfig {
    /// Build the object store for this backend.
    ///
    /// `options` are backend configuration keys (credentials, region,
    /// endpoints) and apply to every cloud backend. With
    /// `create_local_root` set, a missing local root directory is created.
    pub(super) async fn build(
        &self,
        options: &HashMap<String, String>,
        create_local_root: bool,
    ) -> Result<BackendStores, StorageError> {
        match self {
            BackendConfig::S3(config) => build_s3(config, options),
            BackendConfig::Gcs(config) => build_gcs(config, options),
            BackendConfig::Azure(config) => build_azure(config, options),
            BackendConfig::Local(config) => build_local(config, create_local_root).await,
        }
    }
}

fn with_key(url: String, key: Option<&Path>) -> String {
    match key {
        Some(key) => format!("{url}/{key}"),
        None => url,
    }
}

fn build_s3(
    config: &S3Config,
    options: &HashMap<String, String>,
) -> Result<BackendStores, StorageError> {
    let mut builder = AmazonS3Builder::from_env()
        .with_bucket_name(&config.bucket)
        .with_retry(RetryConfig::default());

    for (key, value) in options {
        builder = builder.with_config(key.parse().context(S3ConfigSnafu)?, value.clone());
    }

    if let Some(region) = &config.region {
        builder = builder.with_region(region);
    }

    if let Some(endpoint) = &config.endpoint {
        builder = builder
            .with_endpoint(endpoint)
            .with_virtual_hosted_style_request(false)
            .with_allow_http(true);
    }

    let canonical_url = with_key(format!("s3://{}", config.bucket), config.key.as_ref());
    let store = builder.build().context(S3ConfigSnafu)?;

    Ok(BackendStores {
        object_store: Arc::new(store),
        canonical_url,
    })
}

fn build_gcs(
    config: &GcsConfig,
    options: &HashMap<String, String>,
) -> Result<BackendStores, StorageError> {
    let mut builder = GoogleCloudStorageBuilder::from_env()
        .with_bucket_name(&config.bucket)
        .with_retry(RetryConfig::default());

    for (key, value) in options {
        builder = builder.with_config(key.parse().context(GcsConfigSnafu)?, value.clone());
    }

    if let Ok(service_account_key) = std::env::var("GOOGLE_SERVICE_ACCOUNT_KEY") {
        debug!("Constructing GCS builder with service account key");
        builder = builder.with_service_account_key(&service_account_key);
    }

    let canonical_url = with_key(format!("gs://{}", config.bucket), config.key.as_ref());
    let store = builder.build().context(GcsConfigSnafu)?;

    Ok(BackendStores {
        object_store: Arc::new(store),
        canonical_url,
    })
}

fn build_azure(
    config: &AzureConfig,
    options: &HashMap<String, String>,
) -> Result<BackendStores, StorageError> {
    let mut builder = MicrosoftAzureBuilder::from_env()
        .with_account(&config.account)
        .with_container_name(&config.container)
        .with_retry(RetryConfig::default());

    for (key, value) in options {
        builder = builder.with_config(key.parse().context(AzureConfigSnafu)?, value.clone());
    }

    let canonical_url = with_key(
        format!(
            "abfss://{}@{}.dfs.core.windows.net",
            config.container, config.account
        ),
        config.key.as_ref(),
    );
    let store = builder.build().context(AzureConfigSnafu)?;

    Ok(BackendStores {
        object_store: Arc::new(store),
        canonical_url,
    })
}

async fn build_local(
    config: &LocalConfig,
    create_root: bool,
) -> Result<BackendStores, StorageError> {
    if create_root {
        tokio::fs::create_dir_all(&config.path)
            .await
            .context(IoSnafu)?;
    }

    let store = LocalFileSystem::new_with_prefix(&config.path).context(ObjectStoreSnafu)?;

    Ok(BackendStores {
        object_store: Arc::new(store),
        canonical_url: format!("file://{}", config.path),
    })
}
