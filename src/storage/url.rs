//! URL parsing for storage backends.
//!
//! Maps S3, GCS, Azure and local filesystem URLs onto a [`BackendConfig`].

use object_store::path::Path;
use regex::{Captures, Regex};
use std::sync::LazyLock;

use snafu::prelude::*;

use crate::error::{InvalidPathSnafu, InvalidUrlSnafu, StorageError};

use super::backend::{AzureConfig, BackendConfig, GcsConfig, LocalConfig, S3Config};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    S3,
    Gcs,
    Azure,
    Local,
}

/// Ordered URL patterns. The first match wins.
static PATTERNS: LazyLock<Vec<(Backend, Regex)>> = LazyLock::new(|| {
    [
        (
            Backend::S3,
            r"^[sS]3[aA]?::(?P<protocol>https?)://(?P<endpoint>[^:/]+):(?P<port>\d+)/(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.+))?$",
        ),
        (
            Backend::S3,
            r"^[sS]3[aA]?://(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.+))?$",
        ),
        (
            Backend::S3,
            r"^https://s3\.(?P<region>[\w\-]+)\.amazonaws\.com/(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.+))?$",
        ),
        (
            Backend::Gcs,
            r"^[gG][sS]://(?P<bucket>[a-z0-9\-\._]+)(/(?P<key>.+))?$",
        ),
        (
            Backend::Gcs,
            r"^https://storage\.googleapis\.com/(?P<bucket>[a-z0-9\-_\.]+)(/(?P<key>.+))?$",
        ),
        (
            Backend::Azure,
            r"^abfss?://(?P<container>[a-z0-9\-]+)@(?P<account>[a-z0-9]+)\.dfs\.core\.windows\.net(/(?P<key>.+))?$",
        ),
        (
            Backend::Azure,
            r"^https://(?P<account>[a-z0-9]+)\.(blob|dfs)\.core\.windows\.net/(?P<container>[a-z0-9\-]+)(/(?P<key>.+))?$",
        ),
        (Backend::Local, r"^file://(?P<path>/.*)$"),
        (Backend::Local, r"^(?P<path>/.*)$"),
    ]
    .into_iter()
    .map(|(backend, pattern)| {
        (
            backend,
            Regex::new(pattern).expect("storage URL patterns are valid"),
        )
    })
    .collect()
});

impl BackendConfig {
    /// Parse a URL into a backend configuration.
    ///
    /// The URL names a container plus an optional key prefix; all object
    /// paths handed to the provider are resolved relative to that prefix.
    pub fn parse_url(url: &str) -> Result<Self, StorageError> {
        let url = url.trim_end_matches('/');
        let Some((backend, captures)) = PATTERNS
            .iter()
            .find_map(|(backend, regex)| regex.captures(url).map(|c| (*backend, c)))
        else {
            return InvalidUrlSnafu { url }.fail();
        };

        Ok(match backend {
            Backend::S3 => Self::parse_s3(&captures)?,
            Backend::Gcs => BackendConfig::Gcs(GcsConfig {
                bucket: captures["bucket"].to_string(),
                key: key_of(&captures)?,
            }),
            Backend::Azure => BackendConfig::Azure(AzureConfig {
                account: captures["account"].to_string(),
                container: captures["container"].to_string(),
                key: key_of(&captures)?,
            }),
            Backend::Local => BackendConfig::Local(LocalConfig {
                path: captures["path"].to_string(),
            }),
        })
    }

    fn parse_s3(captures: &Captures<'_>) -> Result<Self, StorageError> {
        let region = std::env::var("AWS_DEFAULT_REGION")
            .ok()
            .or_else(|| captures.name("region").map(|m| m.as_str().to_string()));

        let endpoint = std::env::var("AWS_ENDPOINT").ok().or_else(|| {
            captures.name("endpoint").map(|endpoint| {
                let protocol = captures.name("protocol").map_or("https", |p| p.as_str());
                let port = captures.name("port").map_or("443", |p| p.as_str());
                format!("{protocol}://{}:{port}", endpoint.as_str())
            })
        });

        Ok(BackendConfig::S3(S3Config {
            endpoint,
            region,
            bucket: captures["bucket"].to_string(),
            key: key_of(captures)?,
        }))
    }

    /// Key prefix under the container, if any.
    pub(crate) fn key(&self) -> Option<&Path> {
        match self {
            BackendConfig::S3(s3) => s3.key.as_ref(),
            BackendConfig::Gcs(gcs) => gcs.key.as_ref(),
            BackendConfig::Azure(azure) => azure.key.as_ref(),
            // The local store is rooted at the full path
            BackendConfig::Local(_) => None,
        }
    }
}

/// Key prefix taken verbatim from the URL.
fn key_of(captures: &Captures<'_>) -> Result<Option<Path>, StorageError> {
    captures
        .name("key")
        .map(|m| parse_key(m.as_str()))
        .transpose()
}

/// Parse an object key without percent-encoding its segments.
///
/// Characters such as `[`, `#` and `%` are legal in object names and must
/// reach the store unchanged.
pub fn parse_key(key: &str) -> Result<Path, StorageError> {
    Path::parse(key).context(InvalidPathSnafu { path: key })
}

/// Split an object URL into its parent location and object name.
///
/// `s3://bucket/data/input.parquet` becomes `("s3://bucket/data", "input.parquet")`.
pub fn split_object_url(url: &str) -> Result<(&str, &str), StorageError> {
    match url.rsplit_once('/') {
        Some((parent, name)) if !name.is_empty() && !parent.is_empty() => {
            BackendConfig::parse_url(parent)?;
            Ok((parent, name))
        }
        _ => InvalidUrlSnafu { url }.fail(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_s3_url_parsing() {
        let config = BackendConfig::parse_url("s3://mybucket/path/to/data").unwrap();
        match config {
            BackendConfig::S3(s3) => {
                assert_eq!(s3.bucket, "mybucket");
                assert_eq!(s3.key, Some(Path::from("path/to/data")));
            }
            _ => panic!("Expected S3 config"),
        }
    }

    #[test]
    fn test_s3_endpoint_url_parsing() {
        let config =
            BackendConfig::parse_url("s3::http://localhost:9000/mybucket/prefix").unwrap();
        match config {
            BackendConfig::S3(s3) => {
                assert_eq!(s3.bucket, "mybucket");
                assert_eq!(s3.key, Some(Path::from("prefix")));
                if std::env::var("AWS_ENDPOINT").is_err() {
                    assert_eq!(s3.endpoint.as_deref(), Some("http://localhost:9000"));
                }
            }
            _ => panic!("Expected S3 config"),
        }
    }

    #[test]
    fn test_gcs_url_parsing() {
        let config = BackendConfig::parse_url("gs://mybucket/path/to/data").unwrap();
        match config {
            BackendConfig::Gcs(gcs) => {
                assert_eq!(gcs.bucket, "mybucket");
                assert_eq!(gcs.key, Some(Path::from("path/to/data")));
            }
            _ => panic!("Expected Gcs config"),
        }
    }

    #[test]
    fn test_azure_url_parsing() {
        let config = BackendConfig::parse_url(
            "abfss://mycontainer@mystorageaccount.dfs.core.windows.net/path/to/data",
        )
        .unwrap();
        match config {
            BackendConfig::Azure(azure) => {
                assert_eq!(azure.account, "mystorageaccount");
                assert_eq!(azure.container, "mycontainer");
                assert_eq!(azure.key, Some(Path::from("path/to/data")));
            }
            _ => panic!("Expected Azure config"),
        }
    }

    #[test]
    fn test_local_url_parsing() {
        for url in ["/local/path/to/data", "file:///local/path/to/data/"] {
            match BackendConfig::parse_url(url).unwrap() {
                BackendConfig::Local(local) => assert_eq!(local.path, "/local/path/to/data"),
                _ => panic!("Expected Local config for {url}"),
            }
        }
    }

    #[test]
    fn test_relative_path_rejected() {
        let err = BackendConfig::parse_url("relative/path").unwrap_err();
        assert!(matches!(err, StorageError::InvalidUrl { .. }));
    }

    #[test]
    fn test_key_prefix_kept_verbatim() {
        match BackendConfig::parse_url("s3://bucket/raw[1]/50%off#a").unwrap() {
            BackendConfig::S3(s3) => {
                assert_eq!(s3.key.unwrap().as_ref(), "raw[1]/50%off#a");
            }
            _ => panic!("Expected S3 config"),
        }
    }

    #[test]
    fn test_parse_key_rejects_relative_segments() {
        assert!(parse_key("data/../secret").is_err());
        assert!(parse_key("data//input").is_err());
        assert_eq!(
            parse_key("report[1].parquet").unwrap().as_ref(),
            "report[1].parquet"
        );
    }

    #[test]
    fn test_split_object_url() {
        let (parent, name) = split_object_url("s3://bucket/data/2024/input.parquet").unwrap();
        assert_eq!(parent, "s3://bucket/data/2024");
        assert_eq!(name, "input.parquet");

        let (parent, name) = split_object_url("/tmp/input.parquet").unwrap();
        assert_eq!(parent, "/tmp");
        assert_eq!(name, "input.parquet");
    }

    #[test]
    fn test_split_object_url_requires_name() {
        assert!(split_object_url("s3://bucket/data/").is_err());
        assert!(split_object_url("/input.parquet").is_err());
    }
}
