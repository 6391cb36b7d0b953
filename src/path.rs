//! Output location derivation.
//!
//! Output objects are laid out as
//! `<output_root>/processed-data/YYYY/MM/DD/<stem>.<extension>` where the
//! date is supplied by the caller and `<stem>` is the source basename
//! without its final extension. The stem is kept verbatim: characters
//! such as `[`, `#` or `%` are not escaped.

use chrono::{Datelike, NaiveDate};
use object_store::path::Path;
use snafu::prelude::*;
use std::fmt;

use crate::error::{InvalidKeySnafu, InvalidPathError, MissingBaseNameSnafu};

/// Top-level prefix for converted objects under the output root.
pub const PROCESSED_PREFIX: &str = "processed-data";

/// Extension of output objects unless configured otherwise.
pub const DEFAULT_EXTENSION: &str = "json";

/// A resolved output location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPath {
    root: String,
    key: Path,
}

impl OutputPath {
    /// Output root without a trailing separator.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Object key relative to the output root.
    pub fn key(&self) -> &Path {
        &self.key
    }

    /// Full location string, e.g. `s3://out/processed-data/2024/06/01/input.json`.
    pub fn location(&self) -> String {
        format!("{}/{}", self.root, self.key)
    }
}

impl fmt::Display for OutputPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.root, self.key)
    }
}

/// Resolve the JSON output location for `source_key` on `as_of`.
pub fn resolve(
    output_root: &str,
    source_key: &str,
    as_of: NaiveDate,
) -> Result<OutputPath, InvalidPathError> {
    resolve_with_extension(output_root, source_key, as_of, DEFAULT_EXTENSION)
}

/// Like [`resolve`], with a chosen output extension.
pub fn resolve_with_extension(
    output_root: &str,
    source_key: &str,
    as_of: NaiveDate,
    extension: &str,
) -> Result<OutputPath, InvalidPathError> {
    let stem = base_stem(source_key).context(MissingBaseNameSnafu { source_key })?;

    let file_name = if extension.is_empty() {
        stem.to_string()
    } else {
        format!("{stem}.{extension}")
    };

    let key = format!(
        "{PROCESSED_PREFIX}/{:04}/{:02}/{:02}/{file_name}",
        as_of.year(),
        as_of.month(),
        as_of.day()
    );
    let key = Path::parse(&key).context(InvalidKeySnafu { key: &key })?;

    Ok(OutputPath {
        root: output_root.trim_end_matches('/').to_string(),
        key,
    })
}

/// Basename of `key` without its final extension.
fn base_stem(key: &str) -> Option<&str> {
    let name = key.rsplit('/').next().filter(|n| !n.is_empty())?;
    let stem = match name.rfind('.') {
        Some(dot) => &name[..dot],
        None => name,
    };
    (!stem.is_empty()).then_some(stem)
}
