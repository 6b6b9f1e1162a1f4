// SPDX-License-Identifier: Apache-2.0
// Copyright (C) 2021 Profian, Inc.

//! The deployment manifest
//!
//! A manifest names a schema version and an ordered list of sources:
//!
//! ```json
//! {
//!   "schema_version": "1.0.0",
//!   "sources": [
//!     { "type": "openapiv3", "location": "./petstore.yaml" }
//!   ]
//! }
//! ```
//!
//! Manifests ending in `.yaml` or `.yml` are read as YAML, everything else
//! as JSON.

use crate::error::{Error, Result};

use std::fmt::Display;
use std::fs::Metadata;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Schema versions this client knows how to read
pub const SUPPORTED_SCHEMA_VERSIONS: &[&str] = &["1.0.0"];

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum SourceType {
    #[serde(rename = "openapiv3")]
    OpenApiV3,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenApiV3 => "openapiv3",
        }
    }
}

impl Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One prospective asset of the deployment
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Source {
    #[serde(rename = "type")]
    pub kind: SourceType,

    /// A filesystem path or an `http(s)://` URL
    pub location: String,

    #[serde(default)]
    pub name: Option<String>,
}

impl Source {
    /// The asset name: either given explicitly or the file stem of the
    /// location
    pub fn name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }

        let tail = self.location.trim_end_matches('/');
        let tail = tail.rsplit('/').next().unwrap_or(tail);
        let tail = tail.split(['?', '#']).next().unwrap_or(tail);

        Path::new(tail)
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or(self.kind.as_str())
            .to_owned()
    }
}

/// A parsed and validated manifest
///
/// The only way to obtain one is [`Manifest::load`], so every instance has
/// passed validation.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default)]
    schema_version: String,

    #[serde(default)]
    sources: Vec<Source>,

    #[serde(skip)]
    base: PathBuf,
}

impl Manifest {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        regular_file(path)?;
        let data = std::fs::read(path).map_err(|source| Error::ReadFailure {
            path: path.into(),
            source,
        })?;

        let mut manifest = Self::parse(path, &data)?;
        manifest.validate(path)?;
        manifest.base = path.parent().map(Path::to_path_buf).unwrap_or_default();

        Ok(manifest)
    }

    fn parse(path: &Path, data: &[u8]) -> Result<Self> {
        let yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some(e) if e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml")
        );

        let parsed: std::result::Result<Self, String> = if yaml {
            serde_yaml_ng::from_slice(data).map_err(|e| e.to_string())
        } else {
            serde_json::from_slice(data).map_err(|e| e.to_string())
        };

        parsed.map_err(|message| Error::ParseFailure {
            path: path.into(),
            message,
        })
    }

    fn validate(&self, path: &Path) -> Result<()> {
        if !SUPPORTED_SCHEMA_VERSIONS.contains(&self.schema_version.as_str()) {
            return Err(Error::UnsupportedSchema {
                path: path.into(),
                found: self.schema_version.clone(),
                supported: SUPPORTED_SCHEMA_VERSIONS,
            });
        }

        if self.sources.is_empty() {
            return Err(Error::EmptySourceList { path: path.into() });
        }

        Ok(())
    }

    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    /// The directory relative source locations are resolved against
    pub fn base_dir(&self) -> &Path {
        &self.base
    }
}

/// Stats `path` without following symlinks and insists on a regular file
pub(crate) fn regular_file(path: &Path) -> Result<Metadata> {
    let meta = std::fs::symlink_metadata(path).map_err(|e| Error::InvalidPath {
        path: path.into(),
        reason: e.to_string(),
    })?;

    if !meta.file_type().is_file() {
        return Err(Error::InvalidPath {
            path: path.into(),
            reason: "path must be a regular file".into(),
        });
    }

    Ok(meta)
}
