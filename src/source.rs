// SPDX-License-Identifier: Apache-2.0
// Copyright (C) 2021 Profian, Inc.

//! Turning manifest sources into readable content

use crate::error::{Error, Result};
use crate::iotools::Checked;
use crate::manifest::{regular_file, Source, SourceType};

use std::fmt::Debug;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use log::debug;

const JSON: &str = "application/json";
const YAML: &str = "application/yaml";

/// Where a source's content lives
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Location {
    Local(PathBuf),
    Remote(String),
}

impl Location {
    /// Picks the variant from the scheme alone
    ///
    /// Relative local paths are joined onto `base`.
    pub fn parse(location: &str, base: &Path) -> Self {
        if location.starts_with("http://") || location.starts_with("https://") {
            Self::Remote(location.into())
        } else {
            Self::Local(base.join(location))
        }
    }

    fn open(&self) -> Result<(String, u64, Box<dyn Read + Send>)> {
        match self {
            Self::Local(path) => {
                let meta = regular_file(path)?;
                let data = std::fs::read(path).map_err(|source| Error::ReadFailure {
                    path: path.clone(),
                    source,
                })?;

                let ctype = content_type(&path.to_string_lossy());
                let size = meta.len();
                Ok((ctype, size, Box::new(Checked::new(Cursor::new(data), size))))
            }

            // Fetching needs a policy for redirects, auth and size limits first.
            Self::Remote(url) => Err(Error::NotImplemented {
                location: url.clone(),
            }),
        }
    }
}

/// The content of one source, ready to be uploaded
///
/// `content` is single-use. It yields exactly `size` bytes, or fails with
/// `InvalidData` if the file changed underneath us.
pub struct ResolvedSource {
    pub name: String,
    pub source_type: SourceType,
    pub content_type: String,
    pub size: u64,
    pub content: Box<dyn Read + Send>,
}

impl Debug for ResolvedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSource")
            .field("name", &self.name)
            .field("source_type", &self.source_type)
            .field("content_type", &self.content_type)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

pub fn resolve(source: &Source, base: &Path) -> Result<ResolvedSource> {
    let location = Location::parse(&source.location, base);
    let (content_type, size, content) = location.open()?;
    debug!("{:?}: {} bytes of {}", location, size, content_type);

    Ok(ResolvedSource {
        name: source.name(),
        source_type: source.kind,
        content_type,
        size,
        content,
    })
}

/// Infers a MIME type from the extension of `path`
///
/// Explicit suffixes win over the system MIME table, which wins over the
/// `application/yaml` fallback.
pub fn content_type(path: &str) -> String {
    infer(path, |ext| mime_guess::from_ext(ext).first_raw().map(str::to_owned))
}

fn infer(path: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "json" => JSON.into(),
        "yaml" | "yml" => YAML.into(),
        "" => YAML.into(),
        ext => lookup(ext).unwrap_or_else(|| YAML.into()),
    }
}
