// SPDX-License-Identifier: Apache-2.0
// Copyright (C) 2021 Profian, Inc.

//! Error types for the deployment pipeline

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can go wrong between reading a manifest and receiving a
/// deployment back from the server
#[derive(Error, Debug)]
pub enum Error {
    #[error("missing credential: environment variable {var} is not set")]
    MissingCredential { var: &'static str },

    #[error("credential is malformed: expected prefix '{prefix}'")]
    MalformedCredential { prefix: &'static str },

    #[error("missing setting: environment variable {var} is not set")]
    MissingSetting { var: &'static str },

    #[error("invalid setting {var}={value:?}: {reason}")]
    InvalidSetting {
        var: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("invalid file path {}: {reason}", path.display())]
    InvalidPath { path: PathBuf, reason: String },

    #[error("failed to read file {}: {source}", path.display())]
    ReadFailure {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {}: {message}", path.display())]
    ParseFailure { path: PathBuf, message: String },

    #[error("unsupported schema version '{found}' in {}. Expected one of {supported:?}", path.display())]
    UnsupportedSchema {
        path: PathBuf,
        found: String,
        supported: &'static [&'static str],
    },

    #[error("{}: must specify at least one source", path.display())]
    EmptySourceList { path: PathBuf },

    #[error("source #{index} ({location}) could not be resolved: {source}")]
    SourceResolutionFailed {
        index: usize,
        location: String,
        source: Box<Error>,
    },

    #[error("remote source {location} is not yet supported; download it and reference the local copy")]
    NotImplemented { location: String },

    #[error("source {location} is not UTF-8 text")]
    InvalidContent { location: String },

    #[error("idempotency key must not be empty")]
    EmptyIdempotencyKey,

    #[error("failed to encode request: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("{0}")]
    Http(#[source] Box<ureq::Error>),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("error making HTTP request {method} {url}: {source}")]
    Transport {
        method: String,
        url: String,
        source: Box<Error>,
    },

    #[error("can't decode {content_type} response (HTTP {status}): {source}")]
    Decode {
        status: u16,
        content_type: String,
        source: serde_json::Error,
    },

    #[error("the server returned an HTML page instead of JSON. This typically happens when it fails with an error page (e.g. HTTP 500); check the server logs or try again later")]
    HtmlResponse { source: Box<Error> },

    #[error("server rejected the request (HTTP {status}): {message}")]
    Remote {
        status: u16,
        name: Option<String>,
        message: String,
    },

    #[error("operation cancelled")]
    Cancelled,
}
