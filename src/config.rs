// SPDX-License-Identifier: Apache-2.0
// Copyright (C) 2021 Profian, Inc.

//! Settings and credentials read from the environment
//!
//! Nothing here touches the process environment on its own: all lookups go
//! through an [`Env`], and the values are read once at startup into
//! immutable structs.

use crate::error::{Error, Result};

use std::collections::HashMap;
use std::fmt::{Debug, Display};
use std::time::Duration;

/// A source of named string settings
pub trait Env {
    fn var(&self, name: &str) -> Option<String>;
}

/// The process environment
#[derive(Copy, Clone, Debug, Default)]
pub struct SystemEnv;

impl Env for SystemEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl Env for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

// Empty values count as unset.
fn lookup<E: Env + ?Sized>(env: &E, name: &str) -> Option<String> {
    env.var(name).filter(|v| !v.is_empty())
}

/// A string that must never be printed
///
/// Both `Debug` and `Display` print a placeholder; the value is only
/// available through [`Secret::expose`].
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret([REDACTED])")
    }
}

impl Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Every API key starts with this
pub const API_KEY_PREFIX: &str = "gram";

/// Checks that `raw` has the shape of an API key
///
/// The key is otherwise opaque, so on success it is returned unchanged.
pub fn validate(raw: &str) -> Result<&str> {
    if raw.starts_with(API_KEY_PREFIX) {
        Ok(raw)
    } else {
        Err(Error::MalformedCredential {
            prefix: API_KEY_PREFIX,
        })
    }
}

/// Supplies the API key and the project it is scoped to
#[derive(Debug)]
pub struct CredentialProvider<'a, E: Env + ?Sized> {
    env: &'a E,
}

impl<'a, E: Env + ?Sized> CredentialProvider<'a, E> {
    pub const API_KEY: &'static str = "GRAM_API_KEY";
    pub const PROJECT_SLUG: &'static str = "GRAM_PROJECT_SLUG";

    pub fn new(env: &'a E) -> Self {
        Self { env }
    }

    pub fn credential(&self) -> Result<Secret> {
        let raw = lookup(self.env, Self::API_KEY)
            .ok_or(Error::MissingCredential { var: Self::API_KEY })?;

        validate(&raw)?;
        Ok(Secret::new(raw))
    }

    pub fn project_scope(&self) -> Result<Secret> {
        lookup(self.env, Self::PROJECT_SLUG)
            .map(Secret::new)
            .ok_or(Error::MissingSetting {
                var: Self::PROJECT_SLUG,
            })
    }
}

/// Where the deployment service lives and how long to wait for it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub scheme: String,
    pub host: String,
    pub timeout: Duration,
}

impl Config {
    pub const HOST: &'static str = "GRAM_HOST";
    pub const SCHEME: &'static str = "GRAM_SCHEME";
    pub const TIMEOUT: &'static str = "GRAM_TIMEOUT";

    const DEFAULT_SCHEME: &'static str = "https";
    const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn from_env<E: Env + ?Sized>(env: &E) -> Result<Self> {
        let host = lookup(env, Self::HOST).ok_or(Error::MissingSetting { var: Self::HOST })?;

        let scheme = lookup(env, Self::SCHEME).unwrap_or_else(|| Self::DEFAULT_SCHEME.into());
        if scheme != "http" && scheme != "https" {
            return Err(Error::InvalidSetting {
                var: Self::SCHEME,
                value: scheme,
                reason: "expected 'http' or 'https'",
            });
        }

        let timeout = match lookup(env, Self::TIMEOUT) {
            None => Self::DEFAULT_TIMEOUT,
            Some(value) => match value.parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(Error::InvalidSetting {
                        var: Self::TIMEOUT,
                        value,
                        reason: "expected a positive number of seconds",
                    })
                }
            },
        };

        Ok(Self {
            scheme,
            host,
            timeout,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}://{}{}", self.scheme, self.host, path)
    }
}
