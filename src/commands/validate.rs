// SPDX-License-Identifier: Apache-2.0
// Copyright (C) 2021 Profian, Inc.

use super::Command;
use crate::manifest::Manifest;
use crate::source::resolve;

use std::path::PathBuf;

use anyhow::{Context, Result};
use structopt::StructOpt;

/// Checks a manifest and its sources without deploying anything
#[derive(StructOpt, Debug)]
pub struct Validate {
    /// Path to the deployment manifest
    #[structopt(short, long)]
    file: PathBuf,

    /// Log details while resolving
    #[structopt(short, long)]
    pub(super) verbose: bool,
}

impl Command for Validate {
    fn execute(self) -> Result<()> {
        let manifest = Manifest::load(&self.file)?;
        println!(
            "{}: schema {}",
            self.file.display(),
            manifest.schema_version()
        );

        for (i, source) in manifest.sources().iter().enumerate() {
            let resolved = resolve(source, manifest.base_dir())
                .with_context(|| format!("source #{} ({})", i, source.location))?;

            println!(
                "  [{}] {} {} {} ({} bytes)",
                i + 1,
                resolved.source_type,
                resolved.name,
                resolved.content_type,
                resolved.size
            );
        }

        Ok(())
    }
}
