// SPDX-License-Identifier: Apache-2.0
// Copyright (C) 2021 Profian, Inc.

use super::Command;
use crate::api::{Deployments, IdempotencyKey};
use crate::config::{Config, CredentialProvider, SystemEnv};
use crate::iotools::CancelToken;
use crate::manifest::Manifest;

use std::path::PathBuf;

use anyhow::{Context, Result};
use structopt::StructOpt;

/// Creates a deployment from a manifest
///
/// Reads GRAM_API_KEY, GRAM_PROJECT_SLUG and GRAM_HOST (plus the optional
/// GRAM_SCHEME and GRAM_TIMEOUT) from the environment.
#[derive(StructOpt, Debug)]
pub struct Deploy {
    /// Path to the deployment manifest
    #[structopt(short, long)]
    file: PathBuf,

    /// Reuse this key to safely retry an earlier deployment (derived from
    /// the manifest's content if omitted)
    #[structopt(long)]
    idempotency_key: Option<IdempotencyKey>,

    /// Don't display the progress bar
    #[structopt(short, long)]
    quiet: bool,

    /// Log request and response details
    #[structopt(short, long)]
    pub(super) verbose: bool,
}

impl Command for Deploy {
    fn execute(self) -> Result<()> {
        let token = CancelToken::default();
        let handler = token.clone();
        ctrlc::set_handler(move || handler.cancel())?;

        let manifest = Manifest::load(&self.file)?;
        println!(
            "Loaded manifest {} ({} sources)",
            self.file.display(),
            manifest.sources().len()
        );

        let env = SystemEnv;
        let credentials = CredentialProvider::new(&env);
        let credential = credentials.credential()?;
        let project = credentials.project_scope()?;
        let config = Config::from_env(&env)?;

        let deployments = Deployments::connect(&config, token).progress(!self.quiet);
        let result = deployments
            .create(&manifest, &credential, &project, self.idempotency_key)
            .context("failed to create deployment")?;

        println!("Created deployment {}", result.id);
        if let Some(status) = &result.status {
            println!("  status: {}", status);
        }
        for (i, asset) in result.openapiv3_assets.iter().enumerate() {
            let name = asset.name.as_deref().unwrap_or("-");
            let id = asset.id.as_deref().unwrap_or("-");
            println!("  [{}] {} ({})", i + 1, name, id);
        }

        Ok(())
    }
}
