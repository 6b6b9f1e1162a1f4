// SPDX-License-Identifier: Apache-2.0
// Copyright (C) 2021 Profian, Inc.

mod api;
mod commands;
mod config;
mod error;
mod iotools;
mod manifest;
mod source;

use commands::Command;
use structopt::StructOpt;

fn main() -> anyhow::Result<()> {
    let main = commands::Main::from_args();

    let filter = if main.verbose() { "warn,gram=debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    main.execute()
}
