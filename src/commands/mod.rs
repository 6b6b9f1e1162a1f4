// SPDX-License-Identifier: Apache-2.0
// Copyright (C) 2021 Profian, Inc.

use structopt::StructOpt;

mod deploy;
mod validate;

pub trait Command {
    fn execute(self) -> anyhow::Result<()>;
}

#[derive(StructOpt, Debug)]
#[structopt(about = "deploy API specifications to Gram")]
pub enum Main {
    Deploy(deploy::Deploy),
    Validate(validate::Validate),
}

impl Main {
    pub fn verbose(&self) -> bool {
        match self {
            Self::Deploy(cmd) => cmd.verbose,
            Self::Validate(cmd) => cmd.verbose,
        }
    }
}

impl Command for Main {
    fn execute(self) -> anyhow::Result<()> {
        match self {
            Self::Deploy(cmd) => cmd.execute(),
            Self::Validate(cmd) => cmd.execute(),
        }
    }
}
