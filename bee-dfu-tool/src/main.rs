// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

use anyhow::Result;
use clap::Parser;

use bee_dfu_tool::cli::{self, Cli};

fn main() -> Result<()> {
    pretty_env_logger::init();
    cli::run(Cli::parse())
}
