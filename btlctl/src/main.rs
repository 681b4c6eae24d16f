// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Host flashing tool for the btl serial bootloader.
//!
//! Usage:
//!   btlctl --port /dev/ttyUSB0 info
//!   btlctl --port /dev/ttyUSB0 --baud 921600 flash app.bin --verify
//!   btlctl --port /dev/ttyUSB0 read 0x10000000 0x10000 dump.bin
//!   btlctl --port /dev/ttyUSB0 reset

mod cli;
mod commands;
mod transport;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let args = cli::Cli::parse();
    cli::run(args)
}
