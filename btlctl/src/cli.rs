// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command-line interface definitions.

use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};

use btl_common::client::{Client, FlashOptions};
use btl_common::protocol::{APP_ADDR, DEFAULT_BAUD};

use crate::commands;
use crate::transport::{Transport, DEFAULT_TIMEOUT_MS};

/// Command-line arguments.
#[derive(Parser)]
#[command(name = "btlctl")]
#[command(about = "Flashing tool for the btl serial bootloader")]
pub struct Cli {
    /// Serial port (e.g., /dev/ttyUSB0)
    #[arg(short, long, default_value = "/dev/ttyUSB0")]
    pub port: String,

    /// Link rate to switch to after connecting at 115200
    #[arg(short, long, default_value_t = DEFAULT_BAUD)]
    pub baud: u32,

    /// Per-byte read timeout in milliseconds
    #[arg(short, long, default_value_t = DEFAULT_TIMEOUT_MS)]
    pub timeout: u64,

    /// Increase log verbosity (-v: frame dumps, -vv: parser trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Commands {
    /// Print the bootloader version string
    Info,

    /// Write a raw binary image to flash
    Flash {
        /// Firmware binary file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Load address
        #[arg(short, long, value_parser = parse_u32, default_value_t = APP_ADDR)]
        addr: u32,

        /// Do not erase the target range first
        #[arg(long)]
        skip_erase: bool,

        /// Check every chunk with VERIFY after writing
        #[arg(long)]
        verify: bool,

        /// Leave the device in the bootloader when done
        #[arg(long)]
        no_reset: bool,
    },

    /// Dump a memory range to a file
    Read {
        /// Start address
        #[arg(value_parser = parse_u32)]
        addr: u32,

        /// Number of bytes
        #[arg(value_parser = parse_u32)]
        len: u32,

        /// Output file
        #[arg(value_name = "FILE")]
        out: PathBuf,
    },

    /// Reset the device
    Reset,
}

/// Accepts decimal or `0x`-prefixed hexadecimal.
fn parse_u32(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(&hex.replace('_', ""), 16),
        None => s.replace('_', "").parse(),
    };
    parsed.map_err(|e| format!("invalid number '{}': {}", s, e))
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let _ = TermLogger::init(
        level,
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    );
}

/// Execute the parsed CLI command.
pub fn run(cli: Cli) -> Result<()> {
    init_logging(cli.verbose);

    let transport = Transport::open(&cli.port, cli.timeout)?;
    log::debug!("opened {}", transport.port_name());
    let mut client = Client::new(transport);

    if cli.baud != DEFAULT_BAUD {
        commands::set_baud(&mut client, cli.baud)?;
    }

    match cli.command {
        Commands::Info => commands::info(&mut client),
        Commands::Flash {
            file,
            addr,
            skip_erase,
            verify,
            no_reset,
        } => {
            let options = FlashOptions {
                erase: !skip_erase,
                verify,
                reset: !no_reset,
            };
            commands::flash(&mut client, &file, addr, &options)
        }
        Commands::Read { addr, len, out } => commands::read(&mut client, addr, len, &out),
        Commands::Reset => commands::reset(&mut client),
    }
}
