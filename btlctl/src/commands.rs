// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command implementations for bootloader operations.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};

use btl_common::client::{Client, FlashOptions, Progress, Stage};
use btl_common::protocol::FLASH_SECTOR_SIZE;

use crate::transport::Transport;

/// Worst-case sector erase time used to size the erase timeout.
const SECTOR_ERASE_MS: u64 = 400;

fn progress_bar(total: u64, stage: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{msg:>7} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {percent:>3}% ({eta})",
            )?
            .progress_chars("#>-"),
    );
    pb.set_message(stage.to_string());
    Ok(pb)
}

/// Print the bootloader version.
pub fn info(client: &mut Client<Transport>) -> Result<()> {
    let version = client.info().context("INFO failed")?;
    println!("Bootloader: {}", version);
    Ok(())
}

/// Switch the link to `baud`, both on the device and locally.
pub fn set_baud(client: &mut Client<Transport>, baud: u32) -> Result<()> {
    log::info!("switching link to {} baud", baud);
    client
        .set_baud(baud)
        .with_context(|| format!("Failed to switch to {} baud", baud))
}

/// Write `file` at `addr` with erase/verify/reset per `options`.
pub fn flash(
    client: &mut Client<Transport>,
    file: &Path,
    addr: u32,
    options: &FlashOptions,
) -> Result<()> {
    let image = fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    if image.is_empty() {
        bail!("{} is empty", file.display());
    }

    println!(
        "Firmware: {} ({} bytes) -> 0x{:08x}",
        file.display(),
        image.len(),
        addr
    );

    // A large erase holds the reply back for a while
    let sectors = (image.len() as u64).div_ceil(FLASH_SECTOR_SIZE as u64);
    let erase_timeout = Duration::from_millis(sectors * SECTOR_ERASE_MS);
    let old_timeout = client.port_mut().timeout();
    if options.erase && erase_timeout > old_timeout {
        client.port_mut().set_timeout(erase_timeout)?;
    }

    let mut bar: Option<(Stage, ProgressBar)> = None;
    let result = client.flash_image(addr, &image, options, |p: Progress| {
        if bar.as_ref().is_none_or(|(stage, _)| *stage != p.stage) {
            if let Some((_, pb)) = bar.take() {
                pb.finish();
            }
            let label = p.stage.to_string();
            match progress_bar(p.total as u64, &label) {
                Ok(pb) => bar = Some((p.stage, pb)),
                Err(e) => log::warn!("progress bar unavailable: {}", e),
            }
        }
        if let Some((_, pb)) = &bar {
            pb.set_position(p.done as u64);
        }
    });

    client.port_mut().set_timeout(old_timeout)?;

    match result {
        Ok(()) => {
            if let Some((_, pb)) = bar {
                pb.finish();
            }
        }
        Err(e) => {
            if let Some((_, pb)) = bar {
                pb.abandon();
            }
            return Err(e).context("Flashing aborted, device not reset");
        }
    }

    println!("Firmware written successfully!");
    if options.reset {
        println!("Device reset.");
    } else {
        println!(
            "Use 'btlctl --port {} reset' to start the application.",
            client.port_mut().port_name()
        );
    }
    Ok(())
}

/// Dump `len` bytes from `addr` into `out`.
pub fn read(client: &mut Client<Transport>, addr: u32, len: u32, out: &Path) -> Result<()> {
    let pb = progress_bar(len as u64, "read")?;
    let data = client
        .read_memory(addr, len as usize, |p| pb.set_position(p.done as u64))
        .inspect_err(|_| pb.abandon())?;
    pb.finish();

    fs::write(out, &data).with_context(|| format!("Failed to write {}", out.display()))?;
    println!("{} bytes from 0x{:08x} saved to {}", data.len(), addr, out.display());
    Ok(())
}

/// Reset the device.
pub fn reset(client: &mut Client<Transport>) -> Result<()> {
    client.reset().context("RESET failed")?;
    println!("Device reset.");
    Ok(())
}
