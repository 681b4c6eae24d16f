// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Protocol engine shared by the serial bootloader and its host tool.
//!
//! This crate supports both `no_std` (embedded) and `std` (host) environments:
//! - Default: `no_std`, no logging backend
//! - `defmt` feature: device-side logging through defmt
//! - `log` feature: logging through the `log` facade
//! - `std` feature: enables the blocking host client (implies `log`)

#![cfg_attr(not(any(feature = "std", test)), no_std)]

pub mod codec;
pub mod device;
pub mod dispatch;
pub mod protocol;
pub mod ring;
pub mod timer;

#[cfg(feature = "std")]
pub mod client;

// Re-export commonly used types
pub use codec::{Feed, Parser};
pub use device::{Device, Platform};
pub use dispatch::{Action, CommandError, Dispatcher, Flash, Outcome, Region, PROTECTED};
pub use protocol::{Command, DecodeError, Header, Packet, Payload, RebootCause, Status};
pub use protocol::{APP_ADDR, BTL_ADDR, BTL_INFO_ADDR, BTL_MAGIC, BTL_SIZE, FLASH_BASE};
pub use protocol::{DEFAULT_BAUD, FLASH_PAGE_SIZE, FLASH_SECTOR_SIZE, MAX_DATA_SIZE};
pub use ring::RingBuffer;
pub use timer::{Clock, Scheduler};
