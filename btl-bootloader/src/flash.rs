// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Flash read/write/erase through the RP2040 ROM routines.
//!
//! On RP2040, flash operations (erase/program) require disabling XIP first.
//! The full sequence is:
//!   1. connect_internal_flash()
//!   2. flash_exit_xip()
//!   3. flash_range_erase() or flash_range_program()
//!   4. flash_flush_cache()
//!   5. flash_enter_cmd_xip()
//!
//! All code executing during steps 1-5 must run from RAM, not flash.
//! We use `#[link_section = ".data"]` to place critical functions in RAM,
//! and pre-resolve all ROM function pointers at init time.
//!
//! The ROM programs whole 256-byte pages and erases whole 4 KiB sectors.
//! `RomFlash` hides that: writes of any length are padded with `0xFF`
//! (which leaves NOR cells untouched) and erases are widened to sectors.

use btl_common::dispatch::Flash;
use btl_common::protocol::{FLASH_BASE, FLASH_PAGE_SIZE, FLASH_SECTOR_SIZE, FLASH_SIZE};
use embedded_hal::digital::OutputPin;

use crate::peripherals::ActivityLed;

// ROM function pointer types
type RomFnVoid = unsafe extern "C" fn();
type RomFnErase = unsafe extern "C" fn(u32, usize, u32, u8);
type RomFnProgram = unsafe extern "C" fn(u32, *const u8, usize);

/// ROM function pointers, resolved once at init from the ROM table.
/// Stored in static RAM so RAM-resident functions can call them without
/// accessing flash-based code.
static mut ROM_CONNECT_INTERNAL_FLASH: RomFnVoid = dummy_void;
static mut ROM_FLASH_EXIT_XIP: RomFnVoid = dummy_void;
static mut ROM_FLASH_RANGE_ERASE: RomFnErase = dummy_erase;
static mut ROM_FLASH_RANGE_PROGRAM: RomFnProgram = dummy_program;
static mut ROM_FLASH_FLUSH_CACHE: RomFnVoid = dummy_void;
static mut ROM_FLASH_ENTER_CMD_XIP: RomFnVoid = dummy_void;

unsafe extern "C" fn dummy_void() {}
unsafe extern "C" fn dummy_erase(_: u32, _: usize, _: u32, _: u8) {}
unsafe extern "C" fn dummy_program(_: u32, _: *const u8, _: usize) {}

/// 4 KiB sector erase command.
const SECTOR_ERASE_CMD: u8 = 0x20;

/// Look up a ROM function by its two-character tag.
/// ROM table pointer at 0x14 and lookup function at 0x18 are 16-bit halfword pointers.
unsafe fn rom_func_lookup(tag: &[u8; 2]) -> usize {
    let fn_table = *(0x14 as *const u16) as *const u16;
    let lookup: unsafe extern "C" fn(*const u16, u32) -> usize =
        core::mem::transmute::<usize, unsafe extern "C" fn(*const u16, u32) -> usize>(
            *(0x18 as *const u16) as usize,
        );
    let code = u16::from_le_bytes(*tag) as u32;
    lookup(fn_table, code)
}

/// Resolve the ROM flash function pointers. Must run once, while XIP is
/// still active, before any erase or program.
fn init_rom() {
    unsafe {
        ROM_CONNECT_INTERNAL_FLASH =
            core::mem::transmute::<usize, RomFnVoid>(rom_func_lookup(b"IF"));
        ROM_FLASH_EXIT_XIP = core::mem::transmute::<usize, RomFnVoid>(rom_func_lookup(b"EX"));
        ROM_FLASH_RANGE_ERASE =
            core::mem::transmute::<usize, RomFnErase>(rom_func_lookup(b"RE"));
        ROM_FLASH_RANGE_PROGRAM =
            core::mem::transmute::<usize, RomFnProgram>(rom_func_lookup(b"RP"));
        ROM_FLASH_FLUSH_CACHE = core::mem::transmute::<usize, RomFnVoid>(rom_func_lookup(b"FC"));
        ROM_FLASH_ENTER_CMD_XIP =
            core::mem::transmute::<usize, RomFnVoid>(rom_func_lookup(b"CX"));
    }
}

/// Erase `size` bytes at a flash-relative, sector-aligned offset.
/// Runs entirely from RAM with proper XIP teardown/setup.
///
/// # Safety
/// `init_rom()` must have been called first.
#[link_section = ".data"]
#[inline(never)]
unsafe fn rom_erase(offset: u32, size: u32) {
    cortex_m::interrupt::disable();
    ROM_CONNECT_INTERNAL_FLASH();
    ROM_FLASH_EXIT_XIP();
    ROM_FLASH_RANGE_ERASE(offset, size as usize, FLASH_SECTOR_SIZE, SECTOR_ERASE_CMD);
    ROM_FLASH_FLUSH_CACHE();
    ROM_FLASH_ENTER_CMD_XIP();
    cortex_m::interrupt::enable();
}

/// Program whole pages at a flash-relative, page-aligned offset.
/// Runs entirely from RAM with proper XIP teardown/setup.
///
/// # Safety
/// `init_rom()` must have been called first.
#[link_section = ".data"]
#[inline(never)]
unsafe fn rom_program(offset: u32, data: *const u8, len: usize) {
    cortex_m::interrupt::disable();
    ROM_CONNECT_INTERNAL_FLASH();
    ROM_FLASH_EXIT_XIP();
    ROM_FLASH_RANGE_PROGRAM(offset, data, len);
    ROM_FLASH_FLUSH_CACHE();
    ROM_FLASH_ENTER_CMD_XIP();
    cortex_m::interrupt::enable();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum FlashError {
    /// Range not fully inside the XIP flash window.
    OutOfRange { addr: u32, len: u32 },
    /// Read-back after programming differs from the data written.
    Readback { addr: u32 },
}

/// Absolute-address flash driver used by the command dispatcher.
pub struct RomFlash {
    activity: ActivityLed,
}

impl RomFlash {
    pub fn new(activity: ActivityLed) -> Self {
        init_rom();
        Self { activity }
    }

    fn check_range(addr: u32, len: u32) -> Result<u32, FlashError> {
        let end = addr as u64 + len as u64;
        if addr < FLASH_BASE || end > FLASH_BASE as u64 + FLASH_SIZE as u64 {
            return Err(FlashError::OutOfRange { addr, len });
        }
        Ok(addr - FLASH_BASE)
    }

    fn program_page(&mut self, page_offset: u32, page: &[u8; FLASH_PAGE_SIZE as usize]) {
        self.activity.set_high().ok();
        unsafe { rom_program(page_offset, page.as_ptr(), page.len()) };
        self.activity.set_low().ok();
    }
}

impl Flash for RomFlash {
    type Error = FlashError;

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        Self::check_range(addr, buf.len() as u32)?;
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = unsafe { ((addr + i as u32) as *const u8).read_volatile() };
        }
        Ok(())
    }

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashError> {
        let offset = Self::check_range(addr, data.len() as u32)?;
        let page_size = FLASH_PAGE_SIZE as usize;

        let mut done = 0;
        while done < data.len() {
            let at = offset as usize + done;
            let page_offset = at - at % page_size;
            let in_page = at - page_offset;
            let n = (page_size - in_page).min(data.len() - done);

            let mut page = [0xFFu8; FLASH_PAGE_SIZE as usize];
            page[in_page..in_page + n].copy_from_slice(&data[done..done + n]);
            self.program_page(page_offset as u32, &page);
            done += n;
        }

        let mut readback = [0u8; 64];
        for (i, chunk) in data.chunks(readback.len()).enumerate() {
            let chunk_addr = addr + (i * readback.len()) as u32;
            let actual = &mut readback[..chunk.len()];
            self.read(chunk_addr, actual)?;
            if actual != chunk {
                return Err(FlashError::Readback { addr: chunk_addr });
            }
        }
        Ok(())
    }

    fn erase(&mut self, addr: u32, len: u32) -> Result<(), FlashError> {
        let offset = Self::check_range(addr, len)?;
        let start = offset - offset % FLASH_SECTOR_SIZE;
        let end = (offset as u64 + len as u64).next_multiple_of(FLASH_SECTOR_SIZE as u64) as u32;

        defmt::debug!("erase 0x{:08x}..0x{:08x}", FLASH_BASE + start, FLASH_BASE + end);
        self.activity.set_high().ok();
        unsafe { rom_erase(start, end - start) };
        self.activity.set_low().ok();
        Ok(())
    }
}
