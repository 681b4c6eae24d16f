// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Reboot-cause token, application validation and jump.

use btl_common::protocol::{RebootCause, APP_ADDR, BTL_INFO_ADDR, BTL_MAGIC, FLASH_BASE, FLASH_SIZE};

const RAM_START: u32 = 0x2000_0000;
const RAM_END: u32 = 0x2004_2000;

fn token() -> *mut u32 {
    BTL_INFO_ADDR as *mut u32
}

/// Read the token left in RAM by whoever caused the last reset.
pub fn reboot_cause() -> RebootCause {
    RebootCause::from_token(unsafe { token().read_volatile() })
}

/// Make the next soft reset land in the bootloader.
pub fn arm_token() {
    unsafe { token().write_volatile(BTL_MAGIC) }
}

pub fn clear_token() {
    unsafe { token().write_volatile(0) }
}

struct VectorTable {
    initial_sp: u32,
    reset_vector: u32,
}

impl VectorTable {
    unsafe fn read_from(addr: u32) -> Self {
        Self {
            initial_sp: (addr as *const u32).read_volatile(),
            reset_vector: (addr as *const u32).offset(1).read_volatile(),
        }
    }

    /// Stack in SRAM, entry point a Thumb address inside the application area.
    fn is_valid_for_app(&self) -> bool {
        let app_end = FLASH_BASE + FLASH_SIZE;
        (RAM_START..=RAM_END).contains(&self.initial_sp)
            && self.initial_sp % 4 == 0
            && (APP_ADDR..app_end).contains(&self.reset_vector)
            && self.reset_vector & 1 == 1
    }
}

/// Sanity check of the application vector table. An erased area fails it.
pub fn app_is_valid() -> bool {
    unsafe { VectorTable::read_from(APP_ADDR) }.is_valid_for_app()
}

/// Hand control to the application at `APP_ADDR`.
///
/// # Safety
/// Caller must have checked `app_is_valid()`. Peripherals configured by the
/// bootloader are left as they are.
pub unsafe fn jump_to_app() -> ! {
    prepare_for_app_handoff();
    relocate_vector_table(APP_ADDR);

    let vt = VectorTable::read_from(APP_ADDR);
    jump(vt.initial_sp, vt.reset_vector);
}

unsafe fn prepare_for_app_handoff() {
    cortex_m::interrupt::disable();

    // Clear all pending interrupts in NVIC
    const NVIC_ICPR: *mut u32 = 0xE000_E280 as *mut u32;
    NVIC_ICPR.write_volatile(0xFFFF_FFFF);

    // Disable all NVIC interrupts
    const NVIC_ICER: *mut u32 = 0xE000_E180 as *mut u32;
    NVIC_ICER.write_volatile(0xFFFF_FFFF);
}

unsafe fn relocate_vector_table(addr: u32) {
    const SCB_VTOR: *mut u32 = 0xE000_ED08 as *mut u32;
    SCB_VTOR.write_volatile(addr);

    cortex_m::asm::dsb();
    cortex_m::asm::isb();
}

unsafe fn jump(initial_sp: u32, reset_vector: u32) -> ! {
    core::arch::asm!(
        "msr msp, {sp}",
        "cpsie i",
        "bx {reset}",
        sp = in(reg) initial_sp,
        reset = in(reg) reset_vector,
        options(noreturn)
    );
}
