// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Serial bootloader for RP2040: frame protocol over UART0 at 115200 8N1.

#![no_std]
#![no_main]

mod boot;
mod flash;
mod peripherals;
mod uart;

use btl_common::device::{Device, Platform};
use btl_common::dispatch::Dispatcher;
use btl_common::protocol::{RebootCause, APP_ADDR, VERSION_STR};
use btl_common::timer::ms;
use defmt_rtt as _;
use embedded_hal::digital::StatefulOutputPin;
use panic_probe as _;
use rp2040_hal::fugit::HertzU32;

use crate::peripherals::HeartbeatLed;

defmt::timestamp!("{=u32:us}", {
    // SAFETY: read-only access to the free-running counter
    unsafe { (*rp2040_hal::pac::TIMER::ptr()).timerawl().read().bits() }
});

use cortex_m_rt::entry;

#[unsafe(link_section = ".boot2")]
#[used]
pub static BOOT2: [u8; 256] = rp2040_boot2::BOOT_LOADER_GENERIC_03H;

const HEARTBEAT_PERIOD_MS: u32 = 500;

/// Board services the protocol loop and its timers run against.
struct Board {
    heartbeat_led: HeartbeatLed,
    peripheral_freq: HertzU32,
    overruns: u32,
}

impl Platform for Board {
    fn kick_tx(&mut self) {
        uart::kick_tx();
    }

    fn set_link_baud(&mut self, baud: u32) {
        match uart::set_baud(baud, self.peripheral_freq) {
            Ok(()) => defmt::info!("link now at {} baud", baud),
            Err(err) => {
                // Come back in the bootloader at the default rate
                defmt::error!("baud change to {} failed: {}", baud, err);
                boot::arm_token();
                cortex_m::peripheral::SCB::sys_reset();
            }
        }
    }

    fn system_reset(&mut self) {
        defmt::println!("Reset requested");
        boot::clear_token();
        cortex_m::peripheral::SCB::sys_reset();
    }
}

fn heartbeat(board: &mut Board, _arg: usize) {
    board.heartbeat_led.toggle().ok();

    let overruns = uart::overruns();
    if overruns != board.overruns {
        defmt::warn!("RX ring overrun: {} bytes dropped", overruns.wrapping_sub(board.overruns));
        board.overruns = overruns;
    }
}

#[entry]
fn main() -> ! {
    match boot::reboot_cause() {
        RebootCause::Soft => {
            // Requested reset: consume the token and stay
            boot::clear_token();
        }
        RebootCause::Hard if boot::app_is_valid() => {
            boot::arm_token();
            unsafe { boot::jump_to_app() }
        }
        RebootCause::Hard => {}
    }

    defmt::println!("Bootloader init");
    let p = peripherals::init();

    let Some((rx, tx)) = uart::start(p.uart) else {
        defmt::panic!("UART link already started");
    };

    let board = Board {
        heartbeat_led: p.heartbeat_led,
        peripheral_freq: p.peripheral_freq,
        overruns: 0,
    };
    let flash = flash::RomFlash::new(p.activity_led);

    let mut device = Device::new(rx, tx, Dispatcher::default(), flash, board, p.clock);
    if device
        .scheduler_mut()
        .register(heartbeat, 0, ms(HEARTBEAT_PERIOD_MS), true)
        .is_err()
    {
        defmt::warn!("No timer slot for the heartbeat");
    }

    defmt::println!(
        "{=[u8]:a} ready, application at 0x{:08x}",
        &VERSION_STR[..VERSION_STR.len() - 1],
        APP_ADDR
    );

    loop {
        device.poll();
    }
}
