// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Peripheral initialization for the bootloader.

use btl_common::protocol::DEFAULT_BAUD;
use btl_common::timer::Clock;
use rp2040_hal as hal;
use rp2040_hal::fugit::{HertzU32, RateExtU32};
use rp2040_hal::uart::{DataBits, StopBits, UartConfig, UartPeripheral};
use rp2040_hal::Clock as _;

use crate::uart::Uart;

pub type HeartbeatLed =
    hal::gpio::Pin<hal::gpio::bank0::Gpio25, hal::gpio::FunctionSioOutput, hal::gpio::PullDown>;
pub type ActivityLed =
    hal::gpio::Pin<hal::gpio::bank0::Gpio15, hal::gpio::FunctionSioOutput, hal::gpio::PullDown>;

pub type UartTx =
    hal::gpio::Pin<hal::gpio::bank0::Gpio0, hal::gpio::FunctionUart, hal::gpio::PullDown>;
pub type UartRx =
    hal::gpio::Pin<hal::gpio::bank0::Gpio1, hal::gpio::FunctionUart, hal::gpio::PullDown>;

/// Free-running microsecond clock: the low word of the RP2040 timer.
#[derive(Clone, Copy)]
pub struct MonoClock(hal::Timer);

impl Clock for MonoClock {
    fn now_us(&self) -> u32 {
        self.0.get_counter_low()
    }
}

pub struct Peripherals {
    pub heartbeat_led: HeartbeatLed,
    pub activity_led: ActivityLed,
    pub clock: MonoClock,
    pub uart: Uart,
    pub peripheral_freq: HertzU32,
}

/// 8N1 at `baud`.
pub fn uart_config(baud: u32) -> UartConfig {
    UartConfig::new(baud.Hz(), DataBits::Eight, None, StopBits::One)
}

pub fn init() -> Peripherals {
    let mut pac = unsafe { hal::pac::Peripherals::steal() };

    let mut watchdog = hal::Watchdog::new(pac.WATCHDOG);
    let clocks = hal::clocks::init_clocks_and_plls(
        12_000_000u32,
        pac.XOSC,
        pac.CLOCKS,
        pac.PLL_SYS,
        pac.PLL_USB,
        &mut pac.RESETS,
        &mut watchdog,
    )
    .unwrap();

    let timer = hal::Timer::new(pac.TIMER, &mut pac.RESETS, &clocks);
    let sio = hal::Sio::new(pac.SIO);
    let pins = hal::gpio::Pins::new(
        pac.IO_BANK0,
        pac.PADS_BANK0,
        sio.gpio_bank0,
        &mut pac.RESETS,
    );

    let uart_pins: (UartTx, UartRx) = (pins.gpio0.into_function(), pins.gpio1.into_function());
    let peripheral_freq = clocks.peripheral_clock.freq();
    let uart = UartPeripheral::new(pac.UART0, uart_pins, &mut pac.RESETS)
        .enable(uart_config(DEFAULT_BAUD), peripheral_freq)
        .unwrap();

    Peripherals {
        heartbeat_led: pins.gpio25.into_push_pull_output(),
        activity_led: pins.gpio15.into_push_pull_output(),
        clock: MonoClock(timer),
        uart,
        peripheral_freq,
    }
}
