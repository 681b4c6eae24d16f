// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Interrupt-driven UART0 link.
//!
//! The UART0 interrupt owns the hardware side: it drains the RX FIFO into the
//! RX ring and refills the TX FIFO from the TX ring. The main loop only ever
//! touches the other ends of the two rings.

use core::cell::RefCell;
use core::ptr::addr_of_mut;

use btl_common::ring::{Consumer, Producer, RingBuffer};
use cortex_m::interrupt::{self as irq, Mutex};
use cortex_m::peripheral::NVIC;
use rp2040_hal::fugit::HertzU32;
use rp2040_hal::pac::{self, interrupt};
use rp2040_hal::uart::{Enabled, UartPeripheral};

use crate::peripherals::{uart_config, UartRx, UartTx};

pub type Uart = UartPeripheral<Enabled, pac::UART0, (UartTx, UartRx)>;

/// Capacity of each direction. Power of two.
pub const RING_SIZE: usize = 256;

static mut RX_RING: RingBuffer<RING_SIZE> = RingBuffer::new();
static mut TX_RING: RingBuffer<RING_SIZE> = RingBuffer::new();

/// Interrupt-side endpoints plus the peripheral itself.
struct IrqLink {
    uart: Uart,
    rx: Producer<'static, RING_SIZE>,
    tx: Consumer<'static, RING_SIZE>,
    overruns: u32,
}

static LINK: Mutex<RefCell<Option<IrqLink>>> = Mutex::new(RefCell::new(None));

#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum LinkError {
    NotStarted,
    /// The peripheral refused the configuration; the link is down.
    Reconfigure,
}

/// Hand the UART to the interrupt handler and return the main-loop ends of
/// the rings. Returns `None` if the link was already started.
pub fn start(
    mut uart: Uart,
) -> Option<(Consumer<'static, RING_SIZE>, Producer<'static, RING_SIZE>)> {
    irq::free(|cs| {
        let mut slot = LINK.borrow(cs).borrow_mut();
        if slot.is_some() {
            return None;
        }

        // SAFETY: guarded by the check above, the rings are split exactly once.
        let (rx_producer, rx_consumer) = unsafe { (*addr_of_mut!(RX_RING)).split() };
        let (tx_producer, tx_consumer) = unsafe { (*addr_of_mut!(TX_RING)).split() };

        uart.enable_rx_interrupt();
        *slot = Some(IrqLink {
            uart,
            rx: rx_producer,
            tx: tx_consumer,
            overruns: 0,
        });
        Some((rx_consumer, tx_producer))
    })
    .inspect(|_| unsafe { NVIC::unmask(pac::Interrupt::UART0_IRQ) })
}

/// Make the interrupt drain the TX ring.
///
/// The PL011 TX interrupt only fires on a FIFO level transition, so the
/// interrupt is also pended by hand to start a transfer into an idle FIFO.
pub fn kick_tx() {
    irq::free(|cs| {
        if let Some(link) = LINK.borrow(cs).borrow_mut().as_mut() {
            link.uart.enable_tx_interrupt();
        }
    });
    NVIC::pend(pac::Interrupt::UART0_IRQ);
}

/// Reprogram the link rate. Bytes still in the hardware FIFOs are lost.
pub fn set_baud(baud: u32, peripheral_freq: HertzU32) -> Result<(), LinkError> {
    irq::free(|cs| {
        let mut slot = LINK.borrow(cs).borrow_mut();
        let link = slot.take().ok_or(LinkError::NotStarted)?;

        let mut uart = link
            .uart
            .disable()
            .enable(uart_config(baud), peripheral_freq)
            .map_err(|_| LinkError::Reconfigure)?;
        uart.enable_rx_interrupt();

        *slot = Some(IrqLink { uart, ..link });
        Ok(())
    })
}

/// Received bytes dropped because the RX ring was full.
pub fn overruns() -> u32 {
    irq::free(|cs| {
        LINK.borrow(cs)
            .borrow()
            .as_ref()
            .map_or(0, |link| link.overruns)
    })
}

impl IrqLink {
    fn service(&mut self) {
        let mut buf = [0u8; 32];
        while self.uart.uart_is_readable() {
            // Framing/parity errors drop the affected bytes; the parser resyncs.
            if let Ok(n) = self.uart.read_raw(&mut buf) {
                for &byte in &buf[..n] {
                    if self.rx.write(byte).is_err() {
                        self.overruns = self.overruns.wrapping_add(1);
                    }
                }
            }
        }

        while self.uart.uart_is_writable() {
            let Some(byte) = self.tx.read() else {
                self.uart.disable_tx_interrupt();
                break;
            };
            let _ = self.uart.write_raw(&[byte]);
        }
    }
}

#[interrupt]
fn UART0_IRQ() {
    irq::free(|cs| {
        if let Some(link) = LINK.borrow(cs).borrow_mut().as_mut() {
            link.service();
        }
    });
}
