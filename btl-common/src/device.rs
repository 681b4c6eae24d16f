// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Device-side protocol loop.
//!
//! Glues one link's ring buffers, parser and the dispatcher together with the
//! timer scheduler. `poll` never blocks: with no input it only ticks timers.
//!
//! One command is in flight at a time. While a reply is still being pushed
//! into the TX ring, or a reset/baud change is waiting for it to drain, no
//! new input is consumed.

use crate::codec::{Feed, Parser};
use crate::dispatch::{Action, Dispatcher, Flash, Outcome};
use crate::protocol::{Frame, SETTLE_DELAY_US};
use crate::ring::{Consumer, Producer};
use crate::timer::{Clock, Scheduler};

/// Link and system controls the loop needs from the board.
pub trait Platform {
    /// Make sure the transmitter drains the TX ring (e.g. enable the TX
    /// interrupt). Called after new bytes were queued.
    fn kick_tx(&mut self);

    /// Switch the link to a new baud rate.
    fn set_link_baud(&mut self, baud: u32);

    /// Full system reset. On hardware this does not return.
    fn system_reset(&mut self);
}

/// Maximum number of timers the loop's scheduler can hold.
pub const MAX_TIMERS: usize = 4;

struct PendingAction {
    action: Action,
    queued_at: u32,
}

/// One physical link: `N` is the ring buffer capacity.
pub struct Device<'a, F, P, K, const N: usize>
where
    F: Flash,
    P: Platform,
    K: Clock + Clone,
{
    rx: Consumer<'a, N>,
    tx: Producer<'a, N>,
    parser: Parser,
    dispatcher: Dispatcher,
    flash: F,
    platform: P,
    clock: K,
    scheduler: Scheduler<P, K, MAX_TIMERS>,
    outbox: Frame,
    sent: usize,
    pending: Option<PendingAction>,
}

impl<'a, F, P, K, const N: usize> Device<'a, F, P, K, N>
where
    F: Flash,
    P: Platform,
    K: Clock + Clone,
{
    pub fn new(
        rx: Consumer<'a, N>,
        tx: Producer<'a, N>,
        dispatcher: Dispatcher,
        flash: F,
        platform: P,
        clock: K,
    ) -> Self {
        Self {
            rx,
            tx,
            parser: Parser::new(),
            dispatcher,
            flash,
            platform,
            scheduler: Scheduler::new(clock.clone()),
            clock,
            outbox: Frame::new(),
            sent: 0,
            pending: None,
        }
    }

    /// Timers whose callbacks get the board as context.
    pub fn scheduler_mut(&mut self) -> &mut Scheduler<P, K, MAX_TIMERS> {
        &mut self.scheduler
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    /// True while a reply or a deferred action is outstanding.
    pub fn is_busy(&self) -> bool {
        self.sent < self.outbox.len() || self.pending.is_some()
    }

    /// One iteration of the main loop.
    pub fn poll(&mut self) {
        let now = self.clock.now_us();

        self.scheduler.tick(&mut self.platform);
        self.flush_outbox();

        if self.is_busy() {
            self.apply_pending(now);
            return;
        }

        if self.parser.expire(now) {
            #[cfg(feature = "defmt")]
            defmt::trace!("partial frame timed out");
            #[cfg(feature = "log")]
            log::trace!("partial frame timed out");
        }

        let Some(byte) = self.rx.read() else {
            return;
        };

        match self.parser.feed_at(byte, now) {
            Feed::NeedMore => {}
            Feed::Resync => {
                #[cfg(feature = "defmt")]
                defmt::trace!("resync on {=u8:#x}", byte);
                #[cfg(feature = "log")]
                log::trace!("resync on {:#04x}", byte);
            }
            Feed::Complete => self.handle_frame(now),
        }
    }

    fn handle_frame(&mut self, now: u32) {
        let request = self.parser.packet();
        self.parser.reset();

        let request = match request {
            Ok(request) => request,
            Err(_err) => {
                #[cfg(feature = "defmt")]
                defmt::debug!("dropping frame: {}", _err);
                #[cfg(feature = "log")]
                log::debug!("dropping frame: {:?}", _err);
                return;
            }
        };

        let outcome = self.dispatcher.dispatch(&request, &mut self.flash);
        log_outcome(&outcome);

        self.outbox = outcome.reply.encode();
        self.sent = 0;
        self.flush_outbox();

        if let Some(action) = outcome.action {
            self.pending = Some(PendingAction {
                action,
                queued_at: now,
            });
        }
    }

    fn flush_outbox(&mut self) {
        if self.sent >= self.outbox.len() {
            return;
        }
        let written = self.tx.write_bulk(&self.outbox[self.sent..]);
        if written > 0 {
            self.sent += written;
            self.platform.kick_tx();
        }
    }

    /// Apply a deferred action once the reply is out of the TX ring and the
    /// settle delay has passed.
    fn apply_pending(&mut self, now: u32) {
        if self.sent < self.outbox.len() || !self.tx.is_empty() {
            return;
        }
        let Some(pending) = &self.pending else {
            return;
        };
        if now.wrapping_sub(pending.queued_at) < SETTLE_DELAY_US {
            return;
        }

        let action = pending.action;
        self.pending = None;
        match action {
            Action::SetBaud(baud) => self.platform.set_link_baud(baud),
            Action::Reset => self.platform.system_reset(),
        }
    }
}

fn log_outcome(outcome: &Outcome) {
    match outcome.error {
        None => {
            #[cfg(feature = "defmt")]
            defmt::debug!("cmd {=u8:#x} ok", outcome.reply.header.base_cmd());
            #[cfg(feature = "log")]
            log::debug!("cmd {:#04x} ok", outcome.reply.header.base_cmd());
        }
        Some(_err) => {
            #[cfg(feature = "defmt")]
            defmt::warn!("cmd {=u8:#x} failed: {}", outcome.reply.header.base_cmd(), _err);
            #[cfg(feature = "log")]
            log::warn!("cmd {:#04x} failed: {:?}", outcome.reply.header.base_cmd(), _err);
        }
    }
}
