// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use std::cell::Cell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;

use btl_common::client::Port;
use btl_common::codec::{Feed, Parser};
use btl_common::device::Platform;
use btl_common::dispatch::{Action, Dispatcher, Flash};
use btl_common::protocol::{Command, FLASH_BASE};
use btl_common::timer::Clock;

// =============================================================================
// Flash
// =============================================================================

/// Size of the simulated flash, starting at `FLASH_BASE`.
pub const MOCK_FLASH_SIZE: usize = 256 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashOp {
    Read { addr: u32, len: usize },
    Write { addr: u32, len: usize },
    Erase { addr: u32, len: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockFlashError;

/// NOR-like flash: writes can only clear bits, erase sets them back.
pub struct MockFlash {
    pub mem: Vec<u8>,
    pub ops: Vec<FlashOp>,
    /// Fail the n-th write (1-based).
    pub fail_write: Option<usize>,
    writes: usize,
}

impl MockFlash {
    pub fn new() -> Self {
        Self {
            mem: vec![0xFF; MOCK_FLASH_SIZE],
            ops: Vec::new(),
            fail_write: None,
            writes: 0,
        }
    }

    pub fn failing_write(n: usize) -> Self {
        Self {
            fail_write: Some(n),
            ..Self::new()
        }
    }

    pub fn slice(&self, addr: u32, len: usize) -> &[u8] {
        let start = (addr - FLASH_BASE) as usize;
        &self.mem[start..start + len]
    }

    pub fn fill(&mut self, addr: u32, data: &[u8]) {
        let start = (addr - FLASH_BASE) as usize;
        self.mem[start..start + data.len()].copy_from_slice(data);
    }

    pub fn writes(&self) -> Vec<(u32, usize)> {
        self.ops
            .iter()
            .filter_map(|op| match *op {
                FlashOp::Write { addr, len } => Some((addr, len)),
                _ => None,
            })
            .collect()
    }

    pub fn mutations(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| !matches!(op, FlashOp::Read { .. }))
            .count()
    }

    fn range(&self, addr: u32, len: usize) -> Result<std::ops::Range<usize>, MockFlashError> {
        let start = addr.checked_sub(FLASH_BASE).ok_or(MockFlashError)? as usize;
        let end = start.checked_add(len).ok_or(MockFlashError)?;
        if end > self.mem.len() {
            return Err(MockFlashError);
        }
        Ok(start..end)
    }
}

impl Flash for MockFlash {
    type Error = MockFlashError;

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), Self::Error> {
        self.ops.push(FlashOp::Read {
            addr,
            len: buf.len(),
        });
        let range = self.range(addr, buf.len())?;
        buf.copy_from_slice(&self.mem[range]);
        Ok(())
    }

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), Self::Error> {
        self.ops.push(FlashOp::Write {
            addr,
            len: data.len(),
        });
        self.writes += 1;
        if self.fail_write == Some(self.writes) {
            return Err(MockFlashError);
        }
        let range = self.range(addr, data.len())?;
        for (cell, &byte) in self.mem[range].iter_mut().zip(data) {
            *cell &= byte;
        }
        Ok(())
    }

    fn erase(&mut self, addr: u32, len: u32) -> Result<(), Self::Error> {
        self.ops.push(FlashOp::Erase { addr, len });
        let range = self.range(addr, len as usize)?;
        self.mem[range].fill(0xFF);
        Ok(())
    }
}

// =============================================================================
// Clock
// =============================================================================

#[derive(Clone, Default)]
pub struct TestClock(Rc<Cell<u32>>);

impl TestClock {
    pub fn set(&self, now: u32) {
        self.0.set(now);
    }

    pub fn advance(&self, us: u32) {
        self.0.set(self.0.get().wrapping_add(us));
    }
}

impl Clock for TestClock {
    fn now_us(&self) -> u32 {
        self.0.get()
    }
}

// =============================================================================
// Platform
// =============================================================================

#[derive(Default)]
pub struct MockPlatform {
    pub kicks: usize,
    pub bauds: Vec<u32>,
    pub resets: usize,
    pub heartbeats: usize,
}

impl Platform for MockPlatform {
    fn kick_tx(&mut self) {
        self.kicks += 1;
    }

    fn set_link_baud(&mut self, baud: u32) {
        self.bauds.push(baud);
    }

    fn system_reset(&mut self) {
        self.resets += 1;
    }
}

// =============================================================================
// Loopback serial port
// =============================================================================

/// Host-side port wired straight to a `Dispatcher` and a `MockFlash`.
///
/// Every request frame written by the client is dispatched synchronously;
/// the encoded reply becomes readable. Reading with nothing queued behaves
/// like a serial read timeout.
pub struct LoopbackPort {
    pub flash: MockFlash,
    pub dispatcher: Dispatcher,
    pub requests: Vec<Command>,
    pub actions: Vec<Action>,
    pub baud: u32,
    /// Bytes injected in front of the next reply.
    pub noise: Vec<u8>,
    /// Number of upcoming replies to send with a broken checksum.
    pub corrupt_replies: usize,
    /// Drop replies entirely (device not answering).
    pub silent: bool,
    parser: Parser,
    rx: VecDeque<u8>,
}

impl LoopbackPort {
    pub fn new(flash: MockFlash) -> Self {
        Self {
            flash,
            dispatcher: Dispatcher::default(),
            requests: Vec::new(),
            actions: Vec::new(),
            baud: 115_200,
            noise: Vec::new(),
            corrupt_replies: 0,
            silent: false,
            parser: Parser::new(),
            rx: VecDeque::new(),
        }
    }

    /// Queue raw bytes for the client to read.
    pub fn inject(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes);
    }

    fn handle_request(&mut self) {
        let Ok(request) = self.parser.packet() else {
            return;
        };
        if let Ok(cmd) = request.command() {
            self.requests.push(cmd);
        }

        let outcome = self.dispatcher.dispatch(&request, &mut self.flash);
        self.actions.extend(outcome.action);
        if self.silent {
            return;
        }

        let mut frame = outcome.reply.encode();
        if self.corrupt_replies > 0 {
            self.corrupt_replies -= 1;
            let last = frame.len() - 1;
            frame[last] ^= 0x5A;
        }
        self.rx.extend(self.noise.drain(..));
        self.rx.extend(frame.iter());
    }
}

impl io::Write for LoopbackPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for &byte in buf {
            if self.parser.feed(byte) == Feed::Complete {
                self.handle_request();
                self.parser.reset();
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Read for LoopbackPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.rx.pop_front() {
            Some(byte) => {
                buf[0] = byte;
                Ok(1)
            }
            None => Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out")),
        }
    }
}

impl Port for LoopbackPort {
    fn set_baud_rate(&mut self, baud: u32) -> io::Result<()> {
        self.baud = baud;
        Ok(())
    }
}
