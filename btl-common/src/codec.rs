// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Byte-at-a-time frame parser with resynchronization.
//!
//! Used by both ends of the link. The parser only tracks frame structure
//! (prefix, size, length); checksum validation is left to the caller so a
//! corrupted frame can still be inspected.

use crate::protocol::{
    frame_len, split_frame, DecodeError, Header, Packet, BYTE_TIMEOUT_US, HEADER_SIZE,
    MAX_DATA_SIZE, MAX_PKT_SIZE, PREFIX,
};

const SIZE_OFFSET: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Feed {
    /// Byte accepted, frame not finished.
    NeedMore,
    /// Framing error: state dropped, waiting for the next prefix.
    Resync,
    /// Exactly `size + 9` bytes received.
    Complete,
}

/// Per-link receive state. One instance per physical link.
pub struct Parser {
    buf: [u8; MAX_PKT_SIZE],
    len: usize,
    last_byte_us: u32,
}

impl Parser {
    pub const fn new() -> Self {
        Self {
            buf: [0; MAX_PKT_SIZE],
            len: 0,
            last_byte_us: 0,
        }
    }

    pub fn reset(&mut self) {
        self.len = 0;
    }

    pub fn is_idle(&self) -> bool {
        self.len == 0
    }

    /// Bytes accumulated so far.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_complete(&self) -> bool {
        self.len > SIZE_OFFSET && self.len == frame_len(self.declared_size())
    }

    /// Push one byte through the state machine.
    pub fn feed(&mut self, byte: u8) -> Feed {
        if self.is_complete() {
            // The previous frame was never reset by the caller.
            self.reset();
        }

        if self.len == 0 && byte != PREFIX {
            return Feed::Resync;
        }

        self.buf[self.len] = byte;
        self.len += 1;

        if self.len == SIZE_OFFSET + 1 && self.declared_size() > MAX_DATA_SIZE {
            self.reset();
            return Feed::Resync;
        }

        if self.len < HEADER_SIZE || self.len < frame_len(self.declared_size()) {
            return Feed::NeedMore;
        }
        Feed::Complete
    }

    /// `feed`, recording the arrival time for the inter-byte timeout.
    pub fn feed_at(&mut self, byte: u8, now_us: u32) -> Feed {
        self.last_byte_us = now_us;
        self.feed(byte)
    }

    /// Drop a half-received frame after `BYTE_TIMEOUT_US` of silence.
    /// Returns true if state was discarded.
    pub fn expire(&mut self, now_us: u32) -> bool {
        if self.len == 0 || self.is_complete() {
            return false;
        }
        if now_us.wrapping_sub(self.last_byte_us) > BYTE_TIMEOUT_US {
            self.reset();
            return true;
        }
        false
    }

    /// Raw bytes of the frame in progress (or just completed).
    pub fn frame(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Header of a complete frame, checksum not verified.
    pub fn header(&self) -> Option<Header> {
        split_frame(self.frame()).ok().map(|(header, _, _)| header)
    }

    pub fn checksum_ok(&self) -> bool {
        self.packet().is_ok()
    }

    /// Decode the completed frame, verifying its checksum.
    pub fn packet(&self) -> Result<Packet, DecodeError> {
        Packet::decode(self.frame())
    }

    fn declared_size(&self) -> usize {
        if self.len > SIZE_OFFSET {
            self.buf[SIZE_OFFSET] as usize
        } else {
            0
        }
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}
