// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Wire protocol shared by the bootloader and the host tool.
//!
//! Every frame on the serial link has the same layout, multi-byte fields
//! little-endian:
//!
//! ```text
//! prefix '#' | size | cmd | status | addr (4) | payload (size) | crc8
//! ```
//!
//! The checksum is a CRC-8 (polynomial 0xD5, init 0, no reflection) over
//! `cmd`, `status`, `addr` and `payload`. `prefix`, `size` and the checksum
//! byte itself are not covered.

use crc::{Crc, NoTable, CRC_8_DVB_S2};
use heapless::Vec;

// --- Frame layout ---

pub const PREFIX: u8 = b'#';
pub const REPLY_BIT: u8 = 0x80;

/// Bytes before the payload: prefix, size, cmd, status, addr.
pub const HEADER_SIZE: usize = 8;
pub const MAX_DATA_SIZE: usize = 64;
pub const MAX_PKT_SIZE: usize = HEADER_SIZE + MAX_DATA_SIZE + 1;

/// CRC-8/DVB-S2 is the 0xD5 polynomial with zero init and no final xor.
pub const CRC_POLY: u8 = 0xD5;
const CRC8: Crc<u8, NoTable> = Crc::<u8, NoTable>::new(&CRC_8_DVB_S2);

const _: () = assert!(CRC_8_DVB_S2.poly == CRC_POLY);

// --- Memory layout constants ---

pub const FLASH_BASE: u32 = 0x1000_0000;
pub const FLASH_SIZE: u32 = 2 * 1024 * 1024;
pub const FLASH_SECTOR_SIZE: u32 = 4096;
pub const FLASH_PAGE_SIZE: u32 = 256;

/// Flash footprint of the bootloader itself. Never writable or erasable
/// through the protocol.
pub const BTL_ADDR: u32 = FLASH_BASE;
pub const BTL_SIZE: u32 = 0x1_0000; // 64KB

/// Application image starts right after the bootloader.
pub const APP_ADDR: u32 = BTL_ADDR + BTL_SIZE;

/// Reboot-cause token: survives a soft reset, not a power cycle.
pub const BTL_INFO_ADDR: u32 = 0x2003_BFF0;
pub const BTL_MAGIC: u32 = 0xE2E4;

/// Reply payload of `INFO`, NUL terminated.
pub const VERSION_STR: &[u8] = b"BTL V1.0\0";

// --- Link parameters ---

pub const DEFAULT_BAUD: u32 = 115_200;
pub const SUPPORTED_BAUDS: [u32; 8] = [
    57_600, 115_200, 230_400, 460_800, 500_000, 576_000, 921_600, 1_000_000,
];

/// A partially received frame is dropped after this much silence.
pub const BYTE_TIMEOUT_US: u32 = 1_000;

/// Delay between handing a reply to the transmitter and applying a
/// reset or baud change, so the reply leaves on the old link settings.
pub const SETTLE_DELAY_US: u32 = 20_000;

pub fn is_supported_baud(baud: u32) -> bool {
    SUPPORTED_BAUDS.contains(&baud)
}

// --- Commands and status ---

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    Info = 0x00,
    Erase = 0x01,
    Write = 0x02,
    Read = 0x03,
    Verify = 0x04,
    Baud = 0x05,
    Reset = 0xFF,
}

impl Command {
    pub const ALL: [Command; 7] = [
        Command::Info,
        Command::Erase,
        Command::Write,
        Command::Read,
        Command::Verify,
        Command::Baud,
        Command::Reset,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Command {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Command::ALL
            .iter()
            .copied()
            .find(|cmd| cmd.code() == code)
            .ok_or(code)
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Status {
    Ok = 0x00,
    Error = 0xFF,
}

impl Status {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Status::Ok),
            0xFF => Some(Status::Error),
            _ => None,
        }
    }
}

// --- Reboot cause ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RebootCause {
    /// The token was armed: the reset was requested on purpose.
    Soft,
    /// Power-on or hard reset: anything but the magic value.
    Hard,
}

impl RebootCause {
    pub fn from_token(token: u32) -> Self {
        if token == BTL_MAGIC {
            RebootCause::Soft
        } else {
            RebootCause::Hard
        }
    }
}

// --- Packet ---

pub type Payload = Vec<u8, MAX_DATA_SIZE>;
pub type Frame = Vec<u8, MAX_PKT_SIZE>;

/// Fixed part of a frame, minus prefix and size which are derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Header {
    /// Raw command byte, reply bit included.
    pub cmd: u8,
    pub status: u8,
    pub addr: u32,
}

impl Header {
    /// Command byte with the reply bit masked off, for comparing a reply
    /// against its request.
    pub fn base_cmd(&self) -> u8 {
        self.cmd & !REPLY_BIT
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DecodeError {
    BadPrefix(u8),
    Oversize(u8),
    /// Frame length does not match `size + 9`.
    Length { expected: usize, actual: usize },
    Checksum { expected: u8, actual: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PayloadTooLong(pub usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub payload: Payload,
}

impl Packet {
    /// Build a request frame. The status byte of requests is always zero.
    pub fn request(cmd: Command, addr: u32, payload: &[u8]) -> Result<Self, PayloadTooLong> {
        Ok(Self {
            header: Header {
                cmd: cmd.code(),
                status: 0,
                addr,
            },
            payload: Payload::from_slice(payload).map_err(|_| PayloadTooLong(payload.len()))?,
        })
    }

    /// Build the reply to `request`: same address, reply bit set.
    pub fn reply_to(request: &Header, status: Status, payload: Payload) -> Self {
        Self {
            header: Header {
                cmd: request.cmd | REPLY_BIT,
                status: status as u8,
                addr: request.addr,
            },
            payload,
        }
    }

    pub fn command(&self) -> Result<Command, u8> {
        Command::try_from(self.header.cmd)
    }

    pub fn status(&self) -> Option<Status> {
        Status::from_u8(self.header.status)
    }

    pub fn frame_len(&self) -> usize {
        frame_len(self.payload.len())
    }

    pub fn checksum(&self) -> u8 {
        checksum(&self.header, &self.payload)
    }

    /// Serialize into a complete frame, checksum appended.
    pub fn encode(&self) -> Frame {
        let mut frame = Frame::new();
        // Capacity is MAX_PKT_SIZE and the payload is bounded, pushes cannot fail.
        let _ = frame.push(PREFIX);
        let _ = frame.push(self.payload.len() as u8);
        let _ = frame.push(self.header.cmd);
        let _ = frame.push(self.header.status);
        let _ = frame.extend_from_slice(&self.header.addr.to_le_bytes());
        let _ = frame.extend_from_slice(&self.payload);
        let _ = frame.push(self.checksum());
        frame
    }

    /// Parse and validate a complete frame.
    pub fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        let (header, payload, crc) = split_frame(frame)?;
        let actual = checksum(&header, payload);
        if actual != crc {
            return Err(DecodeError::Checksum {
                expected: crc,
                actual,
            });
        }
        Ok(Self {
            header,
            // split_frame already bounded the payload to MAX_DATA_SIZE
            payload: Payload::from_slice(payload).unwrap_or_default(),
        })
    }
}

/// Total frame length for a payload of `size` bytes.
pub const fn frame_len(size: usize) -> usize {
    HEADER_SIZE + size + 1
}

/// CRC-8 over the covered fields of a frame.
pub fn checksum(header: &Header, payload: &[u8]) -> u8 {
    let mut digest = CRC8.digest();
    digest.update(&[header.cmd, header.status]);
    digest.update(&header.addr.to_le_bytes());
    digest.update(payload);
    digest.finalize()
}

/// Split a raw frame into header, payload and transmitted checksum without
/// checking the checksum.
pub fn split_frame(frame: &[u8]) -> Result<(Header, &[u8], u8), DecodeError> {
    let too_short = DecodeError::Length {
        expected: frame_len(0),
        actual: frame.len(),
    };
    let (&prefix, rest) = frame.split_first().ok_or(too_short)?;
    if prefix != PREFIX {
        return Err(DecodeError::BadPrefix(prefix));
    }
    let &size = rest.first().ok_or(too_short)?;
    if size as usize > MAX_DATA_SIZE {
        return Err(DecodeError::Oversize(size));
    }
    let expected = frame_len(size as usize);
    if frame.len() != expected {
        return Err(DecodeError::Length {
            expected,
            actual: frame.len(),
        });
    }

    let header = Header {
        cmd: frame[2],
        status: frame[3],
        addr: u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]),
    };
    Ok((header, &frame[HEADER_SIZE..expected - 1], frame[expected - 1]))
}

/// Little-endian `u32` argument at the start of a payload.
pub fn get_u32(payload: &[u8]) -> Option<u32> {
    let bytes = payload.get(..4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}
