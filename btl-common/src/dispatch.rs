// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command dispatcher: validated request in, reply plus deferred action out.
//!
//! Handlers report a single success/failure signal. Whatever went wrong, the
//! wire only ever sees `status = ERROR` with an empty payload; the
//! `CommandError` is kept for local logging.
//!
//! WRITE and ERASE (and VERIFY) are refused whenever any byte of the
//! requested range falls inside the protected region. The check is computed
//! from the request itself on every call, before the flash is touched.

use crate::protocol::{
    get_u32, is_supported_baud, Command, Header, Packet, Payload, Status, BTL_ADDR, BTL_SIZE,
    MAX_DATA_SIZE, VERSION_STR,
};

/// Flash primitives provided by the board.
///
/// Addresses are absolute. Implementations may round erase requests out to
/// sector boundaries, so the protected region must be sector aligned.
pub trait Flash {
    type Error;

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), Self::Error>;
    fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), Self::Error>;
    fn erase(&mut self, addr: u32, len: u32) -> Result<(), Self::Error>;
}

impl<F: Flash + ?Sized> Flash for &mut F {
    type Error = F::Error;

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), Self::Error> {
        (**self).read(addr, buf)
    }

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), Self::Error> {
        (**self).write(addr, data)
    }

    fn erase(&mut self, addr: u32, len: u32) -> Result<(), Self::Error> {
        (**self).erase(addr, len)
    }
}

/// Half-open address interval `[start, start + size)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Region {
    pub start: u32,
    pub size: u32,
}

/// The bootloader's own flash footprint.
pub const PROTECTED: Region = Region::new(BTL_ADDR, BTL_SIZE);

impl Region {
    pub const fn new(start: u32, size: u32) -> Self {
        Self { start, size }
    }

    /// One past the last byte, widened so the top of the address space
    /// does not wrap.
    pub const fn end(&self) -> u64 {
        self.start as u64 + self.size as u64
    }

    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.start && (addr as u64) < self.end()
    }

    /// True if any byte of `[addr, addr + len)` lies inside the region.
    pub fn overlaps(&self, addr: u32, len: u32) -> bool {
        if len == 0 || self.size == 0 {
            return false;
        }
        let end = addr as u64 + len as u64;
        (addr as u64) < self.end() && end > self.start as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandError {
    UnknownCommand(u8),
    /// Range touches the protected region.
    Protected { addr: u32, len: u32 },
    /// Payload too short for the command's argument.
    MissingArgument,
    UnsupportedBaud(u32),
    VerifyMismatch { addr: u32 },
    Flash,
}

/// Side effect to apply once the reply has left the transmitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Action {
    Reset,
    SetBaud(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub reply: Packet,
    pub action: Option<Action>,
    pub error: Option<CommandError>,
}

impl Outcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

pub struct Dispatcher {
    protected: Region,
}

impl Dispatcher {
    pub const fn new(protected: Region) -> Self {
        Self { protected }
    }

    pub fn protected(&self) -> Region {
        self.protected
    }

    /// Execute a checksum-valid request and build its reply.
    ///
    /// The reply echoes the request's command with the reply bit set. An
    /// action is only returned for a successful command.
    pub fn dispatch<F: Flash>(&self, request: &Packet, flash: &mut F) -> Outcome {
        let mut payload = Payload::new();
        let mut action = None;

        match self.handle(request, flash, &mut payload, &mut action) {
            Ok(()) => Outcome {
                reply: Packet::reply_to(&request.header, Status::Ok, payload),
                action,
                error: None,
            },
            Err(err) => Outcome {
                reply: Packet::reply_to(&request.header, Status::Error, Payload::new()),
                action: None,
                error: Some(err),
            },
        }
    }

    fn handle<F: Flash>(
        &self,
        request: &Packet,
        flash: &mut F,
        reply: &mut Payload,
        action: &mut Option<Action>,
    ) -> Result<(), CommandError> {
        let Header { addr, .. } = request.header;
        let data = &request.payload[..];

        match request.command().map_err(CommandError::UnknownCommand)? {
            Command::Info => {
                // VERSION_STR is far below MAX_DATA_SIZE
                let _ = reply.extend_from_slice(VERSION_STR);
            }
            Command::Read => {
                // Always a full payload, whatever size was requested.
                let _ = reply.resize(MAX_DATA_SIZE, 0);
                flash.read(addr, reply).map_err(|_| CommandError::Flash)?;
            }
            Command::Write => {
                self.check_range(addr, data.len() as u32)?;
                flash.write(addr, data).map_err(|_| CommandError::Flash)?;
            }
            Command::Erase => {
                let len = get_u32(data).ok_or(CommandError::MissingArgument)?;
                if len == 0 {
                    return Ok(());
                }
                self.check_range(addr, len)?;
                flash.erase(addr, len).map_err(|_| CommandError::Flash)?;
            }
            Command::Verify => {
                self.check_range(addr, data.len() as u32)?;
                let mut actual = [0u8; MAX_DATA_SIZE];
                let actual = &mut actual[..data.len()];
                flash.read(addr, actual).map_err(|_| CommandError::Flash)?;
                if actual != data {
                    return Err(CommandError::VerifyMismatch { addr });
                }
            }
            Command::Baud => {
                let baud = get_u32(data).ok_or(CommandError::MissingArgument)?;
                if !is_supported_baud(baud) {
                    return Err(CommandError::UnsupportedBaud(baud));
                }
                *action = Some(Action::SetBaud(baud));
            }
            Command::Reset => {
                *action = Some(Action::Reset);
            }
        }
        Ok(())
    }

    fn check_range(&self, addr: u32, len: u32) -> Result<(), CommandError> {
        if self.protected.overlaps(addr, len) {
            return Err(CommandError::Protected { addr, len });
        }
        Ok(())
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(PROTECTED)
    }
}
