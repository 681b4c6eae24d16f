// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Host side of the protocol: request/reply transactions and the flashing
//! workflow built on top of them.
//!
//! Everything here is blocking and single-threaded. The only timeout is the
//! one configured on the port; a transaction additionally gives up after
//! `MAX_RESYNC` framing or checksum failures.

use std::io::{self, Read, Write};
use std::thread;
use std::time::Duration;

use crate::codec::{Feed, Parser};
use crate::protocol::{
    is_supported_baud, Command, Packet, Payload, Status, MAX_DATA_SIZE, SETTLE_DELAY_US,
};

/// Framing/checksum failures tolerated within one transaction.
pub const MAX_RESYNC: usize = 3;

/// Byte-oriented blocking serial link.
pub trait Port: Read + Write {
    fn set_baud_rate(&mut self, baud: u32) -> io::Result<()>;
}

impl<P: Port + ?Sized> Port for &mut P {
    fn set_baud_rate(&mut self, baud: u32) -> io::Result<()> {
        (**self).set_baud_rate(baud)
    }
}

impl<P: Port + ?Sized> Port for Box<P> {
    fn set_baud_rate(&mut self, baud: u32) -> io::Result<()> {
        (**self).set_baud_rate(baud)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("serial I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serial port closed")]
    Disconnected,

    #[error("no valid reply after {0} resync attempts")]
    Resync(usize),

    #[error("payload of {0} bytes exceeds the {MAX_DATA_SIZE}-byte frame limit")]
    PayloadTooLong(usize),

    #[error("reply to command {request:#04x} carries command {reply:#04x}")]
    CommandMismatch { request: u8, reply: u8 },

    #[error("device rejected {0:?} command")]
    Rejected(Command),

    #[error("baud rate {0} is not supported by the bootloader")]
    UnsupportedBaud(u32),

    #[error("{stage} aborted at address {addr:#010x}")]
    Aborted {
        stage: Stage,
        addr: u32,
        #[source]
        source: Box<ClientError>,
    },
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Erase,
    Write,
    Verify,
    Read,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Erase => "erase",
            Stage::Write => "write",
            Stage::Verify => "verify",
            Stage::Read => "read",
        };
        f.write_str(name)
    }
}

/// Progress report of a multi-transaction operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub stage: Stage,
    pub done: usize,
    pub total: usize,
}

impl Progress {
    pub fn percent(&self) -> usize {
        if self.total == 0 {
            100
        } else {
            self.done * 100 / self.total
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashOptions {
    /// Erase `[addr, addr + image.len())` before writing.
    pub erase: bool,
    /// Check every chunk with VERIFY after writing.
    pub verify: bool,
    /// Issue RESET once the image is in place.
    pub reset: bool,
}

impl Default for FlashOptions {
    fn default() -> Self {
        Self {
            erase: true,
            verify: false,
            reset: true,
        }
    }
}

pub struct Client<P: Port> {
    port: P,
    parser: Parser,
    settle: Duration,
}

impl<P: Port> Client<P> {
    pub fn new(port: P) -> Self {
        Self {
            port,
            parser: Parser::new(),
            settle: Duration::from_micros(SETTLE_DELAY_US as u64),
        }
    }

    /// Override the wait between a BAUD reply and reconfiguring the port.
    pub fn with_settle_delay(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    pub fn into_inner(self) -> P {
        self.port
    }

    /// Encode and send one request frame.
    pub fn send(&mut self, cmd: Command, addr: u32, payload: &[u8]) -> Result<()> {
        let request = Packet::request(cmd, addr, payload)
            .map_err(|err| ClientError::PayloadTooLong(err.0))?;
        let frame = request.encode();
        log::debug!("=> {:02x?}", &frame[..]);
        self.port.write_all(&frame)?;
        self.port.flush()?;
        Ok(())
    }

    /// Read bytes until a checksum-valid frame arrives.
    pub fn receive(&mut self) -> Result<Packet> {
        self.parser.reset();
        let mut failures = 0;

        loop {
            let byte = self.read_byte()?;
            match self.parser.feed(byte) {
                Feed::NeedMore => continue,
                Feed::Resync => log::trace!("resync on {:#04x}", byte),
                Feed::Complete => {
                    let result = self.parser.packet();
                    log::debug!("<= {:02x?}", self.parser.frame());
                    self.parser.reset();
                    match result {
                        Ok(packet) => return Ok(packet),
                        Err(err) => log::debug!("dropping reply: {:?}", err),
                    }
                }
            }

            failures += 1;
            if failures >= MAX_RESYNC {
                return Err(ClientError::Resync(failures));
            }
        }
    }

    /// One request/reply exchange. Returns the reply payload.
    pub fn transfer(&mut self, cmd: Command, addr: u32, payload: &[u8]) -> Result<Payload> {
        self.send(cmd, addr, payload)?;
        let reply = self.receive()?;

        if reply.header.base_cmd() != cmd.code() & !crate::protocol::REPLY_BIT {
            return Err(ClientError::CommandMismatch {
                request: cmd.code(),
                reply: reply.header.cmd,
            });
        }
        if reply.status() != Some(Status::Ok) {
            return Err(ClientError::Rejected(cmd));
        }
        Ok(reply.payload)
    }

    /// Bootloader version string.
    pub fn info(&mut self) -> Result<String> {
        let payload = self.transfer(Command::Info, 0, &[])?;
        let text = payload.split(|&b| b == 0).next().unwrap_or_default();
        Ok(String::from_utf8_lossy(text).into_owned())
    }

    pub fn erase(&mut self, addr: u32, len: u32) -> Result<()> {
        self.transfer(Command::Erase, addr, &len.to_le_bytes())?;
        Ok(())
    }

    pub fn write(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        self.transfer(Command::Write, addr, data)?;
        Ok(())
    }

    pub fn verify(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        self.transfer(Command::Verify, addr, data)?;
        Ok(())
    }

    /// READ always yields a full `MAX_DATA_SIZE` block.
    pub fn read(&mut self, addr: u32) -> Result<Payload> {
        self.transfer(Command::Read, addr, &[])
    }

    /// Ask the device to reset. It replies before going down.
    pub fn reset(&mut self) -> Result<()> {
        self.transfer(Command::Reset, 0, &[])?;
        Ok(())
    }

    /// Switch both ends of the link to `baud`.
    ///
    /// The device answers at the old rate and changes over after its settle
    /// delay; the port is reconfigured only after waiting the same delay.
    pub fn set_baud(&mut self, baud: u32) -> Result<()> {
        if !is_supported_baud(baud) {
            return Err(ClientError::UnsupportedBaud(baud));
        }
        self.transfer(Command::Baud, 0, &baud.to_le_bytes())?;
        thread::sleep(self.settle);
        self.port.set_baud_rate(baud)?;
        Ok(())
    }

    /// Read `len` bytes starting at `addr`.
    pub fn read_memory(
        &mut self,
        addr: u32,
        len: usize,
        mut progress: impl FnMut(Progress),
    ) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(len);

        while data.len() < len {
            let at = addr.wrapping_add(data.len() as u32);
            let block = self.read(at).map_err(|err| abort(Stage::Read, at, err))?;
            let take = block.len().min(len - data.len());
            data.extend_from_slice(&block[..take]);
            progress(Progress {
                stage: Stage::Read,
                done: data.len(),
                total: len,
            });
        }
        Ok(data)
    }

    /// Program `image` at `addr`: optional erase, chunked writes with
    /// optional verification, then an optional reset.
    ///
    /// Any failed transaction aborts the whole operation; the device is not
    /// reset and nothing is retried. A failure after a successful erase
    /// leaves the target range partially programmed: once the first chunk
    /// is in, the vector table may look valid and the next cold boot will
    /// jump into an incomplete image. Reflash before power cycling.
    pub fn flash_image(
        &mut self,
        addr: u32,
        image: &[u8],
        options: &FlashOptions,
        mut progress: impl FnMut(Progress),
    ) -> Result<()> {
        if options.erase {
            log::info!("erasing {} bytes at {:#010x}", image.len(), addr);
            self.erase(addr, image.len() as u32)
                .map_err(|err| abort(Stage::Erase, addr, err))?;
            progress(Progress {
                stage: Stage::Erase,
                done: image.len(),
                total: image.len(),
            });
        }

        self.for_each_chunk(addr, image, Stage::Write, &mut progress, |client, at, chunk| {
            client.write(at, chunk)
        })?;

        if options.verify {
            self.for_each_chunk(addr, image, Stage::Verify, &mut progress, |client, at, chunk| {
                client.verify(at, chunk)
            })?;
        }

        if options.reset {
            log::info!("resetting device");
            self.reset()?;
        }
        Ok(())
    }

    fn for_each_chunk(
        &mut self,
        addr: u32,
        image: &[u8],
        stage: Stage,
        progress: &mut impl FnMut(Progress),
        mut op: impl FnMut(&mut Self, u32, &[u8]) -> Result<()>,
    ) -> Result<()> {
        let mut done = 0;
        for chunk in image.chunks(MAX_DATA_SIZE) {
            let at = addr.wrapping_add(done as u32);
            op(self, at, chunk).map_err(|err| abort(stage, at, err))?;
            done += chunk.len();
            progress(Progress {
                stage,
                done,
                total: image.len(),
            });
        }
        Ok(())
    }

    fn read_byte(&mut self) -> Result<u8> {
        let mut byte = [0u8; 1];
        loop {
            match self.port.read(&mut byte) {
                Ok(1) => return Ok(byte[0]),
                Ok(_) => return Err(ClientError::Disconnected),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }
}

fn abort(stage: Stage, addr: u32, source: ClientError) -> ClientError {
    ClientError::Aborted {
        stage,
        addr,
        source: Box::new(source),
    }
}
