// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! End-to-end tests of the device loop: bytes in through the RX ring,
//! replies out through the TX ring.

mod common;

use btl_common::device::Device;
use btl_common::dispatch::Dispatcher;
use btl_common::protocol::{
    Command, Packet, Status, APP_ADDR, BTL_ADDR, BYTE_TIMEOUT_US, SETTLE_DELAY_US, VERSION_STR,
};
use btl_common::ring::{Consumer, Producer, RingBuffer};
use btl_common::timer::ms;
use common::{MockFlash, MockPlatform, TestClock};

const RING: usize = 256;

type TestDevice<'a> = Device<'a, MockFlash, MockPlatform, TestClock, RING>;

/// Host's view of the link.
struct Host<'a> {
    rx: Producer<'a, RING>,
    tx: Consumer<'a, RING>,
}

impl Host<'_> {
    fn send(&mut self, packet: &Packet) {
        let frame = packet.encode();
        assert_eq!(self.rx.write_bulk(&frame), frame.len());
    }

    fn send_raw(&mut self, bytes: &[u8]) {
        assert_eq!(self.rx.write_bulk(bytes), bytes.len());
    }

    fn received(&mut self) -> Vec<u8> {
        self.tx.read_bulk(RING).collect()
    }

    fn reply(&mut self) -> Packet {
        Packet::decode(&self.received()).expect("one complete reply")
    }
}

fn request(cmd: Command, addr: u32, payload: &[u8]) -> Packet {
    Packet::request(cmd, addr, payload).unwrap()
}

/// Poll enough times to consume any queued request byte by byte.
fn run(device: &mut TestDevice<'_>) {
    for _ in 0..2 * RING {
        device.poll();
    }
}

macro_rules! setup {
    ($device:ident, $host:ident, $clock:ident, $flash:expr) => {
        let mut rx_ring = RingBuffer::<RING>::new();
        let mut tx_ring = RingBuffer::<RING>::new();
        let (rx_producer, rx_consumer) = rx_ring.split();
        let (tx_producer, tx_consumer) = tx_ring.split();
        let $clock = TestClock::default();
        let mut $device: TestDevice<'_> = Device::new(
            rx_consumer,
            tx_producer,
            Dispatcher::default(),
            $flash,
            MockPlatform::default(),
            $clock.clone(),
        );
        let mut $host = Host {
            rx: rx_producer,
            tx: tx_consumer,
        };
    };
}

// =============================================================================
// Request / reply
// =============================================================================

#[test]
fn test_info_round_trip() {
    setup!(device, host, _clock, MockFlash::new());

    host.send(&request(Command::Info, 0, &[]));
    run(&mut device);

    let reply = host.reply();
    assert_eq!(reply.header.cmd, 0x80);
    assert_eq!(reply.status(), Some(Status::Ok));
    assert_eq!(&reply.payload[..], VERSION_STR);
    assert!(device.platform().kicks > 0);
    assert!(!device.is_busy());
}

#[test]
fn test_protected_write_replies_error_without_flash_access() {
    setup!(device, host, _clock, MockFlash::new());

    host.send(&request(Command::Write, BTL_ADDR + 0x40, &[0u8; 32]));
    run(&mut device);

    let frame = host.received();
    assert_eq!(frame.len(), 9);
    assert_eq!(frame[1], 0, "size");
    let reply = Packet::decode(&frame).unwrap();
    assert_eq!(reply.header.cmd, 0x82);
    assert_eq!(reply.status(), Some(Status::Error));
    assert!(device.flash().ops.is_empty());
}

#[test]
fn test_consecutive_requests() {
    setup!(device, host, _clock, MockFlash::new());

    host.send(&request(Command::Write, APP_ADDR, &[0xA5; 64]));
    run(&mut device);
    assert_eq!(host.reply().status(), Some(Status::Ok));

    host.send(&request(Command::Verify, APP_ADDR, &[0xA5; 64]));
    run(&mut device);
    assert_eq!(host.reply().status(), Some(Status::Ok));

    host.send(&request(Command::Read, APP_ADDR, &[]));
    run(&mut device);
    assert_eq!(&host.reply().payload[..], &[0xA5; 64]);
}

#[test]
fn test_back_to_back_frames_each_answered() {
    setup!(device, host, _clock, MockFlash::new());

    let mut bytes = request(Command::Info, 0, &[]).encode().to_vec();
    bytes.extend_from_slice(&request(Command::Read, APP_ADDR, &[]).encode());
    host.send_raw(&bytes);
    run(&mut device);

    let out = host.received();
    let first = Packet::decode(&out[..9 + VERSION_STR.len()]).unwrap();
    let second = Packet::decode(&out[9 + VERSION_STR.len()..]).unwrap();
    assert_eq!(first.header.cmd, 0x80);
    assert_eq!(second.header.cmd, 0x83);
}

// =============================================================================
// Framing errors
// =============================================================================

#[test]
fn test_bad_checksum_is_silently_dropped() {
    setup!(device, host, _clock, MockFlash::new());

    let mut frame = request(Command::Write, APP_ADDR, &[1, 2, 3]).encode();
    let last = frame.len() - 1;
    frame[last] ^= 0x01;
    host.send_raw(&frame);
    run(&mut device);

    assert!(host.received().is_empty());
    assert!(device.flash().ops.is_empty());

    // Link still usable
    host.send(&request(Command::Info, 0, &[]));
    run(&mut device);
    assert_eq!(host.reply().header.cmd, 0x80);
}

#[test]
fn test_junk_between_frames_is_skipped() {
    setup!(device, host, _clock, MockFlash::new());

    host.send_raw(&[0x00, 0x55, 0xAA, b'x']);
    host.send(&request(Command::Info, 0, &[]));
    run(&mut device);
    assert_eq!(host.reply().status(), Some(Status::Ok));
}

#[test]
fn test_truncated_frame_expires() {
    setup!(device, host, clock, MockFlash::new());

    let frame = request(Command::Write, APP_ADDR, &[1, 2, 3, 4]).encode();
    host.send_raw(&frame[..6]);
    run(&mut device);

    clock.advance(BYTE_TIMEOUT_US + 1);
    host.send(&request(Command::Info, 0, &[]));
    run(&mut device);

    assert_eq!(host.reply().header.cmd, 0x80);
    assert!(device.flash().ops.is_empty());
}

// =============================================================================
// Deferred actions
// =============================================================================

#[test]
fn test_baud_reply_leaves_before_rate_change() {
    setup!(device, host, clock, MockFlash::new());

    host.send(&request(Command::Baud, 0, &115_200u32.to_le_bytes()));
    run(&mut device);

    // Reply queued on the old link, rate untouched even after the settle delay
    assert!(device.is_busy());
    clock.advance(SETTLE_DELAY_US);
    run(&mut device);
    assert!(device.platform().bauds.is_empty());

    let reply = host.reply();
    assert_eq!(reply.header.cmd, 0x85);
    assert_eq!(reply.status(), Some(Status::Ok));

    // TX drained and delay elapsed: now the link switches
    device.poll();
    assert_eq!(device.platform().bauds, [115_200]);
    assert!(!device.is_busy());
}

#[test]
fn test_baud_waits_for_settle_delay() {
    setup!(device, host, clock, MockFlash::new());

    host.send(&request(Command::Baud, 0, &460_800u32.to_le_bytes()));
    run(&mut device);
    host.received();

    clock.advance(SETTLE_DELAY_US - 1);
    device.poll();
    assert!(device.platform().bauds.is_empty());

    clock.advance(1);
    device.poll();
    assert_eq!(device.platform().bauds, [460_800]);
}

#[test]
fn test_input_held_while_action_pending() {
    setup!(device, host, clock, MockFlash::new());

    host.send(&request(Command::Baud, 0, &921_600u32.to_le_bytes()));
    run(&mut device);
    host.send(&request(Command::Info, 0, &[]));
    run(&mut device);

    // Only the BAUD reply so far
    assert_eq!(host.reply().header.cmd, 0x85);

    clock.advance(SETTLE_DELAY_US);
    run(&mut device);
    assert_eq!(device.platform().bauds, [921_600]);
    assert_eq!(host.reply().header.cmd, 0x80);
}

#[test]
fn test_rejected_baud_has_no_side_effect() {
    setup!(device, host, clock, MockFlash::new());

    host.send(&request(Command::Baud, 0, &12_345u32.to_le_bytes()));
    run(&mut device);
    assert_eq!(host.reply().status(), Some(Status::Error));

    clock.advance(SETTLE_DELAY_US * 2);
    run(&mut device);
    assert!(device.platform().bauds.is_empty());
    assert!(!device.is_busy());
}

#[test]
fn test_reset_after_reply() {
    setup!(device, host, clock, MockFlash::new());

    host.send(&request(Command::Reset, 0, &[]));
    run(&mut device);
    assert_eq!(device.platform().resets, 0);

    let reply = host.reply();
    assert_eq!(reply.header.cmd, 0xFF);
    assert_eq!(reply.status(), Some(Status::Ok));

    clock.advance(SETTLE_DELAY_US);
    device.poll();
    assert_eq!(device.platform().resets, 1);
}

#[test]
fn test_settle_delay_across_clock_wrap() {
    setup!(device, host, clock, MockFlash::new());
    clock.set(u32::MAX - 5_000);

    host.send(&request(Command::Reset, 0, &[]));
    run(&mut device);
    host.received();

    clock.advance(SETTLE_DELAY_US);
    device.poll();
    assert_eq!(device.platform().resets, 1);
}

// =============================================================================
// Timers
// =============================================================================

fn heartbeat(platform: &mut MockPlatform, _arg: usize) {
    platform.heartbeats += 1;
}

#[test]
fn test_timers_run_without_input() {
    setup!(device, _host, clock, MockFlash::new());
    device
        .scheduler_mut()
        .register(heartbeat, 0, ms(500), true)
        .unwrap();

    for _ in 0..4 {
        clock.advance(ms(500));
        device.poll();
    }
    assert_eq!(device.platform().heartbeats, 4);
}

#[test]
fn test_timers_run_while_busy() {
    setup!(device, host, clock, MockFlash::new());
    device
        .scheduler_mut()
        .register(heartbeat, 0, ms(1), true)
        .unwrap();

    host.send(&request(Command::Reset, 0, &[]));
    run(&mut device);
    // Reply never drained: the reset stays pending
    clock.advance(ms(1));
    device.poll();

    assert!(device.is_busy());
    assert_eq!(device.platform().heartbeats, 1);
    assert_eq!(device.platform().resets, 0);
}
