// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Fixed-capacity single-producer/single-consumer byte queue.
//!
//! Decouples interrupt-time serial I/O from the protocol loop. Each direction
//! of a link gets its own buffer with exactly one writer and one reader:
//!
//! - RX: the UART interrupt produces, the main loop consumes.
//! - TX: the main loop produces, the UART interrupt consumes.
//!
//! `head` and `tail` are free-running counters. Occupancy is `head - tail`
//! in wrapping arithmetic, which stays exact because the capacity is a power
//! of two and therefore divides the counter modulus. The producer only ever
//! stores `head` and the consumer only ever stores `tail`, so plain atomic
//! loads and stores are enough (no compare-and-swap, which thumbv6m lacks).

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicUsize, Ordering};

/// Returned by `write` when the buffer holds `capacity` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Full(pub u8);

pub struct RingBuffer<const N: usize> {
    head: AtomicUsize,
    tail: AtomicUsize,
    buf: UnsafeCell<[u8; N]>,
}

// Safe to share: all access after `split` goes through one Producer and one
// Consumer, and `&mut self` methods are exclusive by construction.
unsafe impl<const N: usize> Sync for RingBuffer<N> {}

impl<const N: usize> RingBuffer<N> {
    const MASK: usize = {
        assert!(N.is_power_of_two(), "ring buffer capacity must be a power of two");
        N - 1
    };

    pub const fn new() -> Self {
        let _ = Self::MASK;
        Self {
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            buf: UnsafeCell::new([0; N]),
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        head.wrapping_sub(tail)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == N
    }

    pub fn write(&mut self, byte: u8) -> Result<(), Full> {
        // SAFETY: `&mut self` excludes any other producer.
        unsafe { self.enqueue(byte) }
    }

    pub fn read(&mut self) -> Option<u8> {
        // SAFETY: `&mut self` excludes any other consumer.
        unsafe { self.dequeue() }
    }

    pub fn write_bulk(&mut self, bytes: &[u8]) -> usize {
        // SAFETY: as for `write`.
        unsafe { self.enqueue_bulk(bytes) }
    }

    pub fn read_bulk(&mut self, max: usize) -> Drain<'_, N> {
        Drain::new(self, max)
    }

    /// Split into the two endpoints handed to the producing and consuming
    /// contexts.
    pub fn split(&mut self) -> (Producer<'_, N>, Consumer<'_, N>) {
        let rb: &Self = self;
        (Producer { rb }, Consumer { rb })
    }

    /// # Safety
    /// Only one context may enqueue at a time.
    unsafe fn enqueue(&self, byte: u8) -> Result<(), Full> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head.wrapping_sub(tail) >= N {
            return Err(Full(byte));
        }
        self.buf
            .get()
            .cast::<u8>()
            .add(head & Self::MASK)
            .write_volatile(byte);
        self.head.store(head.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// # Safety
    /// Only one context may enqueue at a time.
    unsafe fn enqueue_bulk(&self, bytes: &[u8]) -> usize {
        let mut written = 0;
        for &byte in bytes {
            if self.enqueue(byte).is_err() {
                break;
            }
            written += 1;
        }
        written
    }

    /// # Safety
    /// Only one context may dequeue at a time.
    unsafe fn dequeue(&self) -> Option<u8> {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        let byte = self
            .buf
            .get()
            .cast::<u8>()
            .add(tail & Self::MASK)
            .read_volatile();
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        Some(byte)
    }
}

impl<const N: usize> Default for RingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Writing endpoint of a split `RingBuffer`.
pub struct Producer<'a, const N: usize> {
    rb: &'a RingBuffer<N>,
}

// The endpoint may move to the interrupt context, but never be shared.
unsafe impl<const N: usize> Send for Producer<'_, N> {}

impl<const N: usize> Producer<'_, N> {
    pub fn write(&mut self, byte: u8) -> Result<(), Full> {
        // SAFETY: the single Producer is borrowed mutably.
        unsafe { self.rb.enqueue(byte) }
    }

    pub fn write_bulk(&mut self, bytes: &[u8]) -> usize {
        // SAFETY: as for `write`.
        unsafe { self.rb.enqueue_bulk(bytes) }
    }

    pub fn len(&self) -> usize {
        self.rb.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rb.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.rb.is_full()
    }

    pub fn free(&self) -> usize {
        N - self.rb.len()
    }
}

/// Reading endpoint of a split `RingBuffer`.
pub struct Consumer<'a, const N: usize> {
    rb: &'a RingBuffer<N>,
}

unsafe impl<const N: usize> Send for Consumer<'_, N> {}

impl<const N: usize> Consumer<'_, N> {
    pub fn read(&mut self) -> Option<u8> {
        // SAFETY: the single Consumer is borrowed mutably.
        unsafe { self.rb.dequeue() }
    }

    pub fn read_bulk(&mut self, max: usize) -> Drain<'_, N> {
        Drain::new(self.rb, max)
    }

    pub fn len(&self) -> usize {
        self.rb.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rb.is_empty()
    }
}

/// Lazy, non-blocking drain of at most `max` bytes, bounded by what was
/// stored when the drain was created.
///
/// Holding a `Drain` keeps the consumer side mutably borrowed.
pub struct Drain<'a, const N: usize> {
    rb: &'a RingBuffer<N>,
    remaining: usize,
}

impl<'a, const N: usize> Drain<'a, N> {
    fn new(rb: &'a RingBuffer<N>, max: usize) -> Self {
        Self {
            remaining: max.min(rb.len()),
            rb,
        }
    }
}

impl<const N: usize> Iterator for Drain<'_, N> {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        if self.remaining == 0 {
            return None;
        }
        // SAFETY: a Drain is only created from an exclusive consumer borrow.
        let byte = unsafe { self.rb.dequeue() }?;
        self.remaining -= 1;
        Some(byte)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<const N: usize> ExactSizeIterator for Drain<'_, N> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_wrap_around() {
        let mut rb = RingBuffer::<4>::new();
        rb.head.store(usize::MAX - 1, Ordering::Relaxed);
        rb.tail.store(usize::MAX - 1, Ordering::Relaxed);

        for byte in 1..=4 {
            assert_eq!(rb.write(byte), Ok(()));
        }
        assert_eq!(rb.len(), 4);
        assert_eq!(rb.write(5), Err(Full(5)));

        let drained: Vec<u8> = rb.read_bulk(8).collect();
        assert_eq!(drained, [1, 2, 3, 4]);
        assert!(rb.is_empty());
        assert_eq!(rb.read(), None);
    }
}
