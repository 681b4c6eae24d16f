// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Cooperative timer scheduler.
//!
//! A fixed table of periodic callbacks driven by a monotonic microsecond
//! clock. `tick` is called once per main-loop iteration, never from an
//! interrupt. Callbacks run to completion on the caller's stack, must not
//! block, and cannot re-enter the scheduler (they only get the context).
//!
//! A due entry records `last = now` rather than `last += period`: a late
//! tick drops the missed time instead of firing several times to catch up.
//! With a tight poll loop the cadence is preserved; under load it stretches.

/// Monotonic microsecond clock. Wraps after about 71 minutes; every elapsed
/// time computation uses wrapping subtraction.
pub trait Clock {
    fn now_us(&self) -> u32;
}

impl<T: Clock + ?Sized> Clock for &T {
    fn now_us(&self) -> u32 {
        (**self).now_us()
    }
}

/// Convert milliseconds into scheduler periods.
pub const fn ms(ms: u32) -> u32 {
    ms * 1000
}

/// Callback invoked with the shared context and the entry's own argument.
pub type Callback<C> = fn(&mut C, usize);

/// Handle returned by `register`. Becomes stale after `remove`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerId(usize);

/// No free slot left in the scheduler table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CapacityError;

struct Entry<C> {
    callback: Callback<C>,
    arg: usize,
    /// Zero disables the entry without stopping it.
    period: u32,
    last: u32,
    running: bool,
}

// Manual impls: the derive would demand `C: Copy`.
impl<C> Clone for Entry<C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C> Copy for Entry<C> {}

impl<C> Entry<C> {
    fn is_due(&self, now: u32) -> bool {
        self.running && self.period != 0 && now.wrapping_sub(self.last) >= self.period
    }
}

/// Up to `N` timers sharing a callback context of type `C`.
pub struct Scheduler<C, K: Clock, const N: usize> {
    clock: K,
    entries: [Option<Entry<C>>; N],
}

impl<C, K: Clock, const N: usize> Scheduler<C, K, N> {
    pub fn new(clock: K) -> Self {
        Self {
            clock,
            entries: [None; N],
        }
    }

    pub fn clock(&self) -> &K {
        &self.clock
    }

    pub fn now(&self) -> u32 {
        self.clock.now_us()
    }

    /// Add a timer. Its phase starts now, whether or not it runs yet.
    pub fn register(
        &mut self,
        callback: Callback<C>,
        arg: usize,
        period: u32,
        run: bool,
    ) -> Result<TimerId, CapacityError> {
        let now = self.now();
        let (index, slot) = self
            .entries
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.is_none())
            .ok_or(CapacityError)?;

        *slot = Some(Entry {
            callback,
            arg,
            period,
            last: now,
            running: run,
        });
        Ok(TimerId(index))
    }

    pub fn remove(&mut self, id: TimerId) {
        if let Some(slot) = self.entries.get_mut(id.0) {
            *slot = None;
        }
    }

    /// Start (or restart) a timer; the next firing is one full period away.
    pub fn run(&mut self, id: TimerId) {
        let now = self.now();
        if let Some(entry) = self.entry_mut(id) {
            entry.running = true;
            entry.last = now;
        }
    }

    pub fn stop(&mut self, id: TimerId) {
        if let Some(entry) = self.entry_mut(id) {
            entry.running = false;
        }
    }

    /// Change the cadence of future firings. The current phase is kept.
    pub fn set_period(&mut self, id: TimerId, period: u32) {
        if let Some(entry) = self.entry_mut(id) {
            entry.period = period;
        }
    }

    pub fn is_running(&self, id: TimerId) -> bool {
        self.entries
            .get(id.0)
            .and_then(Option::as_ref)
            .is_some_and(|entry| entry.running)
    }

    pub fn len(&self) -> usize {
        self.entries.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release every entry.
    pub fn clear(&mut self) {
        self.entries = [None; N];
    }

    /// Fire every due timer once. Returns how many callbacks ran.
    pub fn tick(&mut self, ctx: &mut C) -> usize {
        let now = self.now();
        let mut runs = 0;

        for entry in self.entries.iter_mut().flatten() {
            if entry.is_due(now) {
                (entry.callback)(ctx, entry.arg);
                entry.last = now;
                runs += 1;
            }
        }
        runs
    }

    fn entry_mut(&mut self, id: TimerId) -> Option<&mut Entry<C>> {
        self.entries.get_mut(id.0).and_then(Option::as_mut)
    }
}
