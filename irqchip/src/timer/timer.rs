// Copyright 2026 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Time sources and one-shot deadline requests.
//!
//! Devices never sleep. They read the current time from a [`Clock`] and ask
//! a [`TimerSource`] to be called back at an absolute deadline, which
//! arrives as a `TimeoutMessage` on the system bus.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(pub u32);

pub trait Clock: Debug + Send + Sync + 'static {
    /// Current time in ticks.
    fn now(&self) -> u64;
    /// Ticks per second.
    fn freq(&self) -> u64;
}

pub const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Nanoseconds since the clock was created.
#[derive(Debug)]
pub struct MonotonicClock {
    start: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    pub fn new() -> Self {
        MonotonicClock {
            start: Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> u64 {
        self.start.elapsed().as_nanos() as u64
    }

    fn freq(&self) -> u64 {
        NANOS_PER_SEC
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicU64,
    freq: u64,
}

impl ManualClock {
    pub fn new(freq: u64) -> Self {
        ManualClock {
            now: AtomicU64::new(0),
            freq,
        }
    }

    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, delta: u64) -> u64 {
        self.now.fetch_add(delta, Ordering::SeqCst) + delta
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn freq(&self) -> u64 {
        self.freq
    }
}

pub trait TimerSource: Debug + Send + Sync + 'static {
    /// Requests a callback for `id` at `deadline`, replacing any earlier
    /// request of the same id.
    fn arm(&self, id: TimerId, deadline: u64);
    fn disarm(&self, id: TimerId);
}

/// Outstanding deadlines, at most one per timer.
#[derive(Debug, Default)]
pub struct TimerQueue {
    next_id: AtomicU32,
    deadlines: Mutex<BTreeMap<TimerId, u64>>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&self) -> TimerId {
        TimerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn deadline(&self, id: TimerId) -> Option<u64> {
        self.deadlines.lock().get(&id).copied()
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.deadlines.lock().values().min().copied()
    }

    /// Removes and returns the timers whose deadline is not after `now`,
    /// earliest first.
    pub fn expired(&self, now: u64) -> Vec<TimerId> {
        let mut deadlines = self.deadlines.lock();
        let mut expired: Vec<(u64, TimerId)> = deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, deadline)| (*deadline, *id))
            .collect();
        expired.sort_unstable();
        for (_, id) in &expired {
            deadlines.remove(id);
        }
        expired.into_iter().map(|(_, id)| id).collect()
    }
}

impl TimerSource for TimerQueue {
    fn arm(&self, id: TimerId, deadline: u64) {
        log::trace!("{id:?}: armed for {deadline}");
        self.deadlines.lock().insert(id, deadline);
    }

    fn disarm(&self, id: TimerId) {
        self.deadlines.lock().remove(&id);
    }
}

#[cfg(test)]
#[path = "timer_test.rs"]
mod tests;
