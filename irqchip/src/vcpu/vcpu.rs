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

//! The CPU-core side of a local APIC.

use std::sync::Arc;
use std::time::Duration;

use bitflags::bitflags;
use parking_lot::{Condvar, Mutex};

use crate::bus::SystemBus;
use crate::bus::message::{LegacyKind, LegacyMessage, MemMessage};
use crate::device::lapic::{InterruptAck, Lapic};

bitflags! {
    /// Signals a local APIC raises towards its CPU core.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CpuEvent: u32 {
        /// A maskable interrupt is ready for an acknowledge cycle.
        const INTR = 1 << 0;
        const NMI = 1 << 1;
        const SMI = 1 << 2;
        const INIT = 1 << 3;
        const SIPI = 1 << 4;
    }
}

#[derive(Debug, Default)]
struct Pending {
    events: CpuEvent,
    sipi_vector: u8,
}

/// Pending events of one CPU core.
///
/// Any thread may raise an event; the owning vCPU thread consumes them and
/// may block in [`CpuEvents::wait`] while halted.
#[derive(Debug, Default)]
pub struct CpuEvents {
    pending: Mutex<Pending>,
    cond: Condvar,
}

impl CpuEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self, event: CpuEvent) {
        let mut pending = self.pending.lock();
        pending.events |= event;
        self.cond.notify_all();
    }

    pub fn raise_sipi(&self, vector: u8) {
        let mut pending = self.pending.lock();
        pending.sipi_vector = vector;
        pending.events |= CpuEvent::SIPI;
        self.cond.notify_all();
    }

    pub fn clear(&self, event: CpuEvent) {
        self.pending.lock().events.remove(event);
    }

    /// Removes and returns the pending events among `mask`.
    pub fn take(&self, mask: CpuEvent) -> CpuEvent {
        let mut pending = self.pending.lock();
        let taken = pending.events & mask;
        pending.events.remove(taken);
        taken
    }

    pub fn pending(&self) -> CpuEvent {
        self.pending.lock().events
    }

    pub fn sipi_vector(&self) -> u8 {
        self.pending.lock().sipi_vector
    }

    /// Blocks until an event is pending or `timeout` passes, and returns the
    /// pending events without consuming them.
    pub fn wait(&self, timeout: Option<Duration>) -> CpuEvent {
        let mut pending = self.pending.lock();
        if pending.events.is_empty() {
            match timeout {
                Some(timeout) => {
                    self.cond
                        .wait_while_for(&mut pending, |p| p.events.is_empty(), timeout);
                }
                None => self.cond.wait_while(&mut pending, |p| p.events.is_empty()),
            }
        }
        pending.events
    }
}

/// A virtual CPU as seen by the interrupt controllers.
#[derive(Debug)]
pub struct Vcpu {
    index: u32,
    lapic: Arc<Lapic>,
    events: Arc<CpuEvents>,
    bus: Arc<SystemBus>,
}

impl Vcpu {
    pub fn new(index: u32, lapic: Arc<Lapic>, events: Arc<CpuEvents>, bus: Arc<SystemBus>) -> Self {
        Vcpu {
            index,
            lapic,
            events,
            bus,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn lapic(&self) -> &Arc<Lapic> {
        &self.lapic
    }

    pub fn events(&self) -> &Arc<CpuEvents> {
        &self.events
    }

    /// Returns `None` if the MSR does not exist, which the CPU turns into #GP.
    pub fn rdmsr(&self, index: u32) -> Option<u64> {
        self.lapic.rdmsr(index)
    }

    pub fn wrmsr(&self, index: u32, value: u64) -> bool {
        self.lapic.wrmsr(index, value)
    }

    pub fn mmio_read(&self, addr: u64) -> u32 {
        if let Some(value) = self.lapic.mmio_read(addr, 4) {
            return value;
        }
        let mut msg = MemMessage::read(addr);
        if self.bus.mem.send(&mut msg) {
            msg.value
        } else {
            log::trace!("vcpu-{}: unclaimed read at {addr:#x}", self.index);
            u32::MAX
        }
    }

    pub fn mmio_write(&self, addr: u64, value: u32) {
        if self.lapic.mmio_write(addr, 4, value) {
            return;
        }
        if !self.bus.mem.send(&mut MemMessage::write(addr, value)) {
            log::trace!("vcpu-{}: unclaimed write {value:#x} at {addr:#x}", self.index);
        }
    }

    /// Runs an interrupt acknowledge cycle and returns the vector the CPU
    /// would dispatch to.
    ///
    /// An ExtINT source hands the cycle over to the master PIC. `None` means
    /// nobody answered it.
    pub fn acknowledge(&self) -> Option<u8> {
        match self.lapic.request_vector_on_inta() {
            InterruptAck::Vector(vector) | InterruptAck::Spurious(vector) => Some(vector),
            InterruptAck::ExtInt => {
                let mut msg = LegacyMessage::new(LegacyKind::Inta);
                if self.bus.legacy.send(&mut msg) {
                    Some(msg.value)
                } else {
                    log::warn!("vcpu-{}: no PIC answered INTA", self.index);
                    None
                }
            }
        }
    }

    /// Waits for an event the way a halted CPU does.
    pub fn halt(&self, timeout: Option<Duration>) -> CpuEvent {
        self.events.wait(timeout)
    }
}

#[cfg(test)]
#[path = "vcpu_test.rs"]
mod tests;
