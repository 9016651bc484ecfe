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

//! Synchronous, typed message buses connecting the emulated devices.
//!
//! A send runs every handler on the sender's thread and completes before it
//! returns. There is no queue: a handler observes the message in the same
//! order as every other handler on the same bus.

pub mod message;

use std::fmt::{self, Debug};
use std::sync::Arc;

use parking_lot::RwLock;

use self::message::{
    ApicMessage, IoMessage, IrqMessage, IrqNotify, LegacyMessage, MemMessage, PicMessage,
    TimeoutMessage,
};

/// A device attached to a [`Bus`].
pub trait InterruptSink<M>: Debug + Send + Sync + 'static {
    /// Handles `msg`, returning true if the message was claimed.
    fn receive(&self, msg: &mut M) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Stop at the first sink that claims the message.
    FirstMatch,
    /// Offer the message to every sink.
    Broadcast,
}

pub type Sink<M> = Arc<dyn InterruptSink<M>>;

pub struct Bus<M: 'static> {
    name: &'static str,
    dispatch: Dispatch,
    sinks: RwLock<Vec<Sink<M>>>,
}

// Devices hold the bus they are attached to, so sinks are only counted.
impl<M: 'static> Debug for Bus<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus")
            .field("name", &self.name)
            .field("dispatch", &self.dispatch)
            .field("sinks", &self.len())
            .finish()
    }
}

impl<M: 'static> Bus<M> {
    pub fn new(name: &'static str, dispatch: Dispatch) -> Self {
        Bus {
            name,
            dispatch,
            sinks: RwLock::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn dispatch(&self) -> Dispatch {
        self.dispatch
    }

    /// Appends a sink. Sinks are offered messages in the order they were added.
    pub fn add(&self, sink: Sink<M>) {
        self.sinks.write().push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.read().is_empty()
    }

    pub fn clear(&self) {
        self.sinks.write().clear();
    }

    // Handlers may send on this bus again, so dispatch never holds the lock.
    fn snapshot(&self) -> Vec<Sink<M>> {
        self.sinks.read().clone()
    }

    /// Delivers `msg` and returns true if any sink claimed it.
    pub fn send(&self, msg: &mut M) -> bool {
        let mut claimed = false;
        for sink in self.snapshot() {
            if sink.receive(msg) {
                claimed = true;
                if self.dispatch == Dispatch::FirstMatch {
                    break;
                }
            }
        }
        claimed
    }

    /// Offers `msg` to the sinks starting at `start`, wrapping around, and
    /// stops at the first one that claims it. Returns the index of that sink.
    pub fn send_rr(&self, msg: &mut M, start: usize) -> Option<usize> {
        let sinks = self.snapshot();
        let count = sinks.len();
        (0..count)
            .map(|i| (start + i) % count)
            .find(|&index| sinks[index].receive(msg))
    }
}

/// Every bus of one emulated platform.
#[derive(Debug)]
pub struct SystemBus {
    /// Interrupt lines by GSI, raised by devices.
    pub irq: Bus<IrqMessage>,
    /// Inputs of the 8259 PICs.
    pub irq_lines: Bus<IrqMessage>,
    pub notify: Bus<IrqNotify>,
    pub apic: Bus<ApicMessage>,
    pub mem: Bus<MemMessage>,
    pub legacy: Bus<LegacyMessage>,
    pub pic: Bus<PicMessage>,
    pub io: Bus<IoMessage>,
    pub timeout: Bus<TimeoutMessage>,
}

impl Default for SystemBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemBus {
    pub fn new() -> Self {
        SystemBus {
            irq: Bus::new("irq", Dispatch::Broadcast),
            irq_lines: Bus::new("irq_lines", Dispatch::Broadcast),
            notify: Bus::new("notify", Dispatch::Broadcast),
            apic: Bus::new("apic", Dispatch::Broadcast),
            mem: Bus::new("mem", Dispatch::Broadcast),
            legacy: Bus::new("legacy", Dispatch::Broadcast),
            pic: Bus::new("pic", Dispatch::FirstMatch),
            io: Bus::new("io", Dispatch::FirstMatch),
            timeout: Bus::new("timeout", Dispatch::FirstMatch),
        }
    }

    /// Drops every sink, breaking the reference cycles between devices and
    /// the buses they send on.
    pub fn detach_all(&self) {
        self.irq.clear();
        self.irq_lines.clear();
        self.notify.clear();
        self.apic.clear();
        self.mem.clear();
        self.legacy.clear();
        self.pic.clear();
        self.io.clear();
        self.timeout.clear();
    }
}

#[cfg(test)]
#[path = "bus_test.rs"]
mod tests;
