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

//! Turns memory writes into the MSI window into local APIC messages.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::arch::intr::{DeliveryMode, MSI_ADDR_BASE, MSI_WINDOW_SIZE, MsiAddrLo, MsiData};
use crate::arch::lapic::IcrLo;
use crate::bus::message::{ApicMessage, MemMessage};
use crate::bus::{InterruptSink, SystemBus};
use crate::utils::in_range;

#[derive(Debug)]
pub struct MsiForwarder {
    lowest_rr: AtomicUsize,
    bus: Arc<SystemBus>,
}

impl MsiForwarder {
    pub fn new(bus: Arc<SystemBus>) -> Self {
        MsiForwarder {
            lowest_rr: AtomicUsize::new(0),
            bus,
        }
    }

    /// Delivers the MSI `data` written to `addr`. Returns false if no local
    /// APIC accepted it.
    pub fn forward(&self, addr: u64, data: u32) -> bool {
        let addr_lo = MsiAddrLo(addr as u32);
        let dst = addr_lo.dest_id() as u32 | (addr_lo.ext_dest_id() as u32) << 8;
        let data = MsiData(data);
        let mode = data.delivery_mode();
        if matches!(mode, DeliveryMode::REMOTE_READ | DeliveryMode::STARTUP_IPI) {
            log::debug!("msi: dropped {mode:?} at {addr:#x}");
            return false;
        }
        let mut icr = IcrLo::default();
        icr.set_vector(data.vector());
        icr.set_delivery_mode(mode);
        icr.set_level(data.level());
        icr.set_trigger_mode(data.trigger_mode());
        icr.set_dest_mode(addr_lo.dest_mode());

        let mut msg = ApicMessage {
            icr,
            dst,
            exclude: None,
        };
        if addr_lo.redirection_hint() || mode == DeliveryMode::LOW_PRIORITY {
            msg.icr.set_delivery_mode(DeliveryMode::FIXED);
            let start = self.lowest_rr.load(Ordering::Relaxed);
            let Some(index) = self.bus.apic.send_rr(&mut msg, start) else {
                log::debug!("msi: no target for {dst:#x}");
                return false;
            };
            self.lowest_rr.store(index + 1, Ordering::Relaxed);
            true
        } else {
            self.bus.apic.send(&mut msg)
        }
    }
}

impl InterruptSink<MemMessage> for MsiForwarder {
    fn receive(&self, msg: &mut MemMessage) -> bool {
        if !msg.write || !in_range(msg.addr, MSI_ADDR_BASE, MSI_WINDOW_SIZE) {
            return false;
        }
        self.forward(msg.addr, msg.value)
    }
}

#[cfg(test)]
#[path = "msi_test.rs"]
mod tests;
