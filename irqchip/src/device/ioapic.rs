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

//! Emulated I/O APIC.
//!
//! Pins are delivered as MSI writes on the memory bus instead of messages on
//! a dedicated APIC bus. Several I/O APICs can be chained, each owning
//! [`NUM_PINS`] consecutive GSIs starting at its GSI base.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::arch::intr::{DeliveryMode, MSI_ADDR_BASE, MSI_DM, MSI_RH, MsiData};
use crate::arch::ioapic::{
    IOAPIC_EOI, IOAPIC_VER, IOAPIC_WINDOW, IOAPICID, IOAPICVER, IOEOI, IOPAR, IOREDTBL_BASE,
    IOREDTBL_MAX, IOREGSEL, IOWIN, NUM_PINS, REDIR_HI_MASK, REDIR_LO_MASK, RedirectEntry, RegVer,
};
use crate::bus::message::{IrqKind, IrqMessage, IrqNotify, LegacyKind, LegacyMessage, MemMessage};
use crate::bus::{InterruptSink, SystemBus};
use crate::utils::in_range;

const PINS: usize = NUM_PINS as usize;

#[derive(Debug)]
struct IoApicRegs {
    index: u8,
    id: u32,
    redirtbl: [RedirectEntry; PINS],
    rirr: [bool; PINS],
    // Delivery status: a level interrupt is held back by the mask.
    ds: [bool; PINS],
    // The source of the pin asked for an IrqNotify.
    notify: [bool; PINS],
}

impl IoApicRegs {
    fn new() -> Self {
        IoApicRegs {
            index: 0,
            id: 0,
            redirtbl: [RedirectEntry::RESET; PINS],
            rirr: [false; PINS],
            ds: [false; PINS],
            notify: [false; PINS],
        }
    }
}

#[derive(Debug)]
pub struct IoApic {
    base: u64,
    gsibase: u32,
    regs: Mutex<IoApicRegs>,
    bus: Arc<SystemBus>,
}

impl IoApic {
    pub fn new(bus: Arc<SystemBus>, base: u64, gsibase: u32) -> Self {
        IoApic {
            base,
            gsibase,
            regs: Mutex::new(IoApicRegs::new()),
            bus,
        }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn gsibase(&self) -> u32 {
        self.gsibase
    }

    /// The legacy timer on GSI 0 is wired to pin 2 and the cascade on GSI 2
    /// to pin 0.
    fn swap_legacy(line: u32) -> u32 {
        match line {
            0 => 2,
            2 => 0,
            line => line,
        }
    }

    fn pin_of(&self, gsi: u32) -> u32 {
        Self::swap_legacy(gsi) - self.gsibase
    }

    fn gsi_of(&self, pin: usize) -> u32 {
        Self::swap_legacy(pin as u32 + self.gsibase)
    }

    pub fn reset(&self) {
        *self.regs.lock() = IoApicRegs::new();
    }

    fn read_data(regs: &IoApicRegs) -> u32 {
        match regs.index {
            IOAPICID => regs.id,
            IOAPICVER => RegVer::new(IOAPIC_VER, true, NUM_PINS - 1).0,
            index @ IOREDTBL_BASE..=IOREDTBL_MAX => {
                let pin = ((index - IOREDTBL_BASE) / 2) as usize;
                let entry = regs.redirtbl[pin].0;
                if index & 1 == 0 {
                    entry as u32 | (regs.ds[pin] as u32) << 12 | (regs.rirr[pin] as u32) << 14
                } else {
                    (entry >> 32) as u32
                }
            }
            index => {
                log::debug!("ioapic: read from unknown register {index:#x}");
                0
            }
        }
    }

    fn write_data(regs: &mut IoApicRegs, value: u32) -> Option<MemMessage> {
        match regs.index {
            IOAPICID => regs.id = value,
            index @ IOREDTBL_BASE..=IOREDTBL_MAX => {
                let pin = ((index - IOREDTBL_BASE) / 2) as usize;
                let entry = &mut regs.redirtbl[pin];
                if index & 1 == 0 {
                    entry.0 = (entry.0 & !0xffff_ffff) | (value & REDIR_LO_MASK) as u64;
                } else {
                    entry.0 = (entry.0 & 0xffff_ffff) | ((value & REDIR_HI_MASK) as u64) << 32;
                }
                let entry = *entry;
                if regs.ds[pin] {
                    regs.ds[pin] = entry.trigger_mode();
                    if regs.ds[pin] && !entry.masked() {
                        let kind = if regs.notify[pin] {
                            IrqKind::AssertNotify
                        } else {
                            IrqKind::Assert
                        };
                        return Self::assert(regs, pin, kind);
                    }
                }
            }
            index => log::debug!("ioapic: write {value:#x} to unknown register {index:#x}"),
        }
        None
    }

    /// Returns the MSI write that delivers the pin, if any.
    fn assert(regs: &mut IoApicRegs, pin: usize, kind: IrqKind) -> Option<MemMessage> {
        if kind == IrqKind::Deassert {
            regs.ds[pin] = false;
            return None;
        }
        if regs.rirr[pin] {
            return None;
        }
        let entry = regs.redirtbl[pin];
        let level = entry.trigger_mode();
        regs.notify[pin] = kind == IrqKind::AssertNotify;
        if entry.masked() {
            if level {
                regs.ds[pin] = true;
            }
            return None;
        }
        regs.ds[pin] = false;
        regs.rirr[pin] = level;

        let mut addr = MSI_ADDR_BASE | ((entry.0 >> 44) & 0xffff0);
        if entry.dest_mode() {
            addr |= MSI_DM;
        }
        if entry.delivery_mode() == DeliveryMode::LOW_PRIORITY {
            addr |= MSI_RH;
        }
        let data = MsiData::new(entry.vector(), entry.delivery_mode(), level, level);
        Some(MemMessage::write(addr, data.0))
    }

    /// Asserts or deasserts `pin` of this I/O APIC.
    pub fn pin_assert(&self, pin: u32, kind: IrqKind) {
        if pin >= NUM_PINS as u32 {
            log::debug!("ioapic: invalid pin {pin}");
            return;
        }
        let msg = Self::assert(&mut self.regs.lock(), pin as usize, kind);
        if let Some(mut msg) = msg {
            log::trace!("ioapic: pin {pin} -> {:#x}:{:#x}", msg.addr, msg.value);
            self.bus.mem.send(&mut msg);
        }
    }

    /// Clears the remote IRR of every pin programmed with `vector`.
    pub fn eoi(&self, vector: u8) {
        let mut notify = vec![];
        {
            let mut regs = self.regs.lock();
            for pin in 0..PINS {
                if regs.redirtbl[pin].vector() != vector || !regs.rirr[pin] {
                    continue;
                }
                regs.rirr[pin] = false;
                if regs.notify[pin] {
                    let gsi = self.gsi_of(pin);
                    notify.push(IrqNotify {
                        base: gsi & !7,
                        mask: 1 << (gsi & 7),
                    });
                }
            }
        }
        for mut msg in notify {
            self.bus.notify.send(&mut msg);
        }
    }
}

impl InterruptSink<MemMessage> for IoApic {
    fn receive(&self, msg: &mut MemMessage) -> bool {
        if !in_range(msg.addr, self.base, IOAPIC_WINDOW) && msg.addr != IOAPIC_EOI {
            return false;
        }
        match (msg.addr & 0xff, msg.write) {
            (IOREGSEL, false) => msg.value = self.regs.lock().index as u32,
            (IOREGSEL, true) => self.regs.lock().index = msg.value as u8,
            (IOWIN, false) => msg.value = Self::read_data(&self.regs.lock()),
            (IOWIN, true) => {
                let retrigger = Self::write_data(&mut self.regs.lock(), msg.value);
                if let Some(mut retrigger) = retrigger {
                    self.bus.mem.send(&mut retrigger);
                }
            }
            (IOPAR, true) => self.pin_assert(msg.value, IrqKind::Assert),
            (IOEOI, true) => self.eoi(msg.value as u8),
            _ => return false,
        }
        true
    }
}

impl InterruptSink<IrqMessage> for IoApic {
    fn receive(&self, msg: &mut IrqMessage) -> bool {
        if !in_range(msg.line as u64, self.gsibase as u64, NUM_PINS as u64) {
            return false;
        }
        self.pin_assert(self.pin_of(msg.line), msg.kind);
        true
    }
}

impl InterruptSink<LegacyMessage> for IoApic {
    fn receive(&self, msg: &mut LegacyMessage) -> bool {
        if msg.kind != LegacyKind::Reset {
            return false;
        }
        self.reset();
        true
    }
}

#[cfg(test)]
#[path = "ioapic_test.rs"]
mod tests;
