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

//! Emulated Intel 8259A programmable interrupt controller.
//!
//! A slave reports its requests on an input line of the master and answers
//! the master's queries on the cascade bus. The master drives the INTR pin
//! of the platform, and answers the INTA cycle.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::arch::pic::{
    ICW1_IC4, ICW1_INIT, ICW1_LTIM, ICW1_SNGL, ICW4_AEOI, ICW4_BUF, ICW4_MS, ICW4_SFNM,
    OCW_SELECT_OCW3, OCW2_EOI, OCW2_LEVEL_MASK, OCW2_ROTATE, OCW2_SPECIFIC, OCW3_ESMM, OCW3_POLL,
    OCW3_READ_ISR, OCW3_READ_REG, OCW3_SMM, SPURIOUS_IRQ,
};
use crate::bus::message::{
    IoMessage, IrqKind, IrqMessage, IrqNotify, LegacyKind, LegacyMessage, PicMessage,
};
use crate::bus::{InterruptSink, SystemBus};
use crate::utils::in_range;

/// IRQs in priority order, highest first.
fn by_priority(prio_lowest: u8) -> impl Iterator<Item = u8> {
    (0..8).map(move |i| (prio_lowest + 1 + i) & 7)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IcwMode {
    Icw2,
    Icw3,
    Icw4,
    Ocw1,
}

#[derive(Debug)]
struct PicRegs {
    icw1: u8,
    icw2: u8,
    icw3: u8,
    icw4: u8,
    icw_mode: IcwMode,
    rotate_on_aeoi: bool,
    smm: bool,
    read_isr: bool,
    poll: bool,
    prio_lowest: u8,
    imr: u8,
    isr: u8,
    irr: u8,
    elcr: u8,
    notify: u8,
}

impl PicRegs {
    fn power_on(virq: u32) -> Self {
        let mut regs = PicRegs {
            icw1: 0,
            icw2: 0,
            icw3: 0,
            icw4: 0,
            icw_mode: IcwMode::Ocw1,
            rotate_on_aeoi: false,
            smm: false,
            read_isr: false,
            poll: false,
            prio_lowest: 7,
            imr: 0,
            isr: 0,
            irr: 0,
            elcr: 0,
            notify: 0,
        };
        regs.reset(virq);
        regs
    }

    fn is_slave(&self, virq: u32) -> bool {
        if self.icw4 & ICW4_BUF != 0 {
            self.icw4 & ICW4_MS == 0
        } else {
            virq != 0
        }
    }

    /// State after ICW1.
    fn reset(&mut self, virq: u32) {
        self.irr = 0;
        self.imr = 0;
        self.prio_lowest = 7;
        self.smm = false;
        self.read_isr = false;
        if self.icw1 & ICW1_IC4 == 0 {
            self.icw4 = 0;
        }
        self.icw3 = if self.is_slave(virq) { 7 } else { 0 };
        self.isr = 0;
        self.poll = false;
        self.elcr = if self.icw1 & ICW1_LTIM != 0 { 0xff } else { 0 };
        self.notify = 0;
    }

    fn rotate(&mut self) {
        self.prio_lowest = (self.prio_lowest + 1) & 7;
    }

    fn non_specific_eoi(&mut self) {
        let irq = by_priority(self.prio_lowest).find(|&irq| {
            self.isr & (1 << irq) != 0 && !(self.smm && self.imr & (1 << irq) == 0)
        });
        if let Some(irq) = irq {
            self.isr &= !(1 << irq);
        }
    }

    /// Finds the IRQ to be serviced next. With `int_ack` it also moves
    /// the IRQ into service.
    fn prioritize(&mut self, int_ack: bool) -> Option<u8> {
        let state = self.irr & !self.imr;
        for irq in by_priority(self.prio_lowest) {
            let bit = 1 << irq;
            let nested = self.icw4 & ICW4_SFNM != 0 && self.icw3 & bit != 0;
            if !self.smm && self.isr & bit != 0 && !nested {
                return None;
            }
            if state & bit == 0 {
                continue;
            }
            if int_ack {
                self.isr |= bit;
                if self.elcr & bit == 0 {
                    self.irr &= !bit;
                }
                if self.icw4 & ICW4_AEOI != 0 {
                    self.non_specific_eoi();
                    if self.rotate_on_aeoi {
                        self.rotate();
                    }
                }
            }
            return Some(irq);
        }
        None
    }

    /// Lines whose request was retired and whose source asked to be told.
    fn take_notify(&mut self) -> u8 {
        let notify = !self.irr & self.notify;
        self.notify &= !notify;
        notify
    }

    /// Handles a write to the data port. Returns true if it was OCW1.
    fn write_data(&mut self, value: u8) -> bool {
        loop {
            match self.icw_mode {
                IcwMode::Icw2 => {
                    self.icw2 = value & 0xf8;
                    self.icw_mode = IcwMode::Icw3;
                    return false;
                }
                IcwMode::Icw3 => {
                    self.icw_mode = IcwMode::Icw4;
                    if self.icw1 & ICW1_SNGL == 0 {
                        self.icw3 = value;
                        return false;
                    }
                }
                IcwMode::Icw4 => {
                    self.icw_mode = IcwMode::Ocw1;
                    if self.icw1 & ICW1_IC4 != 0 {
                        self.icw4 = value;
                        return false;
                    }
                }
                IcwMode::Ocw1 => {
                    self.imr = value;
                    return true;
                }
            }
        }
    }

    fn write_ocw2(&mut self, value: u8) {
        let rotate = value & OCW2_ROTATE != 0;
        if value & OCW2_SPECIFIC != 0 {
            let level = value & OCW2_LEVEL_MASK;
            if value & OCW2_EOI != 0 {
                self.isr &= !(1 << level);
            }
            if rotate {
                self.prio_lowest = level;
            }
        } else if value & OCW2_EOI != 0 {
            self.non_specific_eoi();
            if rotate {
                self.rotate();
            }
        } else {
            self.rotate_on_aeoi = rotate;
        }
    }

    fn write_ocw3(&mut self, value: u8) {
        if value & OCW3_ESMM != 0 {
            self.smm = value & OCW3_SMM != 0;
        }
        if value & OCW3_READ_REG != 0 {
            self.read_isr = value & OCW3_READ_ISR != 0;
        }
        self.poll = value & OCW3_POLL != 0;
    }
}

#[derive(Debug)]
pub struct Pic8259 {
    base: u16,
    elcr_port: Option<u16>,
    // First line of the irq_lines bus owned by this PIC.
    virq: u32,
    // Line of the master a slave raises.
    upstream: u32,
    regs: Mutex<PicRegs>,
    bus: Arc<SystemBus>,
}

impl Pic8259 {
    /// Creates a PIC decoding ports `base` and `base + 1`, and owning the
    /// input lines `virq..virq + 8`. The PIC owning line 0 is the master.
    pub fn new(
        bus: Arc<SystemBus>,
        base: u16,
        elcr_port: Option<u16>,
        virq: u32,
        upstream: u32,
    ) -> Self {
        Pic8259 {
            base,
            elcr_port,
            virq,
            upstream,
            regs: Mutex::new(PicRegs::power_on(virq)),
            bus,
        }
    }

    pub fn base(&self) -> u16 {
        self.base
    }

    pub fn virq(&self) -> u32 {
        self.virq
    }

    pub fn is_master(&self) -> bool {
        self.virq == 0
    }

    pub fn irr(&self) -> u8 {
        self.regs.lock().irr
    }

    pub fn isr(&self) -> u8 {
        self.regs.lock().isr
    }

    pub fn imr(&self) -> u8 {
        self.regs.lock().imr
    }

    fn send_notify(&self, mask: u8) {
        if mask == 0 {
            return;
        }
        let mut msg = IrqNotify {
            base: self.virq,
            mask,
        };
        self.bus.notify.send(&mut msg);
    }

    /// Reports the current request state upstream.
    fn propagate(&self, send_deassert: bool) {
        let (notify, pending) = {
            let mut regs = self.regs.lock();
            (regs.take_notify(), regs.prioritize(false).is_some())
        };
        self.send_notify(notify);
        if pending {
            if self.is_master() {
                self.bus.legacy.send(&mut LegacyMessage::new(LegacyKind::Intr));
            } else {
                let mut msg = IrqMessage::new(self.upstream, IrqKind::Assert);
                self.bus.irq_lines.send(&mut msg);
            }
        } else if send_deassert && self.is_master() {
            let mut msg = LegacyMessage::new(LegacyKind::DeassertIntr);
            self.bus.legacy.send(&mut msg);
        }
    }

    /// Runs the acknowledge cycle and returns the vector.
    fn irq_vector(&self) -> u8 {
        let (irq, cascade, icw2, notify) = {
            let mut regs = self.regs.lock();
            let notify = regs.take_notify();
            match regs.prioritize(true) {
                Some(irq) => {
                    let cascade = !regs.is_slave(self.virq) && regs.icw3 & (1 << irq) != 0;
                    (irq, cascade, regs.icw2, notify)
                }
                None => {
                    log::debug!(
                        "pic-{:#x}: spurious INTA, irr {:#x}, isr {:#x}, imr {:#x}",
                        self.base,
                        regs.irr,
                        regs.isr,
                        regs.imr
                    );
                    (SPURIOUS_IRQ, false, regs.icw2, notify)
                }
            }
        };
        self.send_notify(notify);
        if cascade {
            let mut msg = PicMessage {
                slave: irq,
                vector: 0,
            };
            if self.bus.pic.send(&mut msg) {
                return msg.vector;
            }
            log::warn!("pic-{:#x}: no slave at line {irq}", self.base);
        }
        icw2.wrapping_add(irq)
    }

    /// Restores the power-on state.
    pub fn reset(&self) {
        *self.regs.lock() = PicRegs::power_on(self.virq);
        self.propagate(true);
    }

    fn io_read(&self, port: u16) -> u8 {
        let mut regs = self.regs.lock();
        if Some(port) == self.elcr_port {
            regs.elcr
        } else if regs.poll {
            regs.poll = false;
            let irq = regs.prioritize(true);
            drop(regs);
            self.propagate(true);
            irq.map_or(0, |irq| 0x80 | irq)
        } else if port == self.base {
            if regs.read_isr { regs.isr } else { regs.irr }
        } else {
            regs.imr
        }
    }

    fn io_write(&self, port: u16, value: u8) {
        let mut regs = self.regs.lock();
        if Some(port) == self.elcr_port {
            regs.elcr = value;
            return;
        }
        let send_deassert = if port != self.base {
            if !regs.write_data(value) {
                return;
            }
            true
        } else if value & ICW1_INIT != 0 {
            regs.icw1 = value;
            regs.reset(self.virq);
            regs.icw_mode = IcwMode::Icw2;
            true
        } else if value & OCW_SELECT_OCW3 == 0 {
            regs.write_ocw2(value);
            false
        } else {
            regs.write_ocw3(value);
            false
        };
        drop(regs);
        self.propagate(send_deassert);
    }
}

impl InterruptSink<LegacyMessage> for Pic8259 {
    fn receive(&self, msg: &mut LegacyMessage) -> bool {
        match msg.kind {
            LegacyKind::Inta if self.is_master() => {
                msg.value = self.irq_vector();
                self.propagate(true);
                true
            }
            LegacyKind::Reset => {
                self.reset();
                true
            }
            _ => false,
        }
    }
}

impl InterruptSink<PicMessage> for Pic8259 {
    fn receive(&self, msg: &mut PicMessage) -> bool {
        let selected = {
            let regs = self.regs.lock();
            regs.is_slave(self.virq) && msg.slave == regs.icw3 & 7
        };
        if !selected {
            return false;
        }
        msg.vector = self.irq_vector();
        self.propagate(false);
        true
    }
}

impl InterruptSink<IoMessage> for Pic8259 {
    fn receive(&self, msg: &mut IoMessage) -> bool {
        if !in_range(msg.port as u64, self.base as u64, 2) && Some(msg.port) != self.elcr_port {
            return false;
        }
        if msg.write {
            self.io_write(msg.port, msg.value);
        } else {
            msg.value = self.io_read(msg.port);
        }
        true
    }
}

impl InterruptSink<IrqMessage> for Pic8259 {
    fn receive(&self, msg: &mut IrqMessage) -> bool {
        if !in_range(msg.line as u64, self.virq as u64, 8) {
            return false;
        }
        let bit = 1 << (msg.line - self.virq);
        let changed = {
            let mut regs = self.regs.lock();
            if msg.kind == IrqKind::AssertNotify {
                regs.notify |= bit;
            }
            match msg.kind {
                IrqKind::Deassert if regs.irr & bit != 0 && regs.elcr & bit != 0 => {
                    regs.irr &= !bit;
                    Some(true)
                }
                IrqKind::Deassert => None,
                IrqKind::Assert | IrqKind::AssertNotify if regs.irr & bit == 0 => {
                    regs.irr |= bit;
                    Some(false)
                }
                IrqKind::Assert | IrqKind::AssertNotify => None,
            }
        };
        if let Some(send_deassert) = changed {
            self.propagate(send_deassert);
        }
        true
    }
}

#[cfg(test)]
#[path = "pic8259_test.rs"]
mod tests;
