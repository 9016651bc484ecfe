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

//! Assembly of a PC-style interrupt topology.

use std::sync::Arc;

use serde::Deserialize;
use serde_aco::Help;
use snafu::Snafu;

use crate::arch::ioapic::{IOAPIC_BASE, IOAPIC_STRIDE, NUM_PINS};
use crate::arch::pic::{CASCADE_LINE, MASTER_BASE, MASTER_ELCR, SLAVE_BASE, SLAVE_ELCR};
use crate::bus::SystemBus;
use crate::bus::message::{
    IoMessage, IrqKind, IrqMessage, LegacyKind, LegacyMessage, MemMessage, TimeoutMessage,
};
use crate::device::IsaLines;
use crate::device::ioapic::IoApic;
use crate::device::lapic::Lapic;
use crate::device::msi::MsiForwarder;
use crate::device::pic8259::Pic8259;
use crate::errors::{DebugTrace, trace_error};
use crate::timer::{Clock, TimerQueue};
use crate::vcpu::{CpuEvents, Vcpu};

/// xAPIC IDs are 8 bits wide and 0xff is the broadcast ID.
pub const MAX_CPUS: u32 = 255;
/// I/O APICs are placed in a single 32 KiB window.
pub const MAX_IOAPICS: u32 = 8;

const SVR: u16 = 0x0f;
const LVT_LINT0: u16 = 0x35;
const LVT_LINT1: u16 = 0x36;

#[trace_error]
#[derive(Snafu, DebugTrace)]
#[snafu(module, context(suffix(false)))]
pub enum Error {
    #[snafu(display("A board needs at least one CPU"))]
    NoCpu,
    #[snafu(display("{num_cpu} CPUs exceed the limit of {MAX_CPUS}"))]
    TooManyCpus { num_cpu: u32 },
    #[snafu(display("Invalid number of IO APICs {num_ioapic}, expected 1 to {MAX_IOAPICS}"))]
    InvalidIoapicCount { num_ioapic: u32 },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

fn default_num_cpu() -> u32 {
    1
}

fn default_num_ioapic() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Help)]
pub struct BoardConfig {
    /// Number of vCPUs, each with its own local APIC. [default: 1]
    #[serde(default = "default_num_cpu")]
    pub num_cpu: u32,
    /// Number of I/O APICs, each adding 24 GSIs. [default: 1]
    #[serde(default = "default_num_ioapic")]
    pub num_ioapic: u32,
    /// Attach a master and a slave 8259 PIC. [default: true]
    #[serde(default = "default_true")]
    pub pic: bool,
    /// Program the local APIC of the BSP the way firmware does: enabled,
    /// LINT0 as ExtINT and LINT1 as NMI. [default: true]
    #[serde(default = "default_true")]
    pub virtual_wire: bool,
}

impl Default for BoardConfig {
    fn default() -> Self {
        BoardConfig {
            num_cpu: default_num_cpu(),
            num_ioapic: default_num_ioapic(),
            pic: true,
            virtual_wire: true,
        }
    }
}

impl BoardConfig {
    fn validate(&self) -> Result<()> {
        if self.num_cpu == 0 {
            return error::NoCpu.fail();
        }
        if self.num_cpu > MAX_CPUS {
            return error::TooManyCpus {
                num_cpu: self.num_cpu,
            }
            .fail();
        }
        if self.num_ioapic == 0 || self.num_ioapic > MAX_IOAPICS {
            return error::InvalidIoapicCount {
                num_ioapic: self.num_ioapic,
            }
            .fail();
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct Board {
    config: BoardConfig,
    bus: Arc<SystemBus>,
    clock: Arc<dyn Clock>,
    timers: Arc<TimerQueue>,
    pics: Vec<Arc<Pic8259>>,
    ioapics: Vec<Arc<IoApic>>,
    vcpus: Vec<Vcpu>,
}

impl Board {
    pub fn new(config: BoardConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let bus = Arc::new(SystemBus::new());
        let timers = Arc::new(TimerQueue::new());

        let mut pics = vec![];
        if config.pic {
            let master = Pic8259::new(bus.clone(), MASTER_BASE, Some(MASTER_ELCR), 0, 0);
            let slave = Pic8259::new(
                bus.clone(),
                SLAVE_BASE,
                Some(SLAVE_ELCR),
                8,
                CASCADE_LINE as u32,
            );
            for pic in [master, slave] {
                let pic = Arc::new(pic);
                bus.io.add(pic.clone());
                bus.irq_lines.add(pic.clone());
                bus.pic.add(pic.clone());
                bus.legacy.add(pic.clone());
                pics.push(pic);
            }
            bus.irq.add(Arc::new(IsaLines::new(bus.clone())));
        }

        let mut ioapics = vec![];
        for n in 0..config.num_ioapic {
            let base = IOAPIC_BASE + n as u64 * IOAPIC_STRIDE;
            let ioapic = Arc::new(IoApic::new(bus.clone(), base, n * NUM_PINS as u32));
            bus.mem.add(ioapic.clone());
            bus.irq.add(ioapic.clone());
            bus.legacy.add(ioapic.clone());
            ioapics.push(ioapic);
        }
        bus.mem.add(Arc::new(MsiForwarder::new(bus.clone())));

        let mut vcpus = vec![];
        for index in 0..config.num_cpu {
            let events = Arc::new(CpuEvents::new());
            let lapic = Arc::new(Lapic::new(
                index,
                bus.clone(),
                events.clone(),
                clock.clone(),
                timers.clone(),
                timers.alloc(),
            ));
            bus.apic.add(lapic.clone());
            bus.legacy.add(lapic.clone());
            bus.timeout.add(lapic.clone());
            vcpus.push(Vcpu::new(index, lapic, events, bus.clone()));
        }

        bus.legacy.send(&mut LegacyMessage::new(LegacyKind::Reset));
        if config.virtual_wire {
            let bsp = vcpus[0].lapic();
            bsp.write_register(SVR, 0x1ff, false);
            bsp.write_register(LVT_LINT0, 0x700, false);
            bsp.write_register(LVT_LINT1, 0x400, false);
        }
        log::info!(
            "board: {} vCPUs, {} IO APICs, PIC {}",
            config.num_cpu,
            config.num_ioapic,
            if config.pic { "on" } else { "off" }
        );

        Ok(Board {
            config,
            bus,
            clock,
            timers,
            pics,
            ioapics,
            vcpus,
        })
    }

    pub fn config(&self) -> &BoardConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<SystemBus> {
        &self.bus
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn vcpu(&self, index: u32) -> Option<&Vcpu> {
        self.vcpus.get(index as usize)
    }

    /// The bootstrap processor, vCPU 0.
    pub fn bsp(&self) -> &Vcpu {
        &self.vcpus[0]
    }

    pub fn vcpus(&self) -> &[Vcpu] {
        &self.vcpus
    }

    pub fn ioapic(&self, index: u32) -> Option<&Arc<IoApic>> {
        self.ioapics.get(index as usize)
    }

    /// The master and the slave PIC, if the board has them.
    pub fn pics(&self) -> &[Arc<Pic8259>] {
        &self.pics
    }

    /// Drives GSI `gsi`. Returns false if no controller owns the line.
    pub fn raise_irq(&self, gsi: u32, kind: IrqKind) -> bool {
        self.bus.irq.send(&mut IrqMessage::new(gsi, kind))
    }

    pub fn io_read(&self, port: u16) -> u8 {
        let mut msg = IoMessage::read(port);
        if self.bus.io.send(&mut msg) {
            msg.value
        } else {
            log::trace!("board: unclaimed read from port {port:#x}");
            u8::MAX
        }
    }

    pub fn io_write(&self, port: u16, value: u8) {
        if !self.bus.io.send(&mut IoMessage::write(port, value)) {
            log::trace!("board: unclaimed write {value:#x} to port {port:#x}");
        }
    }

    /// A memory read by a device, which does not see any local APIC.
    pub fn mem_read(&self, addr: u64) -> u32 {
        let mut msg = MemMessage::read(addr);
        if self.bus.mem.send(&mut msg) {
            msg.value
        } else {
            u32::MAX
        }
    }

    /// A memory write by a device, e.g. an MSI.
    pub fn mem_write(&self, addr: u64, value: u32) -> bool {
        self.bus.mem.send(&mut MemMessage::write(addr, value))
    }

    /// Delivers every timeout that is due. Returns how many fired.
    pub fn fire_timers(&self) -> usize {
        let expired = self.timers.expired(self.clock.now());
        for timer in &expired {
            self.bus.timeout.send(&mut TimeoutMessage { timer: *timer });
        }
        expired.len()
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.timers.next_deadline()
    }
}

impl Drop for Board {
    fn drop(&mut self) {
        self.bus.detach_all();
    }
}

#[cfg(test)]
#[path = "board_test.rs"]
mod tests;
