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

//! Local APIC register model.
//! See: Intel SDM Vol. 3A, chapter 11 "Advanced Programmable Interrupt
//! Controller (APIC)", tables 11-1 and 11-6.

use bitfield::bitfield;
use bitflags::bitflags;

use crate::arch::intr::{DeliveryMode, DestShorthand};

pub const APIC_BASE_DEFAULT: u64 = 0xfee0_0000;
pub const APIC_PAGE_SIZE: u64 = 0x1000;

pub const MSR_APIC_BASE: u32 = 0x1b;
pub const MSR_X2APIC_FIRST: u32 = 0x800;
pub const MSR_X2APIC_LAST: u32 = 0x83f;

/// Version 0x14, six LVT entries, EOI-broadcast suppression supported.
pub const APIC_VERSION: u32 = 0x0105_0014;

/// Physical broadcast destination in xAPIC and x2APIC mode.
pub const XAPIC_BROADCAST: u32 = 0xff;
pub const X2APIC_BROADCAST: u32 = u32::MAX;

/// DFR model field for the flat logical destination model.
pub const DFR_FLAT: u32 = 0xf;

pub const NUM_LVT: usize = 6;

bitfield! {
    #[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
    pub struct ApicBase(u64);
    impl Debug;
    pub bsp, set_bsp : 8;
    pub x2apic, set_x2apic : 10;
    pub enabled, set_enabled : 11;
    pub u64, base, set_base : 39, 12;
}

impl ApicBase {
    /// Bits a guest may set: BSP, EXTD, EN and a 40-bit page address.
    pub const VALID: u64 = 0x00ff_ffff_fd00;

    pub fn addr(&self) -> u64 {
        self.base() << 12
    }

    pub fn is_x2apic(&self) -> bool {
        self.enabled() && self.x2apic()
    }
}

bitfield! {
    #[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
    pub struct LvtReg(u32);
    impl Debug;
    pub u8, vector, set_vector : 7, 0;
    pub u8, from into DeliveryMode, delivery_mode, set_delivery_mode : 10, 8;
    pub delivery_status, set_delivery_status : 12;
    pub polarity, set_polarity : 13;
    pub remote_irr, set_remote_irr : 14;
    pub trigger_mode, set_trigger_mode : 15;
    pub masked, set_masked : 16;
    pub periodic, set_periodic : 17;
}

impl LvtReg {
    pub const MASKED: LvtReg = LvtReg(1 << 16);
}

bitfield! {
    #[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
    pub struct IcrLo(u32);
    impl Debug;
    pub u8, vector, set_vector : 7, 0;
    pub u8, from into DeliveryMode, delivery_mode, set_delivery_mode : 10, 8;
    pub dest_mode, set_dest_mode : 11;
    pub delivery_status, set_delivery_status : 12;
    pub level, set_level : 14;
    pub trigger_mode, set_trigger_mode : 15;
    pub u8, from into DestShorthand, shorthand, set_shorthand : 19, 18;
}

bitfield! {
    #[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
    pub struct SpuriousReg(u32);
    impl Debug;
    pub u8, vector, set_vector : 7, 0;
    pub enabled, set_enabled : 8;
    pub suppress_eoi_broadcast, set_suppress_eoi_broadcast : 12;
}

bitflags! {
    /// Error Status Register bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ErrorStatus: u32 {
        const SEND_CHECKSUM = 1 << 0;
        const RECV_CHECKSUM = 1 << 1;
        const SEND_ACCEPT = 1 << 2;
        const RECV_ACCEPT = 1 << 3;
        const REDIRECTABLE_IPI = 1 << 4;
        const SEND_ILLEGAL_VECTOR = 1 << 5;
        const RECV_ILLEGAL_VECTOR = 1 << 6;
        const ILLEGAL_REGISTER = 1 << 7;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lvt {
    Timer = 0,
    Thermal = 1,
    Perf = 2,
    Lint0 = 3,
    Lint1 = 4,
    Error = 5,
}

impl Lvt {
    pub const ALL: [Lvt; NUM_LVT] = [
        Lvt::Timer,
        Lvt::Thermal,
        Lvt::Perf,
        Lvt::Lint0,
        Lvt::Lint1,
        Lvt::Error,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    /// LINT0 and LINT1 are the only sources that can be level triggered.
    pub const fn has_trigger_mode(self) -> bool {
        matches!(self, Lvt::Lint0 | Lvt::Lint1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg {
    Id,
    Version,
    Tpr,
    Apr,
    Ppr,
    Eoi,
    Rrd,
    Ldr,
    Dfr,
    Svr,
    Isr,
    Tmr,
    Irr,
    Esr,
    Icr,
    Icr2,
    Lvt(Lvt),
    TimerInitial,
    TimerCurrent,
    TimerDivide,
    SelfIpi,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Access: u8 {
        const XAPIC_READ = 1 << 0;
        const XAPIC_WRITE = 1 << 1;
        const X2APIC_READ = 1 << 2;
        const X2APIC_WRITE = 1 << 3;

        const XAPIC_RW = Self::XAPIC_READ.bits() | Self::XAPIC_WRITE.bits();
        const X2APIC_RW = Self::X2APIC_READ.bits() | Self::X2APIC_WRITE.bits();
        const READ = Self::XAPIC_READ.bits() | Self::X2APIC_READ.bits();
        const RW = Self::XAPIC_RW.bits() | Self::X2APIC_RW.bits();
    }
}

impl Access {
    pub fn readable(self, x2apic: bool) -> bool {
        self.contains(if x2apic {
            Access::X2APIC_READ
        } else {
            Access::XAPIC_READ
        })
    }

    pub fn writable(self, x2apic: bool) -> bool {
        self.contains(if x2apic {
            Access::X2APIC_WRITE
        } else {
            Access::XAPIC_WRITE
        })
    }
}

/// One row of the register table.
///
/// `index` is the MMIO offset divided by 16, which is also the x2APIC MSR
/// number minus 0x800. Bits outside `writable | read_only` are reserved;
/// setting them is rejected when access is strict (x2APIC MSRs).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegDesc {
    pub name: &'static str,
    pub reg: Reg,
    pub index: u16,
    pub count: u16,
    pub reset: u32,
    pub writable: u32,
    pub read_only: u32,
    pub access: Access,
}

impl RegDesc {
    const fn new(name: &'static str, reg: Reg, index: u16, access: Access) -> Self {
        RegDesc {
            name,
            reg,
            index,
            count: 1,
            reset: 0,
            writable: 0,
            read_only: 0,
            access,
        }
    }

    const fn reset(mut self, reset: u32) -> Self {
        self.reset = reset;
        self
    }

    const fn writable(mut self, writable: u32) -> Self {
        self.writable = writable;
        self
    }

    const fn read_only(mut self, read_only: u32) -> Self {
        self.read_only = read_only;
        self
    }

    const fn count(mut self, count: u16) -> Self {
        self.count = count;
        self
    }

    pub fn reserved(&self) -> u32 {
        !(self.writable | self.read_only)
    }
}

const fn lvt(name: &'static str, lvt: Lvt, writable: u32, read_only: u32) -> RegDesc {
    RegDesc::new(name, Reg::Lvt(lvt), 0x32 + lvt as u16, Access::RW)
        .reset(LvtReg::MASKED.0)
        .writable(writable)
        .read_only(read_only)
}

pub static REGS: [RegDesc; 24] = [
    RegDesc::new("ID", Reg::Id, 0x02, Access::XAPIC_RW.union(Access::X2APIC_READ))
        .writable(0xff00_0000),
    RegDesc::new("VERSION", Reg::Version, 0x03, Access::READ).reset(APIC_VERSION),
    RegDesc::new("TPR", Reg::Tpr, 0x08, Access::RW).writable(0xff),
    RegDesc::new("APR", Reg::Apr, 0x09, Access::XAPIC_READ),
    RegDesc::new("PPR", Reg::Ppr, 0x0a, Access::READ),
    RegDesc::new(
        "EOI",
        Reg::Eoi,
        0x0b,
        Access::XAPIC_WRITE.union(Access::X2APIC_WRITE),
    ),
    RegDesc::new("RRD", Reg::Rrd, 0x0c, Access::XAPIC_READ),
    RegDesc::new("LDR", Reg::Ldr, 0x0d, Access::XAPIC_RW.union(Access::X2APIC_READ))
        .writable(0xff00_0000),
    RegDesc::new("DFR", Reg::Dfr, 0x0e, Access::XAPIC_RW)
        .reset(u32::MAX)
        .writable(0xf000_0000),
    RegDesc::new("SVR", Reg::Svr, 0x0f, Access::RW)
        .reset(0xff)
        .writable(0x11ff),
    RegDesc::new("ISR", Reg::Isr, 0x10, Access::READ).count(8),
    RegDesc::new("TMR", Reg::Tmr, 0x18, Access::READ).count(8),
    RegDesc::new("IRR", Reg::Irr, 0x20, Access::READ).count(8),
    RegDesc::new("ESR", Reg::Esr, 0x28, Access::RW),
    RegDesc::new("ICR", Reg::Icr, 0x30, Access::RW)
        .writable(0x000c_cfff)
        .read_only(0x1000),
    RegDesc::new("ICR2", Reg::Icr2, 0x31, Access::XAPIC_RW).writable(0xff00_0000),
    lvt("LVT_TIMER", Lvt::Timer, 0x0003_00ff, 0x1000),
    lvt("LVT_THERMAL", Lvt::Thermal, 0x0001_07ff, 0x1000),
    lvt("LVT_PERF", Lvt::Perf, 0x0001_07ff, 0x1000),
    lvt("LVT_LINT0", Lvt::Lint0, 0x0001_a7ff, 0x5000),
    lvt("LVT_LINT1", Lvt::Lint1, 0x0001_a7ff, 0x5000),
    lvt("LVT_ERROR", Lvt::Error, 0x0001_00ff, 0x1000),
    RegDesc::new("TIMER_ICR", Reg::TimerInitial, 0x38, Access::RW).writable(u32::MAX),
    RegDesc::new("TIMER_CCR", Reg::TimerCurrent, 0x39, Access::READ),
];

/// Registers that do not fit the flat table above because they sit at the
/// end of the page.
pub static TIMER_DCR: RegDesc =
    RegDesc::new("TIMER_DCR", Reg::TimerDivide, 0x3e, Access::RW).writable(0xb);
pub static SELF_IPI: RegDesc =
    RegDesc::new("SELF_IPI", Reg::SelfIpi, 0x3f, Access::X2APIC_WRITE).writable(0xff);

/// Finds the register at `index` and the position within a multi-word
/// register such as ISR0..ISR7.
pub fn lookup(index: u16) -> Option<(&'static RegDesc, u16)> {
    REGS.iter()
        .chain([&TIMER_DCR, &SELF_IPI])
        .find(|d| index >= d.index && index - d.index < d.count)
        .map(|d| (d, index - d.index))
}

/// Power-on and INIT value of `reg`. Registers without a row reset to 0.
pub fn reset_value(reg: Reg) -> u32 {
    REGS.iter()
        .chain([&TIMER_DCR, &SELF_IPI])
        .find(|d| d.reg == reg)
        .map_or(0, |d| d.reset)
}

/// Returns the divider shift encoded in the Divide Configuration Register:
/// 0b0000 divides by 2, ..., 0b1010 divides by 128, 0b1011 divides by 1.
pub fn dcr_shift(dcr: u32) -> u8 {
    let val = (dcr & 0b11) | ((dcr >> 1) & 0b100);
    ((val + 1) & 0b111) as u8
}

#[cfg(test)]
#[path = "lapic_test.rs"]
mod tests;
