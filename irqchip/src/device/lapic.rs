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

//! Emulated local APIC with the xAPIC (MMIO) and x2APIC (MSR) interfaces.
//! See: Intel SDM Vol. 3A, chapter 11.
//!
//! IRR, ISR and TMR are atomic bitmaps so that other vCPUs can post
//! interrupts while the owner acknowledges or retires one. Transitions
//! between IRR and ISR happen with the register lock held, so a vector is
//! never observed in both at once.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::arch::intr::{DeliveryMode, DestShorthand, MIN_VECTOR};
use crate::arch::ioapic::IOAPIC_EOI;
use crate::arch::lapic::{
    self, APIC_BASE_DEFAULT, APIC_PAGE_SIZE, ApicBase, DFR_FLAT, ErrorStatus, IcrLo, Lvt, LvtReg,
    MSR_APIC_BASE, MSR_X2APIC_FIRST, MSR_X2APIC_LAST, NUM_LVT, Reg, SpuriousReg, X2APIC_BROADCAST,
    XAPIC_BROADCAST,
};
use crate::bus::message::{ApicMessage, LegacyKind, LegacyMessage, MemMessage, TimeoutMessage};
use crate::bus::{InterruptSink, SystemBus};
use crate::timer::{Clock, TimerId, TimerSource};
use crate::utils::bitmap::VectorBitmap;
use crate::utils::in_range;
use crate::vcpu::{CpuEvent, CpuEvents};

/// The timer never counts faster than this before the divider applies.
pub const MAX_TIMER_FREQ: u64 = 200_000_000;

/// In x2APIC mode ICR and ICR2 are a single 64-bit MSR.
const X2APIC_ICR: u16 = 0x30;

/// Outcome of an interrupt acknowledge cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptAck {
    Vector(u8),
    /// An ExtINT source is pending; the 8259 supplies the vector.
    ExtInt,
    /// Nothing deliverable; the value of the spurious vector register.
    Spurious(u8),
}

/// Smallest shift that brings `freq` down to at most [`MAX_TIMER_FREQ`].
pub fn timer_clock_shift(freq: u64) -> u32 {
    let mut shift = 0;
    while freq >> shift > MAX_TIMER_FREQ {
        shift += 1;
    }
    shift
}

fn x2apic_ldr(id: u32) -> u32 {
    ((id >> 4) << 16) | (1 << (id & 0xf))
}

fn xapic_dst(icr2: u32) -> u32 {
    match icr2 >> 24 {
        XAPIC_BROADCAST => X2APIC_BROADCAST,
        dst => dst,
    }
}

#[derive(Debug)]
struct LapicRegs {
    base: ApicBase,
    id: u32,
    tpr: u32,
    ldr: u32,
    dfr: u32,
    svr: SpuriousReg,
    esr: u32,
    icr: u32,
    icr2: u32,
    lvt: [LvtReg; NUM_LVT],
    // ExtINT pending per LVT.
    lvtds: [bool; NUM_LVT],
    // Level-triggered LINT0/LINT1 waiting for EOI.
    rirr: [bool; NUM_LVT],
    ict: u32,
    dcr: u32,
    dcr_shift: u8,
    // Clock reading the count started from and the ticks already counted
    // down at that time.
    timer_start: Option<u64>,
    timer_done: u64,
}

impl LapicRegs {
    fn power_on(initial_id: u32) -> Self {
        let mut base = ApicBase(APIC_BASE_DEFAULT);
        base.set_enabled(true);
        base.set_bsp(initial_id == 0);
        let mut regs = LapicRegs {
            base,
            id: initial_id << 24,
            tpr: 0,
            ldr: 0,
            dfr: u32::MAX,
            svr: SpuriousReg(0),
            esr: 0,
            icr: 0,
            icr2: 0,
            lvt: [LvtReg::MASKED; NUM_LVT],
            lvtds: [false; NUM_LVT],
            rirr: [false; NUM_LVT],
            ict: 0,
            dcr: 0,
            dcr_shift: 0,
            timer_start: None,
            timer_done: 0,
        };
        regs.init();
        regs
    }

    /// INIT state: everything but the base MSR and the ID.
    fn init(&mut self) {
        self.tpr = lapic::reset_value(Reg::Tpr);
        if !self.base.is_x2apic() {
            self.ldr = lapic::reset_value(Reg::Ldr);
        }
        self.dfr = lapic::reset_value(Reg::Dfr);
        self.svr = SpuriousReg(lapic::reset_value(Reg::Svr));
        self.esr = lapic::reset_value(Reg::Esr);
        self.icr = lapic::reset_value(Reg::Icr);
        self.icr2 = lapic::reset_value(Reg::Icr2);
        self.lvt = Lvt::ALL.map(|lvt| LvtReg(lapic::reset_value(Reg::Lvt(lvt))));
        self.lvtds = [false; NUM_LVT];
        self.rirr = [false; NUM_LVT];
        self.ict = lapic::reset_value(Reg::TimerInitial);
        self.dcr = lapic::reset_value(Reg::TimerDivide);
        self.dcr_shift = lapic::dcr_shift(self.dcr);
        self.timer_start = None;
        self.timer_done = 0;
    }

    fn software_disable(&mut self) {
        for lvt in &mut self.lvt {
            lvt.set_masked(true);
        }
        self.lvtds = [false; NUM_LVT];
        self.rirr = [false; NUM_LVT];
    }

    fn timer(&self) -> LvtReg {
        self.lvt[Lvt::Timer.index()]
    }
}

enum Followup {
    None,
    Eoi,
    Ipi(IcrLo, u32),
    Timer,
}

#[derive(Debug)]
pub struct Lapic {
    initial_id: u32,
    irr: VectorBitmap,
    isr: VectorBitmap,
    tmr: VectorBitmap,
    // Vectors that arrived while already in service, and their trigger
    // mode. They move to IRR when the in-service instance is retired.
    deferred: VectorBitmap,
    deferred_level: VectorBitmap,
    esr_shadow: AtomicU32,
    regs: Mutex<LapicRegs>,
    lowest_rr: AtomicUsize,
    clock_shift: u32,
    events: Arc<CpuEvents>,
    bus: Arc<SystemBus>,
    clock: Arc<dyn Clock>,
    timers: Arc<dyn TimerSource>,
    timer_id: TimerId,
}

impl Lapic {
    pub fn new(
        initial_id: u32,
        bus: Arc<SystemBus>,
        events: Arc<CpuEvents>,
        clock: Arc<dyn Clock>,
        timers: Arc<dyn TimerSource>,
        timer_id: TimerId,
    ) -> Self {
        Lapic {
            initial_id,
            irr: VectorBitmap::new(),
            isr: VectorBitmap::new(),
            tmr: VectorBitmap::new(),
            deferred: VectorBitmap::new(),
            deferred_level: VectorBitmap::new(),
            esr_shadow: AtomicU32::new(0),
            regs: Mutex::new(LapicRegs::power_on(initial_id)),
            lowest_rr: AtomicUsize::new(0),
            clock_shift: timer_clock_shift(clock.freq()),
            events,
            bus,
            clock,
            timers,
            timer_id,
        }
    }

    pub fn initial_id(&self) -> u32 {
        self.initial_id
    }

    pub fn timer_id(&self) -> TimerId {
        self.timer_id
    }

    pub fn base(&self) -> ApicBase {
        self.regs.lock().base
    }

    pub fn irr(&self) -> &VectorBitmap {
        &self.irr
    }

    pub fn isr(&self) -> &VectorBitmap {
        &self.isr
    }

    pub fn tmr(&self) -> &VectorBitmap {
        &self.tmr
    }

    /// Errors recorded since the last write to ESR.
    pub fn pending_errors(&self) -> ErrorStatus {
        ErrorStatus::from_bits_retain(self.esr_shadow.load(Ordering::Acquire))
    }

    fn ppr(&self, tpr: u32) -> u8 {
        let tpr = tpr as u8;
        let isrv = self.isr.highest().unwrap_or(0);
        if tpr & 0xf0 >= isrv & 0xf0 {
            tpr
        } else {
            isrv & 0xf0
        }
    }

    fn update_intr(&self, regs: &LapicRegs) {
        let ppr = self.ppr(regs.tpr);
        let extint = regs.lvtds.iter().any(|ds| *ds);
        let fixed = self.irr.highest().is_some_and(|v| v & 0xf0 > ppr & 0xf0);
        if extint || fixed {
            self.events.raise(CpuEvent::INTR);
        } else {
            self.events.clear(CpuEvent::INTR);
        }
    }

    /// Recomputes whether the CPU has to be interrupted.
    pub fn update_irqs(&self) {
        let regs = self.regs.lock();
        self.update_intr(&regs);
    }

    fn set_error(&self, error: ErrorStatus) {
        let old = self.esr_shadow.fetch_or(error.bits(), Ordering::AcqRel);
        if old & error.bits() != error.bits() {
            log::debug!("lapic-{}: error {error:?}", self.initial_id);
            self.trigger_lvt(Lvt::Error);
        }
    }

    /// Posts a fixed interrupt. Returns false if the vector is illegal.
    ///
    /// The deassert message of a level interrupt carries no information for
    /// a local APIC and is dropped.
    pub fn accept_vector(&self, vector: u8, level: bool, assert: bool) -> bool {
        if vector < MIN_VECTOR {
            self.set_error(ErrorStatus::RECV_ILLEGAL_VECTOR);
            return false;
        }
        if level && !assert {
            return true;
        }
        let regs = self.regs.lock();
        if self.isr.test(vector) {
            self.deferred_level.assign(vector, level);
            self.deferred.set(vector);
        } else {
            self.tmr.assign(vector, level);
            self.irr.set(vector);
        }
        log::trace!("lapic-{}: accepted {vector:#x}, level {level}", self.initial_id);
        self.update_intr(&regs);
        true
    }

    /// Raises the interrupt configured in the LVT entry of `lvt`.
    pub fn trigger_lvt(&self, lvt: Lvt) -> bool {
        let index = lvt.index();
        let mut regs = self.regs.lock();
        let entry = regs.lvt[index];
        if entry.masked() {
            return false;
        }
        match entry.delivery_mode() {
            DeliveryMode::FIXED => {
                if regs.rirr[index] {
                    return false;
                }
                let level = lvt.has_trigger_mode() && entry.trigger_mode();
                regs.rirr[index] = level;
                drop(regs);
                let accepted = self.accept_vector(entry.vector(), level, true);
                if !accepted && level {
                    self.regs.lock().rirr[index] = false;
                }
                accepted
            }
            DeliveryMode::EXTINT => {
                regs.lvtds[index] = true;
                self.update_intr(&regs);
                true
            }
            DeliveryMode::NMI => {
                self.events.raise(CpuEvent::NMI);
                true
            }
            DeliveryMode::SMI => {
                self.events.raise(CpuEvent::SMI);
                true
            }
            DeliveryMode::INIT => {
                drop(regs);
                self.init();
                true
            }
            mode => {
                log::warn!(
                    "lapic-{}: {lvt:?} has unsupported delivery mode {mode:?}",
                    self.initial_id
                );
                false
            }
        }
    }

    fn reset_dynamic(&self, regs: &mut LapicRegs) {
        for bitmap in [
            &self.irr,
            &self.isr,
            &self.tmr,
            &self.deferred,
            &self.deferred_level,
        ] {
            bitmap.clear_all();
        }
        self.esr_shadow.store(0, Ordering::Release);
        regs.init();
        self.timers.disarm(self.timer_id);
    }

    /// Handles INIT: the dynamic state is reset, the ID survives.
    pub fn init(&self) {
        let mut regs = self.regs.lock();
        self.reset_dynamic(&mut regs);
        self.update_intr(&regs);
        self.events.raise(CpuEvent::INIT);
    }

    /// Returns to the power-on state.
    pub fn reset(&self) {
        let mut regs = self.regs.lock();
        self.reset_dynamic(&mut regs);
        *regs = LapicRegs::power_on(self.initial_id);
        self.update_intr(&regs);
    }

    /// Called by the CPU core to acknowledge the interrupt it was signaled.
    pub fn request_vector_on_inta(&self) -> InterruptAck {
        let mut regs = self.regs.lock();
        let ack = if let Some(ds) = regs.lvtds.iter_mut().find(|ds| **ds) {
            *ds = false;
            InterruptAck::ExtInt
        } else if !regs.base.enabled() {
            InterruptAck::ExtInt
        } else {
            let ppr = self.ppr(regs.tpr);
            match self.irr.highest() {
                Some(vector) if vector & 0xf0 > ppr & 0xf0 => {
                    self.irr.clear(vector);
                    self.isr.set(vector);
                    InterruptAck::Vector(vector)
                }
                _ => InterruptAck::Spurious(regs.svr.vector()),
            }
        };
        self.update_intr(&regs);
        ack
    }

    /// Retires the highest in-service vector.
    pub fn eoi(&self) {
        let mut regs = self.regs.lock();
        let Some(vector) = self.isr.highest() else {
            return;
        };
        self.isr.clear(vector);
        let level = self.tmr.test(vector);
        if self.deferred.clear(vector) {
            self.tmr.assign(vector, self.deferred_level.test(vector));
            self.irr.set(vector);
        }
        for lvt in [Lvt::Lint0, Lvt::Lint1] {
            let index = lvt.index();
            if regs.rirr[index] && regs.lvt[index].vector() == vector {
                regs.rirr[index] = false;
            }
        }
        let broadcast = level && !regs.svr.suppress_eoi_broadcast();
        let timer = regs.timer().vector() == vector;
        self.update_intr(&regs);
        drop(regs);

        if broadcast {
            let mut msg = MemMessage::write(IOAPIC_EOI, vector as u32);
            self.bus.mem.send(&mut msg);
        }
        if timer {
            self.update_timer();
        }
    }

    fn deliver(&self, icr: IcrLo) -> bool {
        match icr.delivery_mode() {
            DeliveryMode::FIXED | DeliveryMode::LOW_PRIORITY => {
                self.accept_vector(icr.vector(), icr.trigger_mode(), icr.level())
            }
            DeliveryMode::SMI => {
                self.events.raise(CpuEvent::SMI);
                true
            }
            DeliveryMode::NMI => {
                self.events.raise(CpuEvent::NMI);
                true
            }
            DeliveryMode::INIT => {
                self.init();
                true
            }
            DeliveryMode::STARTUP_IPI => {
                self.events.raise_sipi(icr.vector());
                true
            }
            mode => {
                log::warn!("lapic-{}: dropped {mode:?} message", self.initial_id);
                false
            }
        }
    }

    fn send_error(icr: IcrLo, x2apic: bool) -> ErrorStatus {
        let mode = icr.delivery_mode();
        let shorthand = icr.shorthand();
        let mut error = match mode {
            DeliveryMode::FIXED => ErrorStatus::empty(),
            _ if matches!(
                shorthand,
                DestShorthand::SELF | DestShorthand::ALL_INCLUDING_SELF
            ) =>
            {
                ErrorStatus::SEND_ACCEPT
            }
            DeliveryMode::LOW_PRIORITY if shorthand == DestShorthand::ALL_EXCLUDING_SELF => {
                ErrorStatus::SEND_ACCEPT
            }
            DeliveryMode::LOW_PRIORITY if x2apic => {
                ErrorStatus::SEND_ACCEPT | ErrorStatus::REDIRECTABLE_IPI
            }
            DeliveryMode::INIT if !icr.level() => ErrorStatus::SEND_ACCEPT,
            DeliveryMode::REMOTE_READ | DeliveryMode::EXTINT => ErrorStatus::SEND_ACCEPT,
            _ => ErrorStatus::empty(),
        };
        if matches!(mode, DeliveryMode::FIXED | DeliveryMode::LOW_PRIORITY)
            && icr.vector() < MIN_VECTOR
        {
            error |= ErrorStatus::SEND_ILLEGAL_VECTOR;
        }
        error
    }

    /// Sends the IPI described by `icr` to `dst`.
    ///
    /// An IPI the local APIC refuses to send records the reason in ESR and
    /// has no other effect.
    pub fn deliver_ipi(&self, mut icr: IcrLo, dst: u32) -> bool {
        let x2apic = self.regs.lock().base.is_x2apic();
        let error = Self::send_error(icr, x2apic);
        if !error.is_empty() {
            log::debug!("lapic-{}: refused to send {icr:x?}", self.initial_id);
            self.set_error(error);
            return false;
        }
        icr.set_delivery_status(false);
        let shorthand = icr.shorthand();
        match shorthand {
            DestShorthand::SELF => {
                self.deliver(icr);
            }
            DestShorthand::ALL_INCLUDING_SELF | DestShorthand::ALL_EXCLUDING_SELF => {
                icr.set_dest_mode(false);
                let exclude = (shorthand == DestShorthand::ALL_EXCLUDING_SELF)
                    .then_some(self.initial_id);
                let mut msg = ApicMessage {
                    icr,
                    dst: X2APIC_BROADCAST,
                    exclude,
                };
                self.bus.apic.send(&mut msg);
            }
            _ => {
                let mut msg = ApicMessage {
                    icr,
                    dst,
                    exclude: None,
                };
                if icr.delivery_mode() == DeliveryMode::LOW_PRIORITY {
                    msg.icr.set_delivery_mode(DeliveryMode::FIXED);
                    let start = self.lowest_rr.load(Ordering::Relaxed);
                    if let Some(index) = self.bus.apic.send_rr(&mut msg, start) {
                        self.lowest_rr.store(index + 1, Ordering::Relaxed);
                    }
                } else if !self.bus.apic.send(&mut msg) {
                    log::debug!("lapic-{}: no target for {dst:#x}", self.initial_id);
                }
            }
        }
        true
    }

    fn matches(&self, regs: &LapicRegs, msg: &ApicMessage) -> bool {
        if msg.exclude == Some(self.initial_id) || !regs.base.enabled() {
            return false;
        }
        let x2apic = regs.base.x2apic();
        if !msg.icr.dest_mode() {
            if x2apic {
                msg.dst == X2APIC_BROADCAST || msg.dst == regs.id
            } else {
                let dst = msg.dst & 0xff;
                dst == XAPIC_BROADCAST || dst == regs.id >> 24
            }
        } else if x2apic {
            msg.dst == X2APIC_BROADCAST
                || (msg.dst >> 16 == regs.ldr >> 16 && msg.dst & regs.ldr & 0xffff != 0)
        } else {
            let dst = msg.dst & 0xff;
            let ldr = regs.ldr >> 24;
            if dst == XAPIC_BROADCAST {
                true
            } else if regs.dfr >> 28 == DFR_FLAT {
                ldr & dst != 0
            } else {
                dst >> 4 == ldr >> 4 && dst & ldr & 0xf != 0
            }
        }
    }

    fn timer_shift(&self, regs: &LapicRegs) -> u32 {
        self.clock_shift + regs.dcr_shift as u32
    }

    fn current_count(&self, regs: &LapicRegs, now: u64) -> u32 {
        let Some(start) = regs.timer_start else {
            return 0;
        };
        let ict = regs.ict as u64;
        let elapsed = regs.timer_done + (now.saturating_sub(start) >> self.timer_shift(regs));
        if elapsed < ict {
            (ict - elapsed) as u32
        } else if regs.timer().periodic() {
            (ict - elapsed % ict) as u32
        } else {
            0
        }
    }

    /// Fires the timer if it has expired and requests the next deadline.
    ///
    /// A periodic timer keeps its phase: the anchor moves forward by whole
    /// periods, so late callbacks never accumulate drift.
    pub fn update_timer(&self) {
        let mut regs = self.regs.lock();
        let Some(start) = regs.timer_start else {
            self.timers.disarm(self.timer_id);
            return;
        };
        let shift = self.timer_shift(&regs);
        let ict = regs.ict as u64;
        let done = regs.timer_done;
        let elapsed = done + (self.clock.now().saturating_sub(start) >> shift);
        if elapsed < ict {
            self.timers.arm(self.timer_id, start + ((ict - done) << shift));
            return;
        }
        if regs.timer().periodic() {
            let periods = elapsed - elapsed % ict;
            let start = start + ((periods - done) << shift);
            regs.timer_start = Some(start);
            regs.timer_done = 0;
            self.timers.arm(self.timer_id, start + (ict << shift));
        } else {
            regs.timer_start = None;
            self.timers.disarm(self.timer_id);
        }
        drop(regs);
        log::trace!("lapic-{}: timer expired", self.initial_id);
        self.trigger_lvt(Lvt::Timer);
    }

    /// Reads the register at `index` (MMIO offset / 16). Returns `None` if
    /// the register does not exist or is not readable in the current mode.
    pub fn read_register(&self, index: u16) -> Option<u32> {
        let (desc, offset) = lapic::lookup(index)?;
        if desc.reg == Reg::TimerCurrent {
            self.update_timer();
        }
        let regs = self.regs.lock();
        if !desc.access.readable(regs.base.is_x2apic()) {
            return None;
        }
        let offset = offset as usize;
        let value = match desc.reg {
            Reg::Id => regs.id,
            Reg::Version => desc.reset,
            Reg::Tpr => regs.tpr,
            Reg::Ppr => self.ppr(regs.tpr) as u32,
            Reg::Ldr => regs.ldr,
            Reg::Dfr => regs.dfr,
            Reg::Svr => regs.svr.0,
            Reg::Isr => self.isr.read_u32(offset),
            Reg::Tmr => self.tmr.read_u32(offset),
            Reg::Irr => self.irr.read_u32(offset),
            Reg::Esr => regs.esr,
            Reg::Icr => regs.icr,
            Reg::Icr2 => regs.icr2,
            Reg::Lvt(lvt) => {
                let index = lvt.index();
                regs.lvt[index].0 | (regs.lvtds[index] as u32) << 12 | (regs.rirr[index] as u32) << 14
            }
            Reg::TimerInitial => regs.ict,
            Reg::TimerCurrent => self.current_count(&regs, self.clock.now()),
            Reg::TimerDivide => regs.dcr,
            Reg::Apr | Reg::Rrd | Reg::Eoi | Reg::SelfIpi => 0,
        };
        Some(value)
    }

    /// Writes the register at `index`.
    ///
    /// With `strict`, as for x2APIC MSRs, a write to a register that is not
    /// writable or that sets reserved bits is refused and recorded as an
    /// illegal register access. Otherwise reserved bits are dropped.
    pub fn write_register(&self, index: u16, value: u32, strict: bool) -> bool {
        self.write_reg(index, value, None, strict)
    }

    fn write_reg(&self, index: u16, value: u32, icr_dst: Option<u32>, strict: bool) -> bool {
        let Some((desc, _)) = lapic::lookup(index) else {
            self.set_error(ErrorStatus::ILLEGAL_REGISTER);
            return false;
        };
        if desc.reg == Reg::TimerDivide {
            self.update_timer();
        }
        let mut regs = self.regs.lock();
        let x2apic = regs.base.is_x2apic();
        if !desc.access.writable(x2apic) || (strict && value & desc.reserved() != 0) {
            drop(regs);
            if strict {
                self.set_error(ErrorStatus::ILLEGAL_REGISTER);
            } else {
                log::debug!("lapic-{}: ignored write to {}", self.initial_id, desc.name);
            }
            return false;
        }
        let value = value & desc.writable;
        let mut followup = Followup::None;
        match desc.reg {
            Reg::Id => regs.id = value,
            Reg::Tpr => {
                regs.tpr = value;
                self.update_intr(&regs);
            }
            Reg::Eoi => followup = Followup::Eoi,
            Reg::Ldr => regs.ldr = value,
            Reg::Dfr => regs.dfr = value | !desc.writable,
            Reg::Svr => {
                regs.svr = SpuriousReg(value);
                if !regs.svr.enabled() {
                    regs.software_disable();
                }
                self.update_intr(&regs);
            }
            Reg::Esr => regs.esr = self.esr_shadow.swap(0, Ordering::AcqRel),
            Reg::Icr => {
                regs.icr = value;
                if let Some(dst) = icr_dst {
                    regs.icr2 = dst;
                }
                let dst = if x2apic {
                    regs.icr2
                } else {
                    xapic_dst(regs.icr2)
                };
                followup = Followup::Ipi(IcrLo(value), dst);
            }
            Reg::Icr2 => regs.icr2 = value,
            Reg::Lvt(lvt) => {
                let mut entry = LvtReg(value);
                if !regs.svr.enabled() {
                    entry.set_masked(true);
                }
                regs.lvt[lvt.index()] = entry;
                self.update_intr(&regs);
            }
            Reg::TimerInitial => {
                regs.ict = value;
                regs.timer_start = (value != 0).then(|| self.clock.now());
                regs.timer_done = 0;
                followup = Followup::Timer;
            }
            Reg::TimerDivide => {
                let now = self.clock.now();
                let count = self.current_count(&regs, now);
                regs.dcr = value;
                regs.dcr_shift = lapic::dcr_shift(value);
                if regs.timer_start.is_some() && count != 0 {
                    regs.timer_start = Some(now);
                    regs.timer_done = (regs.ict - count) as u64;
                }
                followup = Followup::Timer;
            }
            Reg::SelfIpi => {
                let mut icr = IcrLo(0);
                icr.set_vector(value as u8);
                icr.set_shorthand(DestShorthand::SELF);
                followup = Followup::Ipi(icr, 0);
            }
            Reg::Version
            | Reg::Apr
            | Reg::Ppr
            | Reg::Rrd
            | Reg::Isr
            | Reg::Tmr
            | Reg::Irr
            | Reg::TimerCurrent => {}
        }
        drop(regs);

        match followup {
            Followup::None => true,
            Followup::Eoi => {
                self.eoi();
                true
            }
            Followup::Ipi(icr, dst) => self.deliver_ipi(icr, dst),
            Followup::Timer => {
                self.update_timer();
                true
            }
        }
    }

    /// Writes the APIC base MSR.
    ///
    /// Refused: reserved bits, x2APIC without the global enable, leaving
    /// x2APIC for xAPIC and entering x2APIC from the disabled state.
    pub fn set_base(&self, value: u64) -> bool {
        let new = ApicBase(value);
        let mut regs = self.regs.lock();
        let old = regs.base;
        let valid = value & !ApicBase::VALID == 0
            && (new.enabled() || !new.x2apic())
            && !(old.is_x2apic() && new.enabled() && !new.x2apic())
            && !(!old.enabled() && new.is_x2apic());
        if !valid {
            drop(regs);
            log::warn!(
                "lapic-{}: invalid APIC base {value:#x}, current {:#x}",
                self.initial_id,
                old.0
            );
            self.set_error(ErrorStatus::ILLEGAL_REGISTER);
            return false;
        }
        if old.enabled() && !new.enabled() {
            // Back to the power-on state, including the xAPIC LDR.
            regs.base = new;
            self.reset_dynamic(&mut regs);
        }
        if !old.enabled() && new.enabled() {
            regs.id = self.initial_id << 24;
        }
        if !old.is_x2apic() && new.is_x2apic() {
            regs.id = self.initial_id;
            regs.icr2 = 0;
            regs.ldr = x2apic_ldr(self.initial_id);
        }
        regs.base = new;
        self.update_intr(&regs);
        true
    }

    fn x2apic_index(&self, msr: u32) -> Option<u16> {
        if !(MSR_X2APIC_FIRST..=MSR_X2APIC_LAST).contains(&msr) {
            return None;
        }
        if !self.regs.lock().base.is_x2apic() {
            return None;
        }
        Some((msr - MSR_X2APIC_FIRST) as u16)
    }

    /// Reads an MSR. `None` means the access faults.
    pub fn rdmsr(&self, msr: u32) -> Option<u64> {
        if msr == MSR_APIC_BASE {
            return Some(self.regs.lock().base.0);
        }
        let index = self.x2apic_index(msr)?;
        if index == X2APIC_ICR {
            let regs = self.regs.lock();
            return Some(regs.icr as u64 | (regs.icr2 as u64) << 32);
        }
        let value = self.read_register(index);
        if value.is_none() {
            self.set_error(ErrorStatus::ILLEGAL_REGISTER);
        }
        value.map(u64::from)
    }

    /// Writes an MSR. `false` means the access faults.
    pub fn wrmsr(&self, msr: u32, value: u64) -> bool {
        if msr == MSR_APIC_BASE {
            return self.set_base(value);
        }
        let Some(index) = self.x2apic_index(msr) else {
            return false;
        };
        let (lo, hi) = (value as u32, (value >> 32) as u32);
        if index == X2APIC_ICR {
            return self.write_reg(index, lo, Some(hi), true);
        }
        if hi != 0 {
            self.set_error(ErrorStatus::ILLEGAL_REGISTER);
            return false;
        }
        self.write_reg(index, lo, None, true)
    }

    pub fn handle_msr(&self, write: bool, msr: u32, value: &mut u64) -> bool {
        if write {
            return self.wrmsr(msr, *value);
        }
        match self.rdmsr(msr) {
            Some(val) => {
                *value = val;
                true
            }
            None => false,
        }
    }

    /// Decodes `addr` in the xAPIC page. `Some(None)` is a claimed access
    /// that does not hit a register slot.
    fn mmio_index(&self, addr: u64, size: u8) -> Option<Option<u16>> {
        let base = self.regs.lock().base;
        if !base.enabled() || base.x2apic() || !in_range(addr, base.addr(), APIC_PAGE_SIZE) {
            return None;
        }
        let offset = addr - base.addr();
        if size != 4 || offset & 0xf != 0 {
            log::warn!(
                "lapic-{}: unsupported access at {offset:#x}, size {size}",
                self.initial_id
            );
            return Some(None);
        }
        Some(Some((offset >> 4) as u16))
    }

    /// Reads the xAPIC page. `None` if `addr` is not decoded by this APIC.
    pub fn mmio_read(&self, addr: u64, size: u8) -> Option<u32> {
        let Some(index) = self.mmio_index(addr, size)? else {
            return Some(0);
        };
        match self.read_register(index) {
            Some(value) => Some(value),
            None => {
                if lapic::lookup(index).is_none() {
                    self.set_error(ErrorStatus::ILLEGAL_REGISTER);
                }
                Some(0)
            }
        }
    }

    /// Writes the xAPIC page. Returns false if `addr` is not decoded by
    /// this APIC.
    pub fn mmio_write(&self, addr: u64, size: u8, value: u32) -> bool {
        let Some(index) = self.mmio_index(addr, size) else {
            return false;
        };
        if let Some(index) = index {
            self.write_register(index, value, false);
        }
        true
    }

    /// Accesses the xAPIC page at `offset` from the current base.
    pub fn handle_mmio(&self, offset: u64, write: bool, value: &mut u32) -> bool {
        let addr = self.base().addr() + offset;
        if write {
            return self.mmio_write(addr, 4, *value);
        }
        match self.mmio_read(addr, 4) {
            Some(val) => {
                *value = val;
                true
            }
            None => false,
        }
    }
}

impl InterruptSink<ApicMessage> for Lapic {
    fn receive(&self, msg: &mut ApicMessage) -> bool {
        let matched = self.matches(&self.regs.lock(), msg);
        matched && self.deliver(msg.icr)
    }
}

impl InterruptSink<LegacyMessage> for Lapic {
    fn receive(&self, msg: &mut LegacyMessage) -> bool {
        match msg.kind {
            LegacyKind::Intr => {
                let mut regs = self.regs.lock();
                if regs.base.enabled() {
                    drop(regs);
                    return self.trigger_lvt(Lvt::Lint0);
                }
                // Without a local APIC the PIC drives INTR of the boot CPU
                // directly.
                if !regs.base.bsp() {
                    return false;
                }
                regs.lvtds[Lvt::Lint0.index()] = true;
                self.update_intr(&regs);
                true
            }
            LegacyKind::DeassertIntr => {
                let mut regs = self.regs.lock();
                regs.lvtds[Lvt::Lint0.index()] = false;
                self.update_intr(&regs);
                true
            }
            LegacyKind::Nmi => {
                if self.base().enabled() {
                    self.trigger_lvt(Lvt::Lint1)
                } else {
                    self.events.raise(CpuEvent::NMI);
                    true
                }
            }
            LegacyKind::Init => {
                self.init();
                true
            }
            LegacyKind::Reset => {
                self.reset();
                true
            }
            LegacyKind::Inta => false,
        }
    }
}

impl InterruptSink<TimeoutMessage> for Lapic {
    fn receive(&self, msg: &mut TimeoutMessage) -> bool {
        if msg.timer != self.timer_id {
            return false;
        }
        self.update_timer();
        true
    }
}

#[cfg(test)]
#[path = "lapic_test.rs"]
mod tests;
