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

use std::fmt::{self, Display};
use std::sync::Arc;

use clap::{Args, ValueEnum};
use irqchip::arch::ioapic::{IOAPIC_BASE, IOREDTBL_BASE, IOREGSEL, IOWIN};
use irqchip::arch::lapic::APIC_BASE_DEFAULT;
use irqchip::arch::pic::{MASTER_BASE, OCW2_EOI, SLAVE_BASE};
use irqchip::board::{Board, BoardConfig};
use irqchip::bus::message::IrqKind;
use irqchip::errors::{DebugTrace, trace_error};
use irqchip::timer::{ManualClock, NANOS_PER_SEC};
use irqchip::vcpu::{CpuEvent, Vcpu};
use serde_aco::help_text;
use snafu::{ResultExt, Snafu};

const REG_EOI: u64 = 0xb0;
const REG_SVR: u64 = 0xf0;
const REG_ICR: u64 = 0x300;
const REG_ICR2: u64 = 0x310;
const REG_LVT_TIMER: u64 = 0x320;
const REG_LVT_LINT0: u64 = 0x350;
const REG_TIMER_ICR: u64 = 0x380;
const REG_TIMER_DCR: u64 = 0x3e0;

const IPI_VECTOR: u8 = 0x40;
const IOAPIC_VECTOR: u8 = 0x50;
const TIMER_VECTOR: u8 = 0x30;
const FIRST_PCI_GSI: u32 = 16;
/// One millisecond with the timer divider set to 1.
const TIMER_COUNT: u32 = 125_000;

#[trace_error]
#[derive(Snafu, DebugTrace)]
#[snafu(module, context(suffix(false)))]
pub enum Error {
    #[snafu(display("Failed to parse {arg}"))]
    ParseArg {
        arg: String,
        error: serde_aco::Error,
    },
    #[snafu(display("Failed to create a board"))]
    CreateBoard { source: irqchip::board::Error },
    #[snafu(display("Scenario {scenario:?} needs {device}"))]
    MissingDevice {
        scenario: Scenario,
        device: &'static str,
    },
    #[snafu(display("{origin} was not delivered to CPU {cpu}"))]
    Undelivered { cpu: u32, origin: Origin },
    #[snafu(display("No timer is armed"))]
    NoTimer,
}

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Scenario {
    /// Fixed IPIs from the BSP to every CPU in turn.
    #[default]
    Ipi,
    /// Edge-triggered ISA interrupts through the cascaded 8259 PICs.
    Pic,
    /// Level-triggered PCI interrupts routed by the I/O APIC.
    Ioapic,
    /// Periodic local APIC timer of the BSP.
    Timer,
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    #[arg(short, long, help(
        help_text::<BoardConfig>("Configure the interrupt controllers.")
    ), value_name = "CONFIG")]
    board: Option<String>,

    /// Interrupt traffic to generate.
    #[arg(short, long, value_enum, default_value_t)]
    scenario: Scenario,

    /// Number of interrupts to deliver.
    #[arg(short('n'), long, default_value_t = 4)]
    count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Ipi,
    Pic { irq: u8 },
    IoApic { gsi: u32 },
    /// Clock reading in nanoseconds.
    Timer { now: u64 },
}

impl Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Ipi => write!(f, "IPI"),
            Origin::Pic { irq } => write!(f, "IRQ {irq}"),
            Origin::IoApic { gsi } => write!(f, "GSI {gsi}"),
            Origin::Timer { now } => write!(f, "timer at {now}ns"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub cpu: u32,
    pub vector: u8,
    pub origin: Origin,
}

impl Display for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cpu {}: vector {:#04x} from {}",
            self.cpu, self.vector, self.origin
        )
    }
}

fn acknowledge(vcpu: &Vcpu, origin: Origin) -> Result<Delivery> {
    let cpu = vcpu.index();
    if !vcpu.events().pending().contains(CpuEvent::INTR) {
        return error::Undelivered { cpu, origin }.fail();
    }
    let Some(vector) = vcpu.acknowledge() else {
        return error::Undelivered { cpu, origin }.fail();
    };
    let delivery = Delivery {
        cpu,
        vector,
        origin,
    };
    log::info!("{delivery}");
    Ok(delivery)
}

fn lapic_write(vcpu: &Vcpu, reg: u64, value: u32) {
    vcpu.mmio_write(APIC_BASE_DEFAULT + reg, value);
}

fn enable_all(board: &Board) {
    for vcpu in board.vcpus() {
        lapic_write(vcpu, REG_SVR, 0x1ff);
    }
}

fn run_ipi(board: &Board, count: u32) -> Result<Vec<Delivery>> {
    enable_all(board);
    let bsp = board.bsp();
    let mut deliveries = vec![];
    for i in 0..count {
        let target = i % board.vcpus().len() as u32;
        let vector = IPI_VECTOR + (i % 0x40) as u8;
        lapic_write(bsp, REG_ICR2, target << 24);
        lapic_write(bsp, REG_ICR, 0x4000 | vector as u32);
        let vcpu = &board.vcpus()[target as usize];
        deliveries.push(acknowledge(vcpu, Origin::Ipi)?);
        lapic_write(vcpu, REG_EOI, 0);
    }
    Ok(deliveries)
}

fn run_pic(board: &Board, count: u32) -> Result<Vec<Delivery>> {
    if board.pics().is_empty() {
        return error::MissingDevice {
            scenario: Scenario::Pic,
            device: "8259 PICs",
        }
        .fail();
    }
    for (port, value) in [
        (MASTER_BASE, 0x11),
        (MASTER_BASE + 1, 0x20),
        (MASTER_BASE + 1, 0x04),
        (MASTER_BASE + 1, 0x01),
        (SLAVE_BASE, 0x11),
        (SLAVE_BASE + 1, 0x28),
        (SLAVE_BASE + 1, 0x02),
        (SLAVE_BASE + 1, 0x01),
        (MASTER_BASE + 1, 0x00),
        (SLAVE_BASE + 1, 0x00),
    ] {
        board.io_write(port, value);
    }
    let bsp = board.bsp();
    lapic_write(bsp, REG_SVR, 0x1ff);
    lapic_write(bsp, REG_LVT_LINT0, 0x700);

    // Line 2 carries the slave.
    let irqs = (0..16u8).filter(|irq| *irq != 2).cycle();
    let mut deliveries = vec![];
    for irq in irqs.take(count as usize) {
        board.raise_irq(irq as u32, IrqKind::Assert);
        deliveries.push(acknowledge(bsp, Origin::Pic { irq })?);
        if irq >= 8 {
            board.io_write(SLAVE_BASE, OCW2_EOI);
        }
        board.io_write(MASTER_BASE, OCW2_EOI);
        board.raise_irq(irq as u32, IrqKind::Deassert);
    }
    Ok(deliveries)
}

fn ioapic_write(board: &Board, index: u32, value: u32) {
    board.mem_write(IOAPIC_BASE + IOREGSEL, index);
    board.mem_write(IOAPIC_BASE + IOWIN, value);
}

fn run_ioapic(board: &Board, count: u32) -> Result<Vec<Delivery>> {
    enable_all(board);
    let num_cpu = board.vcpus().len() as u32;
    let mut deliveries = vec![];
    for i in 0..count {
        let gsi = FIRST_PCI_GSI + i % 8;
        let cpu = i % num_cpu;
        let vector = IOAPIC_VECTOR + (i % 0x40) as u8;
        let index = IOREDTBL_BASE as u32 + 2 * gsi;
        ioapic_write(board, index, 0x8000 | vector as u32);
        ioapic_write(board, index + 1, cpu << 24);

        board.raise_irq(gsi, IrqKind::AssertNotify);
        let vcpu = &board.vcpus()[cpu as usize];
        deliveries.push(acknowledge(vcpu, Origin::IoApic { gsi })?);
        lapic_write(vcpu, REG_EOI, 0);
        board.raise_irq(gsi, IrqKind::Deassert);
    }
    Ok(deliveries)
}

fn run_timer(board: &Board, clock: &ManualClock, count: u32) -> Result<Vec<Delivery>> {
    let bsp = board.bsp();
    lapic_write(bsp, REG_SVR, 0x1ff);
    lapic_write(bsp, REG_TIMER_DCR, 0xb);
    lapic_write(bsp, REG_LVT_TIMER, (1 << 17) | TIMER_VECTOR as u32);
    lapic_write(bsp, REG_TIMER_ICR, TIMER_COUNT);
    let mut deliveries = vec![];
    for _ in 0..count {
        let Some(deadline) = board.next_deadline() else {
            return error::NoTimer.fail();
        };
        clock.set(deadline);
        board.fire_timers();
        deliveries.push(acknowledge(bsp, Origin::Timer { now: deadline })?);
        lapic_write(bsp, REG_EOI, 0);
    }
    Ok(deliveries)
}

pub fn run(args: RunArgs) -> Result<Vec<Delivery>> {
    let config = match args.board {
        Some(arg) => serde_aco::from_arg(&arg).context(error::ParseArg { arg })?,
        None => BoardConfig::default(),
    };
    let clock = Arc::new(ManualClock::new(NANOS_PER_SEC));
    let board = Board::new(config, clock.clone()).context(error::CreateBoard)?;
    log::info!("running {:?} with {} interrupts", args.scenario, args.count);
    match args.scenario {
        Scenario::Ipi => run_ipi(&board, args.count),
        Scenario::Pic => run_pic(&board, args.count),
        Scenario::Ioapic => run_ioapic(&board, args.count),
        Scenario::Timer => run_timer(&board, &clock, args.count),
    }
}

#[cfg(test)]
#[path = "run_test.rs"]
mod tests;
