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

use std::sync::Arc;

use assert_matches::assert_matches;
use rstest::rstest;

use crate::arch::ioapic::IOAPIC_BASE;
use crate::bus::message::IrqKind;
use crate::timer::ManualClock;
use crate::vcpu::CpuEvent;

use super::{Board, BoardConfig, Error};

const APIC_MMIO: u64 = 0xfee0_0000;
const FREQ: u64 = 100_000_000;

fn new_board(config: BoardConfig) -> (Board, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(FREQ));
    let board = Board::new(config, clock.clone()).unwrap();
    (board, clock)
}

fn init_pics(board: &Board) {
    for (port, value) in [
        (0x20, 0x11),
        (0x21, 0x20),
        (0x21, 0x04),
        (0x21, 0x01),
        (0xa0, 0x11),
        (0xa1, 0x28),
        (0xa1, 0x02),
        (0xa1, 0x01),
        (0x21, 0x00),
        (0xa1, 0x00),
    ] {
        board.io_write(port, value);
    }
}

fn program_pin(board: &Board, pin: u32, lo: u32, hi: u32) {
    board.mem_write(IOAPIC_BASE, 0x10 + 2 * pin);
    board.mem_write(IOAPIC_BASE + 0x10, lo);
    board.mem_write(IOAPIC_BASE, 0x11 + 2 * pin);
    board.mem_write(IOAPIC_BASE + 0x10, hi);
}

fn read_pin(board: &Board, pin: u32) -> u32 {
    board.mem_write(IOAPIC_BASE, 0x10 + 2 * pin);
    board.mem_read(IOAPIC_BASE + 0x10)
}

#[test]
fn test_config_parse() {
    let config: BoardConfig = serde_aco::from_arg("num_cpu=4,pic=off").unwrap();
    assert_eq!(
        config,
        BoardConfig {
            num_cpu: 4,
            num_ioapic: 1,
            pic: false,
            virtual_wire: true,
        }
    );
}

#[rstest]
#[case(0, 1)]
#[case(256, 1)]
#[case(1, 0)]
#[case(1, 9)]
fn test_invalid_config(#[case] num_cpu: u32, #[case] num_ioapic: u32) {
    let config = BoardConfig {
        num_cpu,
        num_ioapic,
        ..Default::default()
    };
    let clock = Arc::new(ManualClock::new(FREQ));
    let ret = Board::new(config, clock);
    match (num_cpu, num_ioapic) {
        (0, _) => assert_matches!(ret, Err(Error::NoCpu { .. })),
        (256, _) => assert_matches!(ret, Err(Error::TooManyCpus { num_cpu: 256, .. })),
        (_, n) => assert_matches!(ret, Err(Error::InvalidIoapicCount { num_ioapic, .. }) if num_ioapic == n),
    }
}

#[rstest]
#[case(true, 0x1ff)]
#[case(false, 0xff)]
fn test_reset_state(#[case] virtual_wire: bool, #[case] svr: u32) {
    let (board, _) = new_board(BoardConfig {
        num_cpu: 2,
        virtual_wire,
        ..Default::default()
    });
    assert_eq!(board.vcpus().len(), 2);
    assert_eq!(board.vcpu(0).unwrap().rdmsr(0x1b), Some(0xfee0_0900));
    assert_eq!(board.vcpu(1).unwrap().rdmsr(0x1b), Some(0xfee0_0800));
    assert_eq!(board.vcpu(0).unwrap().mmio_read(APIC_MMIO + 0xf0), svr);
    assert_eq!(board.vcpu(1).unwrap().mmio_read(APIC_MMIO + 0xf0), 0xff);
    assert_eq!(board.pics().len(), 2);
    assert_eq!(board.ioapic(0).unwrap().gsibase(), 0);
    assert!(board.ioapic(1).is_none());
    assert_eq!(board.next_deadline(), None);
}

#[test]
fn test_unclaimed() {
    let (board, _) = new_board(BoardConfig {
        pic: false,
        ..Default::default()
    });
    assert!(board.pics().is_empty());
    assert_eq!(board.io_read(0x21), 0xff);
    assert_eq!(board.mem_read(0xd000_0000), u32::MAX);
    assert!(!board.mem_write(0xd000_0000, 1));
    assert!(!board.raise_irq(24, IrqKind::Assert));
}

#[test]
fn test_pic_virtual_wire() {
    let (board, _) = new_board(BoardConfig::default());
    init_pics(&board);
    let bsp = board.vcpu(0).unwrap();

    assert!(board.raise_irq(1, IrqKind::Assert));
    assert!(bsp.events().pending().contains(CpuEvent::INTR));
    assert_eq!(bsp.acknowledge(), Some(0x21));
    board.io_write(0x20, 0x0b);
    assert_eq!(board.io_read(0x20), 0x02);

    // Blocked by IRQ 1 in service until the EOI.
    board.raise_irq(12, IrqKind::Assert);
    assert!(!bsp.events().pending().contains(CpuEvent::INTR));
    board.io_write(0x20, 0x20);
    assert!(bsp.events().pending().contains(CpuEvent::INTR));
    assert_eq!(bsp.acknowledge(), Some(0x2c));
}

#[test]
fn test_ioapic_route() {
    let (board, _) = new_board(BoardConfig {
        num_cpu: 2,
        pic: false,
        ..Default::default()
    });
    let ap = board.vcpu(1).unwrap();
    ap.mmio_write(APIC_MMIO + 0xf0, 0x1ff);

    program_pin(&board, 5, 0x35, 0x0100_0000);
    assert!(board.raise_irq(5, IrqKind::Assert));
    assert_eq!(ap.acknowledge(), Some(0x35));
    assert!(!board.vcpu(0).unwrap().events().pending().contains(CpuEvent::INTR));
    ap.mmio_write(APIC_MMIO + 0xb0, 0);

    program_pin(&board, 6, 0x8036, 0x0100_0000);
    board.raise_irq(6, IrqKind::AssertNotify);
    assert_eq!(read_pin(&board, 6), 0xc036);
    assert_eq!(ap.acknowledge(), Some(0x36));
    ap.mmio_write(APIC_MMIO + 0xb0, 0);
    assert_eq!(read_pin(&board, 6), 0x8036);
}

#[test]
fn test_second_ioapic() {
    let (board, _) = new_board(BoardConfig {
        num_ioapic: 2,
        pic: false,
        ..Default::default()
    });
    let ioapic = board.ioapic(1).unwrap();
    assert_eq!(ioapic.gsibase(), 24);
    let base = ioapic.base();
    board.mem_write(base, 0x10 + 2 * 3);
    board.mem_write(base + 0x10, 0x47);

    assert!(board.raise_irq(27, IrqKind::Assert));
    assert_eq!(board.vcpu(0).unwrap().acknowledge(), Some(0x47));
}

#[test]
fn test_ipi() {
    let (board, _) = new_board(BoardConfig {
        num_cpu: 2,
        pic: false,
        ..Default::default()
    });
    let bsp = board.vcpu(0).unwrap();
    let ap = board.vcpu(1).unwrap();
    ap.mmio_write(APIC_MMIO + 0xf0, 0x1ff);

    bsp.mmio_write(APIC_MMIO + 0x310, 0x0100_0000);
    bsp.mmio_write(APIC_MMIO + 0x300, 0x4041);
    assert_eq!(ap.acknowledge(), Some(0x41));

    bsp.mmio_write(APIC_MMIO + 0x300, 0x4500);
    assert_eq!(ap.events().take(CpuEvent::INIT), CpuEvent::INIT);
    bsp.mmio_write(APIC_MMIO + 0x300, 0x4608);
    assert_eq!(ap.events().take(CpuEvent::SIPI), CpuEvent::SIPI);
    assert_eq!(ap.events().sipi_vector(), 0x08);
}

#[test]
fn test_timer() {
    let (board, clock) = new_board(BoardConfig::default());
    let bsp = board.vcpu(0).unwrap();
    bsp.mmio_write(APIC_MMIO + 0x3e0, 0xb);
    bsp.mmio_write(APIC_MMIO + 0x320, 0x30);
    bsp.mmio_write(APIC_MMIO + 0x380, 1000);
    assert_eq!(board.next_deadline(), Some(1000));

    clock.set(999);
    assert_eq!(board.fire_timers(), 0);
    clock.set(1000);
    assert_eq!(board.fire_timers(), 1);
    assert_eq!(bsp.acknowledge(), Some(0x30));
    assert_eq!(board.next_deadline(), None);
}
