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

use parking_lot::Mutex;
use rstest::rstest;

use crate::arch::intr::{MSI_ADDR_BASE, MSI_WINDOW_SIZE};
use crate::arch::ioapic::{IOAPIC_BASE, IOAPIC_EOI, IOAPIC_STRIDE, IOEOI};
use crate::bus::message::{IrqKind, IrqMessage, IrqNotify, LegacyKind, LegacyMessage, MemMessage};
use crate::bus::{InterruptSink, SystemBus};
use crate::utils::in_range;

use super::IoApic;

#[derive(Debug, Default)]
struct Recorder {
    msi: Mutex<Vec<(u64, u32)>>,
    notify: Mutex<Vec<IrqNotify>>,
}

impl InterruptSink<MemMessage> for Recorder {
    fn receive(&self, msg: &mut MemMessage) -> bool {
        if !msg.write || !in_range(msg.addr, MSI_ADDR_BASE, MSI_WINDOW_SIZE) {
            return false;
        }
        self.msi.lock().push((msg.addr, msg.value));
        true
    }
}

impl InterruptSink<IrqNotify> for Recorder {
    fn receive(&self, msg: &mut IrqNotify) -> bool {
        self.notify.lock().push(*msg);
        true
    }
}

struct Fixture {
    bus: Arc<SystemBus>,
    recorder: Arc<Recorder>,
    ioapics: [Arc<IoApic>; 2],
}

impl Fixture {
    fn new() -> Self {
        let bus = Arc::new(SystemBus::new());
        let recorder = Arc::new(Recorder::default());
        bus.mem.add(recorder.clone());
        bus.notify.add(recorder.clone());
        let ioapics = [0, 1].map(|n| {
            let ioapic = Arc::new(IoApic::new(
                bus.clone(),
                IOAPIC_BASE + n * IOAPIC_STRIDE,
                24 * n as u32,
            ));
            bus.mem.add(ioapic.clone());
            bus.irq.add(ioapic.clone());
            bus.legacy.add(ioapic.clone());
            ioapic
        });
        Fixture {
            bus,
            recorder,
            ioapics,
        }
    }

    fn write(&self, n: u64, index: u8, value: u32) {
        let base = IOAPIC_BASE + n * IOAPIC_STRIDE;
        assert!(self.bus.mem.send(&mut MemMessage::write(base, index as u32)));
        assert!(self.bus.mem.send(&mut MemMessage::write(base + 0x10, value)));
    }

    fn read(&self, n: u64, index: u8) -> u32 {
        let base = IOAPIC_BASE + n * IOAPIC_STRIDE;
        assert!(self.bus.mem.send(&mut MemMessage::write(base, index as u32)));
        let mut msg = MemMessage::read(base + 0x10);
        assert!(self.bus.mem.send(&mut msg));
        msg.value
    }

    fn program(&self, n: u64, pin: u8, lo: u32, hi: u32) {
        self.write(n, 0x11 + 2 * pin, hi);
        self.write(n, 0x10 + 2 * pin, lo);
    }

    fn raise(&self, line: u32, kind: IrqKind) {
        self.bus.irq.send(&mut IrqMessage::new(line, kind));
    }

    fn take_msi(&self) -> Vec<(u64, u32)> {
        std::mem::take(&mut *self.recorder.msi.lock())
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        self.bus.detach_all();
    }
}

#[test]
fn test_registers() {
    let f = Fixture::new();
    assert_eq!(f.read(0, 0x01), 0x0017_8020);
    assert_eq!(f.read(0, 0x00), 0);
    f.write(0, 0x00, 0x0a00_0000);
    assert_eq!(f.read(0, 0x00), 0x0a00_0000);

    for pin in 0..24 {
        assert_eq!(f.read(0, 0x10 + 2 * pin), 0x1_0000);
        assert_eq!(f.read(0, 0x11 + 2 * pin), 0);
    }
    f.program(0, 23, u32::MAX, u32::MAX);
    assert_eq!(f.read(0, 0x3e), 0x1_afff);
    assert_eq!(f.read(0, 0x3f), 0xffff_0000);
    assert_eq!(f.read(0, 0x40), 0);

    let mut msg = MemMessage::read(IOAPIC_BASE);
    assert!(f.bus.mem.send(&mut msg));
    assert_eq!(msg.value, 0x40);

    // PAR and EOI are write-only.
    assert!(!f.bus.mem.send(&mut MemMessage::read(IOAPIC_BASE + 0x20)));
    assert!(!f.bus.mem.send(&mut MemMessage::read(IOAPIC_BASE + 0x40)));
    assert!(!f.bus.mem.send(&mut MemMessage::write(IOAPIC_BASE + 0x30, 0)));
}

#[test]
fn test_edge_delivery() {
    let f = Fixture::new();
    f.program(0, 1, 0x31, 0x0300_0000);
    f.raise(1, IrqKind::Assert);
    f.raise(1, IrqKind::Assert);
    assert_eq!(f.take_msi(), [(0xfee0_3000, 0x31), (0xfee0_3000, 0x31)]);
    assert_eq!(f.read(0, 0x12), 0x31);

    f.raise(1, IrqKind::Deassert);
    assert!(f.take_msi().is_empty());
}

#[rstest]
#[case(0, 2)]
#[case(2, 0)]
#[case(5, 5)]
#[case(23, 23)]
fn test_legacy_swap(#[case] gsi: u32, #[case] pin: u8) {
    let f = Fixture::new();
    f.program(0, pin, 0x50, 0);
    f.raise(gsi, IrqKind::Assert);
    assert_eq!(f.take_msi(), [(0xfee0_0000, 0x50)]);
}

#[test]
fn test_level_remote_irr() {
    let f = Fixture::new();
    f.program(0, 9, 0x8829, 0x0f00_0000);
    f.raise(9, IrqKind::AssertNotify);
    assert_eq!(f.take_msi(), [(0xfee0_f004, 0xc029)]);
    assert_eq!(f.read(0, 0x22), 0xc829);

    f.raise(9, IrqKind::AssertNotify);
    assert!(f.take_msi().is_empty());

    // Broadcast EOI of another vector does nothing.
    assert!(f.bus.mem.send(&mut MemMessage::write(IOAPIC_EOI, 0x2a)));
    assert_eq!(f.read(0, 0x22), 0xc829);

    assert!(f.bus.mem.send(&mut MemMessage::write(IOAPIC_EOI, 0x29)));
    assert_eq!(f.read(0, 0x22), 0x8829);
    assert_eq!(*f.recorder.notify.lock(), [IrqNotify { base: 8, mask: 0x02 }]);

    f.raise(9, IrqKind::Assert);
    assert_eq!(f.take_msi(), [(0xfee0_f004, 0xc029)]);
    assert!(f.bus.mem.send(&mut MemMessage::write(IOAPIC_BASE + 0x40, 0x29)));
    assert_eq!(f.recorder.notify.lock().len(), 1);
}

#[test]
fn test_notify_reverse_routing() {
    let f = Fixture::new();
    f.program(0, 2, 0x8030, 0);
    f.raise(0, IrqKind::AssertNotify);
    assert_eq!(f.take_msi(), [(0xfee0_0000, 0xc030)]);
    f.ioapics[0].eoi(0x30);
    assert_eq!(*f.recorder.notify.lock(), [IrqNotify { base: 0, mask: 0x01 }]);
}

#[test]
fn test_masked_level_pin() {
    let f = Fixture::new();
    f.program(0, 10, 0x1_8033, 0);
    f.raise(10, IrqKind::Assert);
    assert!(f.take_msi().is_empty());
    assert_eq!(f.read(0, 0x24), 0x1_9033);

    f.write(0, 0x24, 0x8033);
    assert_eq!(f.take_msi(), [(0xfee0_0000, 0xc033)]);
    assert_eq!(f.read(0, 0x24), 0xc033);
}

#[test]
fn test_masked_pin_released() {
    let f = Fixture::new();
    f.program(0, 10, 0x1_8033, 0);
    f.raise(10, IrqKind::Assert);
    f.raise(10, IrqKind::Deassert);
    assert_eq!(f.read(0, 0x24), 0x1_8033);
    f.write(0, 0x24, 0x8033);
    assert!(f.take_msi().is_empty());

    // A masked edge pin is simply lost.
    f.program(0, 11, 0x1_0034, 0);
    f.raise(11, IrqKind::Assert);
    f.write(0, 0x26, 0x34);
    assert!(f.take_msi().is_empty());
    assert_eq!(f.read(0, 0x26), 0x34);
}

#[test]
fn test_masked_pin_reprogrammed_edge() {
    let f = Fixture::new();
    f.program(0, 12, 0x1_8035, 0);
    f.raise(12, IrqKind::Assert);
    f.write(0, 0x28, 0x35);
    assert!(f.take_msi().is_empty());
    assert_eq!(f.read(0, 0x28), 0x35);
}

#[test]
fn test_lowest_priority_hint() {
    let f = Fixture::new();
    f.program(0, 4, 0x0941, 0x0300_0000);
    f.raise(4, IrqKind::Assert);
    assert_eq!(f.take_msi(), [(0xfee0_300c, 0x0141)]);
}

#[test]
fn test_pin_assertion_register() {
    let f = Fixture::new();
    f.program(0, 6, 0x46, 0);
    assert!(f.bus.mem.send(&mut MemMessage::write(IOAPIC_BASE + 0x20, 6)));
    assert!(f.bus.mem.send(&mut MemMessage::write(IOAPIC_BASE + 0x20, 24)));
    assert_eq!(f.take_msi(), [(0xfee0_0000, 0x46)]);
}

#[test]
fn test_chained() {
    let f = Fixture::new();
    f.program(0, 0, 0x60, 0);
    f.program(1, 0, 0x61, 0);
    f.program(1, 2, 0x62, 0);
    f.raise(24, IrqKind::Assert);
    f.raise(26, IrqKind::Assert);
    f.raise(48, IrqKind::Assert);
    assert_eq!(f.take_msi(), [(0xfee0_0000, 0x61), (0xfee0_0000, 0x62)]);

    f.program(1, 3, 0x8063, 0);
    f.raise(27, IrqKind::AssertNotify);
    assert!(f.bus.mem.send(&mut MemMessage::write(IOAPIC_EOI, 0x63)));
    assert_eq!(*f.recorder.notify.lock(), [IrqNotify { base: 24, mask: 0x08 }]);
    assert_eq!(f.ioapics[1].gsibase(), 24);
}

#[test]
fn test_directed_eoi_second_ioapic() {
    let f = Fixture::new();
    f.program(0, 5, 0x8064, 0);
    f.program(1, 5, 0x8064, 0);
    f.raise(5, IrqKind::AssertNotify);
    f.raise(29, IrqKind::AssertNotify);
    assert_eq!(f.take_msi(), [(0xfee0_0000, 0xc064), (0xfee0_0000, 0xc064)]);

    let eoi = IOAPIC_BASE + IOAPIC_STRIDE + IOEOI;
    assert!(f.bus.mem.send(&mut MemMessage::write(eoi, 0x64)));
    assert_eq!(f.read(1, 0x1a) & (1 << 14), 0);
    // The first I/O APIC did not see the write.
    assert_eq!(f.read(0, 0x1a) & (1 << 14), 1 << 14);
    assert_eq!(*f.recorder.notify.lock(), [IrqNotify { base: 24, mask: 0x20 }]);
}

#[test]
fn test_reset() {
    let f = Fixture::new();
    f.write(0, 0x00, 0x0100_0000);
    f.program(0, 3, 0x8043, 0x0100_0000);
    f.raise(3, IrqKind::Assert);
    f.bus.legacy.send(&mut LegacyMessage::new(LegacyKind::Reset));
    assert_eq!(f.read(0, 0x00), 0);
    assert_eq!(f.read(0, 0x16), 0x1_0000);
    assert_eq!(f.read(0, 0x17), 0);
    assert!(!f.ioapics[0].receive(&mut LegacyMessage::new(LegacyKind::Nmi)));
}
