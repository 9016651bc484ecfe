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

use rstest::{fixture, rstest};

use crate::arch::intr::{DeliveryMode, MsiData};
use crate::bus::SystemBus;
use crate::bus::message::MemMessage;
use crate::device::lapic::{InterruptAck, Lapic};
use crate::timer::{ManualClock, TimerQueue};
use crate::vcpu::{CpuEvent, CpuEvents};

use super::MsiForwarder;

const LDR: u16 = 0x0d;
const SVR: u16 = 0x0f;

struct Platform {
    bus: Arc<SystemBus>,
    lapics: Vec<Arc<Lapic>>,
    events: Vec<Arc<CpuEvents>>,
}

impl Platform {
    fn write(&self, addr: u64, data: u32) -> bool {
        self.bus.mem.send(&mut MemMessage::write(addr, data))
    }

    fn pending(&self, vector: u8) -> Vec<usize> {
        (0..self.lapics.len())
            .filter(|i| self.lapics[*i].irr().test(vector))
            .collect()
    }
}

impl Drop for Platform {
    fn drop(&mut self) {
        self.bus.detach_all();
    }
}

#[fixture]
fn platform() -> Platform {
    let bus = Arc::new(SystemBus::new());
    let clock = Arc::new(ManualClock::new(1_000_000_000));
    let timers = Arc::new(TimerQueue::new());
    bus.mem.add(Arc::new(MsiForwarder::new(bus.clone())));
    let mut lapics = vec![];
    let mut events = vec![];
    for id in 0..3 {
        let event = Arc::new(CpuEvents::new());
        let lapic = Arc::new(Lapic::new(
            id,
            bus.clone(),
            event.clone(),
            clock.clone(),
            timers.clone(),
            timers.alloc(),
        ));
        assert!(lapic.write_register(SVR, 0x1ff, false));
        assert!(lapic.write_register(LDR, 1 << (24 + id), false));
        bus.apic.add(lapic.clone());
        lapics.push(lapic);
        events.push(event);
    }
    Platform {
        bus,
        lapics,
        events,
    }
}

#[rstest]
#[case(0xfee0_1000, 0x45, vec![1])]
#[case(0xfee0_2000, 0x45, vec![2])]
#[case(0xfee0_ff00, 0x45, vec![0, 1, 2])]
#[case(0xfee0_3004, 0x45, vec![0, 1])]
#[case(0xfee0_4004, 0x0845, vec![2])]
fn test_fixed(
    platform: Platform,
    #[case] addr: u64,
    #[case] data: u32,
    #[case] expected: Vec<usize>,
) {
    assert!(platform.write(addr, data));
    assert_eq!(platform.pending(0x45), expected);
}

#[rstest]
fn test_no_target(platform: Platform) {
    assert!(!platform.write(0xfee0_5000, 0x45));
    assert!(!platform.write(0xfee0_8004, 0x45));
    assert!(platform.pending(0x45).is_empty());
}

#[rstest]
#[case(0xfee0_ff00, 0x0146)]
#[case(0xfee0_ff08, 0x0046)]
#[case(0xfee0_070c, 0x0046)]
fn test_lowest_priority(platform: Platform, #[case] addr: u64, #[case] data: u32) {
    for expected in [0, 1, 2, 0] {
        assert!(platform.write(addr, data));
        assert_eq!(platform.pending(0x46), [expected]);
        assert_eq!(
            platform.lapics[expected].request_vector_on_inta(),
            InterruptAck::Vector(0x46)
        );
        platform.lapics[expected].eoi();
    }
}

#[rstest]
fn test_delivery_modes(platform: Platform) {
    assert!(!platform.write(0xfee0_1000, 0x0347));
    assert!(!platform.write(0xfee0_1000, 0x0647));
    assert!(platform.pending(0x47).is_empty());
    assert!(platform.events[1].pending().is_empty());

    assert!(platform.write(0xfee0_1000, 0x0400));
    assert_eq!(platform.events[1].pending(), CpuEvent::NMI);
    assert!(platform.write(0xfee0_2000, 0x0200));
    assert_eq!(platform.events[2].pending(), CpuEvent::SMI);
}

#[rstest]
fn test_trigger_mode(platform: Platform) {
    assert!(platform.write(0xfee0_0000, 0xc048));
    assert!(platform.lapics[0].tmr().test(0x48));
    assert!(platform.write(0xfee0_0000, 0x0049));
    assert!(!platform.lapics[0].tmr().test(0x49));
    // Deassertion of a level interrupt is accepted and dropped.
    assert!(platform.write(0xfee0_1000, 0x804a));
    assert!(platform.pending(0x4a).is_empty());
}

#[rstest]
fn test_reserved_data_bits(platform: Platform) {
    let data = MsiData::new(0x4b, DeliveryMode::FIXED, true, true);
    // Bits 11-13 and 16-31 carry nothing.
    assert!(platform.write(0xfee0_2004, data.0 | 0xffff_3800));
    assert_eq!(platform.pending(0x4b), [1]);
    assert!(platform.lapics[1].tmr().test(0x4b));
}

#[rstest]
fn test_outside_window(platform: Platform) {
    assert!(!platform.write(0xfef0_0000, 0x45));
    assert!(!platform.write(0xfedf_f000, 0x45));
    let mut msg = MemMessage::read(0xfee0_0000);
    assert!(!platform.bus.mem.send(&mut msg));
    assert!(platform.pending(0x45).is_empty());
}
