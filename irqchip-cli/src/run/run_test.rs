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

use pretty_assertions::assert_eq;
use rstest::rstest;

use super::{Delivery, Error, Origin, RunArgs, Scenario, run};

fn args(board: &str, scenario: Scenario, count: u32) -> RunArgs {
    RunArgs {
        board: (!board.is_empty()).then(|| board.to_owned()),
        scenario,
        count,
    }
}

fn delivery(cpu: u32, vector: u8, origin: Origin) -> Delivery {
    Delivery {
        cpu,
        vector,
        origin,
    }
}

#[test]
fn test_ipi() {
    let deliveries = run(args("num_cpu=2", Scenario::Ipi, 3)).unwrap();
    assert_eq!(
        deliveries,
        vec![
            delivery(0, 0x40, Origin::Ipi),
            delivery(1, 0x41, Origin::Ipi),
            delivery(0, 0x42, Origin::Ipi),
        ]
    );
}

#[test]
fn test_pic() {
    let deliveries = run(args("", Scenario::Pic, 9)).unwrap();
    let vectors: Vec<_> = deliveries.iter().map(|d| (d.vector, d.origin)).collect();
    assert_eq!(
        vectors,
        vec![
            (0x20, Origin::Pic { irq: 0 }),
            (0x21, Origin::Pic { irq: 1 }),
            (0x23, Origin::Pic { irq: 3 }),
            (0x24, Origin::Pic { irq: 4 }),
            (0x25, Origin::Pic { irq: 5 }),
            (0x26, Origin::Pic { irq: 6 }),
            (0x27, Origin::Pic { irq: 7 }),
            (0x28, Origin::Pic { irq: 8 }),
            (0x29, Origin::Pic { irq: 9 }),
        ]
    );
    assert!(deliveries.iter().all(|d| d.cpu == 0));
}

#[test]
fn test_pic_missing() {
    let ret = run(args("pic=off", Scenario::Pic, 1));
    assert!(matches!(
        ret,
        Err(Error::MissingDevice {
            scenario: Scenario::Pic,
            ..
        })
    ));
}

#[test]
fn test_ioapic() {
    let deliveries = run(args("num_cpu=2,pic=off", Scenario::Ioapic, 3)).unwrap();
    assert_eq!(
        deliveries,
        vec![
            delivery(0, 0x50, Origin::IoApic { gsi: 16 }),
            delivery(1, 0x51, Origin::IoApic { gsi: 17 }),
            delivery(0, 0x52, Origin::IoApic { gsi: 18 }),
        ]
    );
}

#[test]
fn test_timer() {
    let deliveries = run(args("", Scenario::Timer, 3)).unwrap();
    assert_eq!(
        deliveries,
        vec![
            delivery(0, 0x30, Origin::Timer { now: 1_000_000 }),
            delivery(0, 0x30, Origin::Timer { now: 2_000_000 }),
            delivery(0, 0x30, Origin::Timer { now: 3_000_000 }),
        ]
    );
}

#[rstest]
#[case("num_cpu=two")]
#[case("num_cpu=2,pic=maybe")]
fn test_invalid_arg(#[case] board: &str) {
    let ret = run(args(board, Scenario::Ipi, 1));
    assert!(matches!(ret, Err(Error::ParseArg { arg, .. }) if arg == board));
}

#[test]
fn test_invalid_board() {
    let ret = run(args("num_cpu=0", Scenario::Ipi, 1));
    assert!(matches!(ret, Err(Error::CreateBoard { .. })));
}

#[test]
fn test_display() {
    let d = delivery(1, 0x2c, Origin::Pic { irq: 12 });
    assert_eq!(d.to_string(), "cpu 1: vector 0x2c from IRQ 12");
    let d = delivery(0, 0x30, Origin::Timer { now: 5 });
    assert_eq!(d.to_string(), "cpu 0: vector 0x30 from timer at 5ns");
}
