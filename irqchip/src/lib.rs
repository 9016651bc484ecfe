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

//! Emulated x86 interrupt controllers.
//!
//! The crate models the local APIC, the I/O APIC and the cascaded 8259 PIC
//! as devices that talk to each other over a synchronous, typed message bus.
//! A [`board::Board`] assembles a complete PC-style interrupt topology.

#[path = "arch/arch.rs"]
pub mod arch;
#[path = "board/board.rs"]
pub mod board;
#[path = "bus/bus.rs"]
pub mod bus;
#[path = "device/device.rs"]
pub mod device;
pub mod errors;
#[path = "timer/timer.rs"]
pub mod timer;
#[path = "utils/utils.rs"]
pub mod utils;
#[path = "vcpu/vcpu.rs"]
pub mod vcpu;
