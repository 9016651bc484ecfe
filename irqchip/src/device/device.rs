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

//! Emulated interrupt controllers.
//!
//! Every device is an [`InterruptSink`] for the bus messages it decodes and
//! keeps its registers behind a lock that is never held across a send on a
//! bus, so a handler can always call back into the device that sent it.

use std::sync::Arc;

use crate::bus::message::IrqMessage;
use crate::bus::{InterruptSink, SystemBus};

pub mod ioapic;
pub mod lapic;
pub mod msi;
pub mod pic8259;

/// Number of ISA interrupt lines wired to the 8259 pair.
pub const NUM_ISA_LINES: u32 = 16;

/// Mirrors the ISA part of the GSI space onto the 8259 input lines.
#[derive(Debug)]
pub struct IsaLines {
    bus: Arc<SystemBus>,
}

impl IsaLines {
    pub fn new(bus: Arc<SystemBus>) -> Self {
        IsaLines { bus }
    }
}

impl InterruptSink<IrqMessage> for IsaLines {
    fn receive(&self, msg: &mut IrqMessage) -> bool {
        if msg.line >= NUM_ISA_LINES {
            return false;
        }
        self.bus.irq_lines.send(msg)
    }
}
