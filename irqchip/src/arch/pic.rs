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
pub const MASTER_BASE: u16 = 0x20;
pub const SLAVE_BASE: u16 = 0xa0;
pub const MASTER_ELCR: u16 = 0x4d0;
pub const SLAVE_ELCR: u16 = 0x4d1;

/// Line of the master PIC the slave is cascaded to.
pub const CASCADE_LINE: u8 = 2;

pub const ICW1_IC4: u8 = 0x01;
pub const ICW1_SNGL: u8 = 0x02;
pub const ICW1_LTIM: u8 = 0x08;
/// Marks a write to the command port as ICW1.
pub const ICW1_INIT: u8 = 0x10;

pub const ICW4_AEOI: u8 = 0x02;
pub const ICW4_MS: u8 = 0x04;
pub const ICW4_BUF: u8 = 0x08;
pub const ICW4_SFNM: u8 = 0x10;

/// Distinguishes OCW3 from OCW2 on the command port.
pub const OCW_SELECT_OCW3: u8 = 0x08;

pub const OCW2_LEVEL_MASK: u8 = 0x07;
pub const OCW2_EOI: u8 = 0x20;
pub const OCW2_SPECIFIC: u8 = 0x40;
pub const OCW2_ROTATE: u8 = 0x80;

pub const OCW3_READ_ISR: u8 = 0x01;
pub const OCW3_READ_REG: u8 = 0x02;
pub const OCW3_POLL: u8 = 0x04;
pub const OCW3_SMM: u8 = 0x20;
pub const OCW3_ESMM: u8 = 0x40;

/// IRQ reported when an acknowledge cycle finds nothing pending.
pub const SPURIOUS_IRQ: u8 = 7;
