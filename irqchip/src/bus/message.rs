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
//! Message shapes exchanged between the emulated interrupt controllers.

use crate::arch::lapic::IcrLo;
use crate::timer::TimerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqKind {
    Assert,
    Deassert,
    /// Assert, and ask for an [`IrqNotify`] once the request is retired so
    /// that a level source still held low can assert again.
    AssertNotify,
}

/// A device driving an interrupt line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrqMessage {
    pub line: u32,
    pub kind: IrqKind,
}

impl IrqMessage {
    pub fn new(line: u32, kind: IrqKind) -> Self {
        IrqMessage { line, kind }
    }
}

/// Lines `base + i` for every bit `i` set in `mask` may be asserted
/// again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrqNotify {
    pub base: u32,
    pub mask: u8,
}

/// An interrupt traveling between local APICs.
///
/// `icr` uses the layout of the low half of the interrupt command register.
/// `dst` is an 8-bit xAPIC or a 32-bit x2APIC destination, interpreted
/// according to `icr.dest_mode()`. A local APIC whose initial APIC ID equals
/// `exclude` ignores the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApicMessage {
    pub icr: IcrLo,
    pub dst: u32,
    pub exclude: Option<u32>,
}

/// A 32-bit access to guest physical memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemMessage {
    pub addr: u64,
    pub write: bool,
    pub value: u32,
}

impl MemMessage {
    pub fn read(addr: u64) -> Self {
        MemMessage {
            addr,
            write: false,
            value: 0,
        }
    }

    pub fn write(addr: u64, value: u32) -> Self {
        MemMessage {
            addr,
            write: true,
            value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyKind {
    /// The master PIC raises its INTR output.
    Intr,
    /// The master PIC drops its INTR output.
    DeassertIntr,
    /// Interrupt acknowledge cycle; the responder fills in the vector.
    Inta,
    /// The NMI input of the platform.
    Nmi,
    /// The INIT input of the platform.
    Init,
    /// Platform reset.
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegacyMessage {
    pub kind: LegacyKind,
    pub value: u8,
}

impl LegacyMessage {
    pub fn new(kind: LegacyKind) -> Self {
        LegacyMessage { kind, value: 0 }
    }
}

/// A query on the three-wire cascade bus: the slave at position `slave`
/// answers with its vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PicMessage {
    pub slave: u8,
    pub vector: u8,
}

/// A byte-wide port I/O access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoMessage {
    pub port: u16,
    pub write: bool,
    pub value: u8,
}

impl IoMessage {
    pub fn read(port: u16) -> Self {
        IoMessage {
            port,
            write: false,
            value: 0,
        }
    }

    pub fn write(port: u16, value: u8) -> Self {
        IoMessage {
            port,
            write: true,
            value,
        }
    }
}

/// A previously armed deadline of `timer` has passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutMessage {
    pub timer: TimerId,
}
