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
use bitfield::bitfield;

use crate::arch::intr::DeliveryMode;

pub const IOAPIC_BASE: u64 = 0xfec0_0000;
/// Distance between two chained IO APICs.
pub const IOAPIC_STRIDE: u64 = 0x1000;
/// Size of the register window decoded by one IO APIC.
pub const IOAPIC_WINDOW: u64 = 0x100;
/// Every IO APIC accepts a directed EOI written to this address.
pub const IOAPIC_EOI: u64 = IOAPIC_BASE + IOEOI;

pub const IOREGSEL: u64 = 0x00;
pub const IOWIN: u64 = 0x10;
pub const IOPAR: u64 = 0x20;
pub const IOEOI: u64 = 0x40;

pub const IOAPICID: u8 = 0x00;
pub const IOAPICVER: u8 = 0x01;
pub const IOREDTBL_BASE: u8 = 0x10;

pub const NUM_PINS: u8 = 24;
pub const IOREDTBL_MAX: u8 = IOREDTBL_BASE + 2 * NUM_PINS - 1;

pub const IOAPIC_VER: u8 = 0x20;

/// Writable bits of the low and the high half of a redirection entry.
pub const REDIR_LO_MASK: u32 = 0x0001_afff;
pub const REDIR_HI_MASK: u32 = 0xffff_0000;

bitfield! {
    #[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
    pub struct RegVer(u32);
    impl Debug;
    impl new;
    pub u8, version, set_version : 7, 0;
    pub irq_assertion, set_irq_assertion : 15;
    pub u8, max_entry, set_max_entry : 23, 16;
}

bitfield! {
    #[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
    pub struct RedirectEntry(u64);
    impl Debug;
    pub u8, vector, set_vector : 7, 0;
    pub u8, from into DeliveryMode, delivery_mode, set_delivery_mode : 10, 8;
    pub dest_mode, set_dest_mode : 11;
    pub delivery_status, set_delivery_status : 12;
    pub polarity, set_polarity : 13;
    pub remote_irr, set_remote_irr : 14;
    pub trigger_mode, set_trigger_mode : 15;
    pub masked, set_masked : 16;
    pub u8, ext_dest_id, set_ext_dest_id : 55, 48;
    pub u8, dest_id, set_dest_id : 63, 56;
}

impl RedirectEntry {
    pub const RESET: RedirectEntry = RedirectEntry(1 << 16);
}
