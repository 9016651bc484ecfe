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

use crate::consts;

consts! {
    pub struct DeliveryMode(u8) {
        FIXED = 0b000;
        LOW_PRIORITY = 0b001;
        SMI = 0b010;
        REMOTE_READ = 0b011;
        NMI = 0b100;
        INIT = 0b101;
        STARTUP_IPI = 0b110;
        EXTINT = 0b111;
    }
}

consts! {
    pub struct DestShorthand(u8) {
        NONE = 0b00;
        SELF = 0b01;
        ALL_INCLUDING_SELF = 0b10;
        ALL_EXCLUDING_SELF = 0b11;
    }
}

/// Start of the window that turns memory writes into interrupts.
pub const MSI_ADDR_BASE: u64 = 0xfee0_0000;
pub const MSI_WINDOW_SIZE: u64 = 1 << 20;
/// Logical destination mode in the address of an MSI.
pub const MSI_DM: u64 = 1 << 2;
/// Redirection hint: deliver to the lowest-priority member of the destination.
pub const MSI_RH: u64 = 1 << 3;

/// Vectors below this value are reserved for exceptions.
pub const MIN_VECTOR: u8 = 16;

bitfield! {
    #[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
    pub struct MsiAddrLo(u32);
    impl Debug;
    pub dest_mode, set_dest_mode : 2;
    pub redirection_hint, set_redirection_hint : 3;
    pub u8, ext_dest_id, set_ext_dest_id : 11, 4;
    pub u8, dest_id, set_dest_id : 19, 12;
    pub identifier, _: 31, 20;
}

bitfield! {
    #[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
    pub struct MsiData(u32);
    impl Debug;
    impl new;
    pub u8, vector, set_vector : 7, 0;
    pub u8, from into DeliveryMode, delivery_mode, set_delivery_mode : 10, 8;
    pub level, set_level : 14;
    pub trigger_mode, set_trigger_mode : 15;
}
