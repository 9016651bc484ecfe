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

//! Error plumbing shared by every module.
//!
//! Errors in this crate describe failures of the emulator itself, such as an
//! impossible board configuration. Guest misprogramming is never reported
//! here; it shows up in guest-visible register state instead.

use std::error::Error;
use std::fmt;

pub use irqchip_macros::{DebugTrace, trace_error};

pub trait DebugTrace: Error {
    fn debug_trace(&self, f: &mut fmt::Formatter) -> Result<u32, fmt::Error>;
}
