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
use std::sync::atomic::{AtomicU64, Ordering};

const WORDS: usize = 4;

/// A 256-bit bitmap indexed by interrupt vector.
///
/// Every mutation is a single-bit atomic read-modify-write, so a vector can
/// be posted from another vCPU's thread while the owner acknowledges or
/// retires a different vector concurrently.
#[derive(Debug, Default)]
pub struct VectorBitmap {
    words: [AtomicU64; WORDS],
}

impl VectorBitmap {
    pub const fn new() -> Self {
        VectorBitmap {
            words: [const { AtomicU64::new(0) }; WORDS],
        }
    }

    fn locate(vector: u8) -> (usize, u64) {
        ((vector >> 6) as usize, 1 << (vector & 0x3f))
    }

    /// Sets the bit and returns its previous state.
    pub fn set(&self, vector: u8) -> bool {
        let (word, mask) = Self::locate(vector);
        self.words[word].fetch_or(mask, Ordering::AcqRel) & mask != 0
    }

    /// Clears the bit and returns its previous state.
    pub fn clear(&self, vector: u8) -> bool {
        let (word, mask) = Self::locate(vector);
        self.words[word].fetch_and(!mask, Ordering::AcqRel) & mask != 0
    }

    pub fn assign(&self, vector: u8, val: bool) -> bool {
        if val {
            self.set(vector)
        } else {
            self.clear(vector)
        }
    }

    pub fn test(&self, vector: u8) -> bool {
        let (word, mask) = Self::locate(vector);
        self.words[word].load(Ordering::Acquire) & mask != 0
    }

    /// Returns the highest set vector.
    pub fn highest(&self) -> Option<u8> {
        for (index, word) in self.words.iter().enumerate().rev() {
            let val = word.load(Ordering::Acquire);
            if val != 0 {
                return Some(((index as u32) << 6 | (63 - val.leading_zeros())) as u8);
            }
        }
        None
    }

    /// Returns the `index`-th 32-bit slice, as laid out in the APIC
    /// register page (ISR0..ISR7 and friends).
    pub fn read_u32(&self, index: usize) -> u32 {
        let word = self.words[(index >> 1) & (WORDS - 1)].load(Ordering::Acquire);
        (word >> ((index & 1) << 5)) as u32
    }

    pub fn clear_all(&self) {
        for word in &self.words {
            word.store(0, Ordering::Release);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| w.load(Ordering::Acquire) == 0)
    }
}

#[cfg(test)]
#[path = "bitmap_test.rs"]
mod tests;
