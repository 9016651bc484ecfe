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
pub mod bitmap;

/// Declares a transparent newtype with a set of named constants, for register
/// fields whose encodings are open-ended (unknown values stay representable).
#[macro_export]
macro_rules! consts {
    (
        $(#[$attr:meta])*
        $vs:vis struct $Name:ident($Ty:ty) {
            $( $(#[$vattr:meta])* $VARIANT:ident = $value:expr;)*
        }
    ) => {
        #[repr(transparent)]
        #[derive(PartialEq, Eq, Copy, Clone, Default, Hash)]
        $(#[$attr])*
        $vs struct $Name($Ty);

        impl $Name {
            $($(#[$vattr])* pub const $VARIANT: $Name = $Name($value);)*

            #[allow(dead_code)]
            pub const fn raw(self) -> $Ty {
                self.0
            }
        }

        impl ::core::fmt::Debug for $Name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                f.write_str(stringify!($Name))?;
                match *self {
                    $($Name::$VARIANT => write!(f, "::{}", stringify!($VARIANT)),)*
                    _ => write!(f, "({:?})", self.0),
                }
            }
        }

        impl From<$Name> for $Ty {
            fn from(value: $Name) -> Self {
                value.0
            }
        }

        impl From<$Ty> for $Name {
            fn from(value: $Ty) -> Self {
                $Name(value)
            }
        }
    };
}

/// Returns true if `addr` lies in `[base, base + size)`.
pub fn in_range(addr: u64, base: u64, size: u64) -> bool {
    addr.wrapping_sub(base) < size
}

#[cfg(test)]
mod test {
    use super::in_range;

    #[test]
    fn test_in_range() {
        assert!(in_range(0xfee00000, 0xfee00000, 0x1000));
        assert!(in_range(0xfee00fff, 0xfee00000, 0x1000));
        assert!(!in_range(0xfee01000, 0xfee00000, 0x1000));
        assert!(!in_range(0xfedfffff, 0xfee00000, 0x1000));
        assert!(!in_range(0, 0xfee00000, 0));
    }
}
