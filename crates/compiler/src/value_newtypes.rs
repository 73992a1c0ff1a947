//! Newtype generation macros

// SPDX-FileCopyrightText: © 2023 Marcus Rowe <undisbeliever@gmail.com>
//
// SPDX-License-Identifier: MIT

macro_rules! u8_value_newtype {
    ($name:ident, $error:ident, $min:expr, $max:expr) => {
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u8);

        #[allow(dead_code)]
        impl $name {
            pub const MIN: Self = Self($min);
            pub const MAX: Self = Self($max);

            pub const fn as_u8(&self) -> u8 {
                self.0
            }
        }

        impl TryFrom<u8> for $name {
            type Error = crate::errors::ValueError;

            #[allow(clippy::manual_range_contains)]
            fn try_from(value: u8) -> Result<Self, Self::Error> {
                if value >= Self::MIN.0 && value <= Self::MAX.0 {
                    Ok(Self(value))
                } else {
                    Err(crate::errors::ValueError::$error(u32::from(value)))
                }
            }
        }

        impl TryFrom<u32> for $name {
            type Error = crate::errors::ValueError;

            fn try_from(value: u32) -> Result<Self, Self::Error> {
                if value >= Self::MIN.0.into() && value <= Self::MAX.0.into() {
                    Ok(Self(u8::try_from(value).unwrap()))
                } else {
                    Err(crate::errors::ValueError::$error(value))
                }
            }
        }
    };
}

pub(crate) use u8_value_newtype;
