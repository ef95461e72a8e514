//! Controller address parsing.
//!
//! Points on the cell controller are named with a letter prefix followed by a
//! decimal offset:
//!
//! | Prefix | Area | Read with | Example |
//! |--------|------|-----------|---------|
//! | `M` | coil (bit) | FC01 | `"M100"` |
//! | `D` | data / holding register | FC03 | `"D100"` |
//!
//! Prefixes are case-insensitive. The original string is kept as the
//! [`Address`] key so that events and logs show the name operators know.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{FC_READ_COILS, FC_READ_HOLDING_REGISTERS, MAX_REGISTER_OFFSET};
use crate::error::{MonitorError, MonitorResult};

/// Memory area of a controller point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegisterArea {
    /// Single-bit coil (`M` prefix)
    Coil,
    /// 16-bit data register (`D` prefix)
    DataRegister,
}

impl RegisterArea {
    /// Modbus function code used to read this area.
    #[inline]
    pub const fn read_function(&self) -> u8 {
        match self {
            Self::Coil => FC_READ_COILS,
            Self::DataRegister => FC_READ_HOLDING_REGISTERS,
        }
    }
}

/// Resolved wire location of an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterLocation {
    pub area: RegisterArea,
    pub offset: u16,
}

/// Name of a controller point, validated at construction.
///
/// Equality and hashing use the name as written, so `"M100"` and `"m100"` are
/// distinct scheduler keys even though they resolve to the same coil.
#[derive(Debug, Clone)]
pub struct Address {
    name: String,
    location: RegisterLocation,
}

impl Address {
    /// Parse an address such as `"M100"` or `"D42"`.
    pub fn parse(name: &str) -> MonitorResult<Self> {
        let trimmed = name.trim();
        let mut chars = trimmed.chars();
        let prefix = chars
            .next()
            .ok_or_else(|| MonitorError::invalid_address(name, "empty address"))?;

        let area = match prefix.to_ascii_uppercase() {
            'M' => RegisterArea::Coil,
            'D' => RegisterArea::DataRegister,
            other => {
                return Err(MonitorError::invalid_address(
                    name,
                    format!("unknown prefix '{}', expected 'M' or 'D'", other),
                ))
            }
        };

        let digits = chars.as_str();
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(MonitorError::invalid_address(
                name,
                "offset must be a decimal number",
            ));
        }
        let offset: u32 = digits
            .parse()
            .map_err(|_| MonitorError::invalid_address(name, "offset out of range"))?;
        if offset > MAX_REGISTER_OFFSET {
            return Err(MonitorError::invalid_address(
                name,
                format!("offset {} exceeds {}", offset, MAX_REGISTER_OFFSET),
            ));
        }

        Ok(Self {
            name: trimmed.to_string(),
            location: RegisterLocation {
                area,
                offset: offset as u16,
            },
        })
    }

    /// Coil address `M<offset>`.
    pub fn coil(offset: u16) -> Self {
        Self::from_location(RegisterLocation {
            area: RegisterArea::Coil,
            offset,
        })
    }

    /// Data register address `D<offset>`.
    pub fn register(offset: u16) -> Self {
        Self::from_location(RegisterLocation {
            area: RegisterArea::DataRegister,
            offset,
        })
    }

    fn from_location(location: RegisterLocation) -> Self {
        let prefix = match location.area {
            RegisterArea::Coil => 'M',
            RegisterArea::DataRegister => 'D',
        };
        Self {
            name: format!("{}{}", prefix, location.offset),
            location,
        }
    }

    /// The address as written.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn location(&self) -> RegisterLocation {
        self.location
    }

    #[inline]
    pub fn area(&self) -> RegisterArea {
        self.location.area
    }

    /// Whether the point is a coil, i.e. a boolean by nature.
    #[inline]
    pub fn is_coil(&self) -> bool {
        self.location.area == RegisterArea::Coil
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Address {}

impl std::hash::Hash for Address {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl FromStr for Address {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Address {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Address::parse(&name).map_err(serde::de::Error::custom)
    }
}
