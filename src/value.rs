//! # Register Value Types
//!
//! Typed values read from controller points.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A value read from a single controller point.
///
/// The controller exposes every point as a signed 16-bit word; boolean points
/// are words where any positive value means "on".
///
/// # Example
///
/// ```rust
/// use furnace_monitor::RegisterValue;
///
/// let raw = RegisterValue::I16(1);
/// assert!(raw.as_bool());
/// assert_eq!(RegisterValue::Bool(true).as_i16(), 1);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegisterValue {
    /// Boolean value (coils, status bits)
    Bool(bool),
    /// Signed 16-bit integer (data registers)
    I16(i16),
}

impl RegisterValue {
    /// Interpret the value as a flag: `true` when the word is greater than zero.
    #[inline]
    pub fn as_bool(&self) -> bool {
        match self {
            RegisterValue::Bool(b) => *b,
            RegisterValue::I16(v) => *v > 0,
        }
    }

    /// Interpret the value as a signed word.
    #[inline]
    pub fn as_i16(&self) -> i16 {
        match self {
            RegisterValue::Bool(b) => i16::from(*b),
            RegisterValue::I16(v) => *v,
        }
    }

    /// Convert the value to f64 for statistics and display.
    #[inline]
    pub fn as_f64(&self) -> f64 {
        f64::from(self.as_i16())
    }

    /// Returns the type name as a string for logging/debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            RegisterValue::Bool(_) => "bool",
            RegisterValue::I16(_) => "i16",
        }
    }
}

impl fmt::Display for RegisterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterValue::Bool(v) => write!(f, "{}", v),
            RegisterValue::I16(v) => write!(f, "{}", v),
        }
    }
}

impl Default for RegisterValue {
    fn default() -> Self {
        RegisterValue::I16(0)
    }
}

impl From<bool> for RegisterValue {
    fn from(v: bool) -> Self {
        RegisterValue::Bool(v)
    }
}

impl From<i16> for RegisterValue {
    fn from(v: i16) -> Self {
        RegisterValue::I16(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_as_bool() {
        assert!(RegisterValue::Bool(true).as_bool());
        assert!(!RegisterValue::Bool(false).as_bool());
        assert!(RegisterValue::I16(1).as_bool());
        assert!(RegisterValue::I16(i16::MAX).as_bool());
        assert!(!RegisterValue::I16(0).as_bool());
        // negative words are not "on"
        assert!(!RegisterValue::I16(-1).as_bool());
    }

    #[test]
    fn test_as_i16_and_f64() {
        assert_eq!(RegisterValue::Bool(true).as_i16(), 1);
        assert_eq!(RegisterValue::Bool(false).as_i16(), 0);
        assert_eq!(RegisterValue::I16(-300).as_i16(), -300);
        assert_eq!(RegisterValue::I16(-300).as_f64(), -300.0);
    }

    #[test]
    fn test_display_and_type_name() {
        assert_eq!(format!("{}", RegisterValue::Bool(true)), "true");
        assert_eq!(format!("{}", RegisterValue::I16(-1234)), "-1234");
        assert_eq!(RegisterValue::Bool(false).type_name(), "bool");
        assert_eq!(RegisterValue::I16(0).type_name(), "i16");
    }

    #[test]
    fn test_from_primitives() {
        assert_eq!(RegisterValue::from(true), RegisterValue::Bool(true));
        assert_eq!(RegisterValue::from(7i16), RegisterValue::I16(7));
        assert_eq!(RegisterValue::default(), RegisterValue::I16(0));
    }
}
