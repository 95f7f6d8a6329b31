//! Control values and their cross-type comparison.
//!
//! Control datum values arrive as JSON numbers (sometimes booleans), while
//! instruction parameter values are always strings. [`ControlValue`] carries
//! either form, and [`values_equal`] compares them the way a person reads
//! them: `"1"` equals `1`, `true` equals `1`, and `"on"` equals only `"on"`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The value of a control, as reported by a datum or requested by an instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControlValue {
    /// A boolean value.
    Boolean(bool),
    /// A numeric value.
    Number(f64),
    /// A textual value, such as an instruction parameter.
    Text(String),
}

impl ControlValue {
    /// Numeric reading of the value, if it has one.
    ///
    /// Booleans read as `1`/`0`; text is trimmed and parsed, with blank text
    /// reading as `0`.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Number(n) => Some(*n),
            Self::Text(s) => {
                let s = s.trim();
                if s.is_empty() {
                    Some(0.0)
                } else {
                    s.parse::<f64>().ok().filter(|n| !n.is_nan())
                }
            }
        }
    }

    /// Loose equality against another value.
    ///
    /// Two texts compare as strings and two booleans directly. Any other
    /// pairing compares numerically,
    /// so a value that has no numeric reading equals nothing but identical text.
    #[must_use]
    pub fn loosely_equals(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            _ => match (self.as_number(), other.as_number()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

impl fmt::Display for ControlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for ControlValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<f64> for ControlValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i32> for ControlValue {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<&str> for ControlValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for ControlValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Compare two optional control values with loose equality.
///
/// An absent value equals only another absent value.
#[must_use]
pub fn values_equal(a: Option<&ControlValue>, b: Option<&ControlValue>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.loosely_equals(b),
        _ => false,
    }
}
