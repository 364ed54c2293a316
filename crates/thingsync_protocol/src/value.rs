//! Attribute values.

use serde::{Deserialize, Serialize};
use serde_json::Number;
use std::collections::BTreeMap;
use std::fmt;

/// The value of a single device attribute.
///
/// Values mirror the JSON data model minus `null`: an attribute always holds
/// something. Numbers keep their integer/float distinction so that records
/// read back from a remote store compare equal to what was written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    /// A boolean flag (e.g. `online`).
    Bool(bool),
    /// An integer or floating point number.
    Number(Number),
    /// A string.
    Text(String),
    /// An ordered sequence of values.
    List(Vec<StateValue>),
    /// A string-keyed mapping of values.
    Map(BTreeMap<String, StateValue>),
}

impl StateValue {
    /// Creates a number value from a float.
    ///
    /// Returns `None` for NaN and infinities, which JSON cannot represent.
    pub fn float(value: f64) -> Option<Self> {
        Number::from_f64(value).map(StateValue::Number)
    }

    /// Returns the boolean if this is a `Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            StateValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the string if this is a `Text`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            StateValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the number as `i64` if it is an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            StateValue::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    /// Returns the number as `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            StateValue::Number(n) => n.as_f64(),
            _ => None,
        }
    }
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateValue::Bool(b) => write!(f, "{b}"),
            StateValue::Number(n) => write!(f, "{n}"),
            StateValue::Text(s) => write!(f, "{s}"),
            StateValue::List(_) | StateValue::Map(_) => {
                let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
                f.write_str(&json)
            }
        }
    }
}

impl From<bool> for StateValue {
    fn from(value: bool) -> Self {
        StateValue::Bool(value)
    }
}

impl From<&str> for StateValue {
    fn from(value: &str) -> Self {
        StateValue::Text(value.to_string())
    }
}

impl From<String> for StateValue {
    fn from(value: String) -> Self {
        StateValue::Text(value)
    }
}

impl From<i64> for StateValue {
    fn from(value: i64) -> Self {
        StateValue::Number(value.into())
    }
}

impl From<u64> for StateValue {
    fn from(value: u64) -> Self {
        StateValue::Number(value.into())
    }
}

impl From<i32> for StateValue {
    fn from(value: i32) -> Self {
        StateValue::Number(value.into())
    }
}

impl From<u8> for StateValue {
    fn from(value: u8) -> Self {
        StateValue::Number(value.into())
    }
}

impl From<Vec<StateValue>> for StateValue {
    fn from(value: Vec<StateValue>) -> Self {
        StateValue::List(value)
    }
}

impl From<BTreeMap<String, StateValue>> for StateValue {
    fn from(value: BTreeMap<String, StateValue>) -> Self {
        StateValue::Map(value)
    }
}
