//! Devices and their timestamped state records.

use crate::value::StateValue;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;

/// Opaque device identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Creates a device ID from any string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the identifier is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for DeviceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for DeviceId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// The most recently known value of one attribute and when it was observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateRecord {
    /// Attribute value.
    pub value: StateValue,
    /// Observation time in milliseconds since the Unix epoch.
    pub last_update: u64,
}

impl StateRecord {
    /// Creates a new record.
    pub fn new(value: impl Into<StateValue>, last_update: u64) -> Self {
        Self {
            value: value.into(),
            last_update,
        }
    }

    /// Returns true if this record was observed strictly after `other`.
    pub fn is_newer_than(&self, other: &StateRecord) -> bool {
        self.last_update > other.last_update
    }
}

/// Attribute key → record for a single device.
pub type DeviceState = BTreeMap<String, StateRecord>;

/// A device and everything currently known about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Device identifier.
    pub id: DeviceId,
    /// Per-attribute state.
    #[serde(default)]
    pub state: DeviceState,
}

impl Device {
    /// Creates a device with empty state.
    pub fn new(id: impl Into<DeviceId>) -> Self {
        Self {
            id: id.into(),
            state: DeviceState::new(),
        }
    }

    /// Returns the record stored under `key`.
    pub fn record(&self, key: &str) -> Option<&StateRecord> {
        self.state.get(key)
    }

    /// Stores `record` under `key`, returning the record it replaced.
    pub fn set(&mut self, key: impl Into<String>, record: StateRecord) -> Option<StateRecord> {
        self.state.insert(key.into(), record)
    }
}
