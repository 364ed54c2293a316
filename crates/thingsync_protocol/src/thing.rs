//! Remote ("cloud") representation of a registered device.

use crate::record::{Device, DeviceId, DeviceState, StateRecord};
use serde::{Deserialize, Serialize};

/// Device type recorded for things that were created implicitly by a state
/// write rather than registered.
pub const UNKNOWN_DEVICE_TYPE: &str = "unknown";

/// Formats the part number assigned to the `n`-th thing of a device type.
pub fn part_number(n: usize) -> String {
    format!("1.234-567.{n}")
}

/// A registered thing as persisted by a remote store.
///
/// Stores hold these as a flat JSON array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThingRecord {
    /// Device identifier.
    pub id: DeviceId,
    /// Product family, e.g. `"pump"`.
    pub device_type: String,
    /// Part number assigned at registration.
    pub part_number: String,
    /// Human readable name.
    pub name: String,
    /// Synchronized state, absent until the first write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<DeviceState>,
    /// Registration time in milliseconds since the Unix epoch.
    pub created_at: u64,
}

impl ThingRecord {
    /// Creates a thing with no state yet.
    pub fn new(
        id: impl Into<DeviceId>,
        device_type: impl Into<String>,
        part_number: impl Into<String>,
        name: impl Into<String>,
        created_at: u64,
    ) -> Self {
        Self {
            id: id.into(),
            device_type: device_type.into(),
            part_number: part_number.into(),
            name: name.into(),
            state: None,
            created_at,
        }
    }

    /// Creates the record used when state arrives for a thing nobody
    /// registered.
    pub fn placeholder(id: DeviceId, created_at: u64) -> Self {
        let name = id.to_string();
        Self::new(id, UNKNOWN_DEVICE_TYPE, "", name, created_at)
    }

    /// Returns the record stored under `key`.
    pub fn record(&self, key: &str) -> Option<&StateRecord> {
        self.state.as_ref().and_then(|state| state.get(key))
    }

    /// Returns the device view of this thing.
    pub fn to_device(&self) -> Device {
        Device {
            id: self.id.clone(),
            state: self.state.clone().unwrap_or_default(),
        }
    }
}
