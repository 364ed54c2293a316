//! Sync queue items and their typed interpretation.

use crate::error::{ProtocolError, ProtocolResult};
use crate::record::{DeviceId, StateRecord};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Kind of work a queue item carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobKind {
    /// Push one attribute record to the remote store.
    UpdateDeviceState,
    /// Make sure a locally added device exists remotely.
    AddDevice,
}

/// A unit of work owned by the sync queue.
///
/// The payload stays loosely typed so that items can be carried around and
/// persisted as plain JSON; [`QueueItem::decode`] turns it into a [`SyncJob`]
/// and is the single place where structural validation happens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    /// Job kind.
    pub kind: JobKind,
    /// Kind-specific payload.
    pub payload: Value,
    /// Failed attempts so far.
    #[serde(default)]
    pub retry_count: u32,
    /// Earliest time (epoch millis) the item may be processed again.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_time: Option<u64>,
    /// When the item was last handed to a handler (epoch millis).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_time: Option<u64>,
}

impl QueueItem {
    /// Creates a fresh item that has never been attempted.
    pub fn new(kind: JobKind, payload: Value) -> Self {
        Self {
            kind,
            payload,
            retry_count: 0,
            next_retry_time: None,
            last_attempt_time: None,
        }
    }

    /// Creates an `UpdateDeviceState` item.
    pub fn update_device_state(device_id: &DeviceId, key: &str, record: &StateRecord) -> Self {
        Self::new(
            JobKind::UpdateDeviceState,
            json!({
                "deviceId": device_id,
                "key": key,
                "record": record,
            }),
        )
    }

    /// Creates an `AddDevice` item.
    pub fn add_device(device_id: &DeviceId) -> Self {
        Self::new(JobKind::AddDevice, json!({ "deviceId": device_id }))
    }

    /// Returns true if the item may be processed at `now`.
    pub fn is_due(&self, now: u64) -> bool {
        self.next_retry_time.map_or(true, |at| at <= now)
    }

    /// Validates the payload against the item's kind.
    pub fn decode(&self) -> ProtocolResult<SyncJob> {
        let invalid = |e: serde_json::Error| ProtocolError::invalid_payload(self.kind, e.to_string());

        match self.kind {
            JobKind::UpdateDeviceState => {
                let update: StateUpdate =
                    serde_json::from_value(self.payload.clone()).map_err(invalid)?;
                if update.device_id.is_empty() {
                    return Err(ProtocolError::invalid_payload(self.kind, "empty deviceId"));
                }
                if update.key.is_empty() {
                    return Err(ProtocolError::invalid_payload(self.kind, "empty key"));
                }
                Ok(SyncJob::UpdateDeviceState(update))
            }
            JobKind::AddDevice => {
                let registration: DeviceRegistration =
                    serde_json::from_value(self.payload.clone()).map_err(invalid)?;
                if registration.device_id.is_empty() {
                    return Err(ProtocolError::invalid_payload(self.kind, "empty deviceId"));
                }
                Ok(SyncJob::AddDevice(registration))
            }
        }
    }
}

/// Payload of an `UpdateDeviceState` item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateUpdate {
    /// Device the record belongs to.
    pub device_id: DeviceId,
    /// Attribute key.
    pub key: String,
    /// Record to synchronize.
    pub record: StateRecord,
}

/// Payload of an `AddDevice` item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRegistration {
    /// Device to register.
    pub device_id: DeviceId,
}

/// A validated queue job.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncJob {
    /// Synchronize one attribute record.
    UpdateDeviceState(StateUpdate),
    /// Register a device remotely.
    AddDevice(DeviceRegistration),
}

impl SyncJob {
    /// Returns the device the job is about.
    pub fn device_id(&self) -> &DeviceId {
        match self {
            SyncJob::UpdateDeviceState(update) => &update.device_id,
            SyncJob::AddDevice(registration) => &registration.device_id,
        }
    }

    /// Returns the job kind.
    pub fn kind(&self) -> JobKind {
        match self {
            SyncJob::UpdateDeviceState(_) => JobKind::UpdateDeviceState,
            SyncJob::AddDevice(_) => JobKind::AddDevice,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::StateValue;

    #[test]
    fn update_item_decodes() {
        let item =
            QueueItem::update_device_state(&DeviceId::new("d1"), "online", &StateRecord::new(true, 1000));
        assert_eq!(item.retry_count, 0);
        assert!(item.next_retry_time.is_none());

        let SyncJob::UpdateDeviceState(update) = item.decode().unwrap() else {
            panic!("expected an update job");
        };
        assert_eq!(update.device_id.as_str(), "d1");
        assert_eq!(update.key, "online");
        assert_eq!(update.record.value, StateValue::Bool(true));
        assert_eq!(update.record.last_update, 1000);
    }

    #[test]
    fn missing_fields_are_rejected() {
        let item = QueueItem::new(JobKind::UpdateDeviceState, json!({ "deviceId": "d1" }));
        let err = item.decode().unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::InvalidPayload {
                kind: JobKind::UpdateDeviceState,
                ..
            }
        ));
    }

    #[test]
    fn mistyped_fields_are_rejected() {
        let cases = [
            json!({ "deviceId": 7, "key": "online", "record": { "value": true, "lastUpdate": 1 } }),
            json!({ "deviceId": "d1", "key": "online", "record": { "value": null, "lastUpdate": 1 } }),
            json!({ "deviceId": "d1", "key": "online", "record": { "value": true } }),
            json!({ "deviceId": "", "key": "online", "record": { "value": true, "lastUpdate": 1 } }),
            json!({ "deviceId": "d1", "key": "", "record": { "value": true, "lastUpdate": 1 } }),
            json!("not an object"),
        ];

        for payload in cases {
            let item = QueueItem::new(JobKind::UpdateDeviceState, payload.clone());
            assert!(item.decode().is_err(), "accepted {payload}");
        }
    }

    #[test]
    fn add_device_item() {
        let item = QueueItem::add_device(&DeviceId::new("d9"));
        let job = item.decode().unwrap();
        assert_eq!(job.kind(), JobKind::AddDevice);
        assert_eq!(job.device_id().as_str(), "d9");

        let empty = QueueItem::new(JobKind::AddDevice, json!({}));
        assert!(empty.decode().is_err());
    }

    #[test]
    fn due_check() {
        let mut item = QueueItem::add_device(&DeviceId::new("d1"));
        assert!(item.is_due(0));

        item.next_retry_time = Some(5000);
        assert!(!item.is_due(4999));
        assert!(item.is_due(5000));
        assert!(item.is_due(6000));
    }

    #[test]
    fn queue_item_json_shape() {
        let mut item = QueueItem::add_device(&DeviceId::new("d1"));
        item.retry_count = 2;
        item.next_retry_time = Some(10);

        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["kind"], "ADD_DEVICE");
        assert_eq!(json["retryCount"], 2);
        assert_eq!(json["nextRetryTime"], 10);
        assert!(json.get("lastAttemptTime").is_none());

        let back: QueueItem = serde_json::from_value(json).unwrap();
        assert_eq!(back, item);
    }
}
