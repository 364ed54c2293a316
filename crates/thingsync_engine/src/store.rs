//! Local device state store.

use crate::error::SyncResult;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thingsync_protocol::{Device, DeviceId, DeviceState, QueueItem, StateRecord};
use tracing::{debug, warn};

/// Whether a local write should be synchronized upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    /// Queue an `UpdateDeviceState` job for the write.
    Propagate,
    /// Apply locally only. Used when the value came from the remote store.
    LocalOnly,
}

/// Destination for jobs produced by local writes.
pub trait JobSink: Send + Sync {
    /// Accepts a job for eventual processing.
    fn push(&self, item: QueueItem) -> SyncResult<()>;
}

/// The single mutable source of local truth for device state.
///
/// Writes are unconditional: whatever arrives last wins locally, regardless
/// of timestamps. Freshness is only compared against the remote store.
pub struct LocalStore {
    devices: RwLock<HashMap<DeviceId, Device>>,
    sink: Arc<dyn JobSink>,
}

impl LocalStore {
    /// Creates an empty store that pushes jobs to `sink`.
    pub fn new(sink: Arc<dyn JobSink>) -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            sink,
        }
    }

    /// Writes one attribute record.
    ///
    /// An unknown device is created on the fly. With
    /// [`Propagation::Propagate`] an `UpdateDeviceState` job is pushed once
    /// the write is visible.
    pub fn apply_update(
        &self,
        device_id: &DeviceId,
        key: &str,
        record: StateRecord,
        propagation: Propagation,
    ) {
        let item = match propagation {
            Propagation::Propagate => Some(QueueItem::update_device_state(device_id, key, &record)),
            Propagation::LocalOnly => None,
        };

        {
            let mut devices = self.devices.write();
            let device = devices.entry(device_id.clone()).or_insert_with(|| {
                warn!(device_id = %device_id, "update for unknown device, creating it");
                Device::new(device_id.clone())
            });
            debug!(
                device_id = %device_id,
                key,
                last_update = record.last_update,
                ?propagation,
                "applied state update"
            );
            device.set(key, record);
        }

        if let Some(item) = item {
            if let Err(e) = self.sink.push(item) {
                warn!(device_id = %device_id, key, error = %e, "could not queue state update");
            }
        }
    }

    /// Registers a device with empty state and queues an `AddDevice` job.
    ///
    /// Returns false (and queues nothing) if the device already exists.
    pub fn add_device(&self, device_id: &DeviceId) -> bool {
        {
            let mut devices = self.devices.write();
            if devices.contains_key(device_id) {
                return false;
            }
            devices.insert(device_id.clone(), Device::new(device_id.clone()));
        }
        debug!(device_id = %device_id, "added device");

        if let Err(e) = self.sink.push(QueueItem::add_device(device_id)) {
            warn!(device_id = %device_id, error = %e, "could not queue device registration");
        }
        true
    }

    /// Removes a device and its state. Returns true if it existed.
    pub fn remove(&self, device_id: &DeviceId) -> bool {
        let removed = self.devices.write().remove(device_id).is_some();
        if removed {
            debug!(device_id = %device_id, "removed device");
        }
        removed
    }

    /// Returns a copy of every device's state, ordered by ID.
    pub fn snapshot(&self) -> BTreeMap<DeviceId, DeviceState> {
        self.devices
            .read()
            .iter()
            .map(|(id, device)| (id.clone(), device.state.clone()))
            .collect()
    }

    /// Returns the record for `(device_id, key)`.
    pub fn record(&self, device_id: &DeviceId, key: &str) -> Option<StateRecord> {
        self.devices
            .read()
            .get(device_id)
            .and_then(|device| device.record(key).cloned())
    }

    /// Returns a copy of one device.
    pub fn device(&self, device_id: &DeviceId) -> Option<Device> {
        self.devices.read().get(device_id).cloned()
    }

    /// Returns true if the device is resident.
    pub fn contains(&self, device_id: &DeviceId) -> bool {
        self.devices.read().contains_key(device_id)
    }

    /// Number of resident devices.
    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    /// Returns true if no device is resident.
    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore").field("devices", &self.len()).finish()
    }
}

/// A job sink that just records what it receives.
#[derive(Debug, Default)]
pub struct MemoryJobSink {
    items: Mutex<Vec<QueueItem>>,
}

impl MemoryJobSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every item received so far.
    pub fn items(&self) -> Vec<QueueItem> {
        self.items.lock().clone()
    }

    /// Number of items received so far.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Returns true if nothing was received.
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

impl JobSink for MemoryJobSink {
    fn push(&self, item: QueueItem) -> SyncResult<()> {
        self.items.lock().push(item);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use thingsync_protocol::{JobKind, StateValue, SyncJob};

    fn store() -> (LocalStore, Arc<MemoryJobSink>) {
        let sink = Arc::new(MemoryJobSink::new());
        (LocalStore::new(sink.clone()), sink)
    }

    #[test]
    fn propagating_write_queues_a_job() {
        let (store, sink) = store();
        let id = DeviceId::new("d1");

        store.apply_update(&id, "online", StateRecord::new(true, 1000), Propagation::Propagate);

        assert_eq!(store.record(&id, "online"), Some(StateRecord::new(true, 1000)));
        let items = sink.items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].kind, JobKind::UpdateDeviceState);
        let SyncJob::UpdateDeviceState(update) = items[0].decode().unwrap() else {
            panic!("expected an update job");
        };
        assert_eq!(update.key, "online");
        assert_eq!(update.record, StateRecord::new(true, 1000));
    }

    #[test]
    fn local_only_write_queues_nothing() {
        let (store, sink) = store();
        let id = DeviceId::new("d1");

        store.apply_update(&id, "status", StateRecord::new("idle", 5), Propagation::LocalOnly);

        assert_eq!(store.record(&id, "status").unwrap().value, StateValue::from("idle"));
        assert!(sink.is_empty());
    }

    #[test]
    fn writes_are_unconditional() {
        let (store, _) = store();
        let id = DeviceId::new("d1");

        store.apply_update(&id, "k", StateRecord::new("new", 200), Propagation::LocalOnly);
        store.apply_update(&id, "k", StateRecord::new("old", 100), Propagation::LocalOnly);

        assert_eq!(store.record(&id, "k"), Some(StateRecord::new("old", 100)));
    }

    #[test]
    fn add_device_once() {
        let (store, sink) = store();
        let id = DeviceId::new("d1");

        assert!(store.add_device(&id));
        assert!(!store.add_device(&id));

        assert_eq!(sink.len(), 1);
        assert_eq!(sink.items()[0].kind, JobKind::AddDevice);
        assert!(store.device(&id).unwrap().state.is_empty());
    }

    #[test]
    fn remove_is_idempotent() {
        let (store, _) = store();
        let id = DeviceId::new("d1");
        store.apply_update(&id, "k", StateRecord::new(1, 1), Propagation::LocalOnly);

        assert!(store.remove(&id));
        assert!(!store.remove(&id));
        assert!(store.is_empty());
        assert!(store.record(&id, "k").is_none());
    }

    #[test]
    fn snapshot_is_ordered_copy() {
        let (store, _) = store();
        store.apply_update(&DeviceId::new("b"), "k", StateRecord::new(2, 2), Propagation::LocalOnly);
        store.apply_update(&DeviceId::new("a"), "k", StateRecord::new(1, 1), Propagation::LocalOnly);

        let snapshot = store.snapshot();
        let ids: Vec<&str> = snapshot.keys().map(DeviceId::as_str).collect();
        assert_eq!(ids, vec!["a", "b"]);

        store.remove(&DeviceId::new("a"));
        assert_eq!(snapshot.len(), 2);
        assert_eq!(store.len(), 1);
    }
}
