//! The job handler wiring the sync queue to the remote store.

use crate::queue::JobHandler;
use crate::remote_sync::sync_one;
use crate::scheduler::Scheduler;
use crate::store::{LocalStore, Propagation};
use async_trait::async_trait;
use std::sync::{Arc, OnceLock, Weak};
use thingsync_cloud::{CloudError, RemoteStore};
use thingsync_protocol::{DeviceRegistration, StateRecord, StateUpdate, SyncJob, ThingRecord};
use tracing::{debug, warn};

/// Handles queue jobs against a [`RemoteStore`].
///
/// Records that turn out to be older than the remote copy are replaced
/// locally with [`Propagation::LocalOnly`], so pulling never produces a new
/// job. The local store is attached after construction because the store
/// itself pushes into the queue that owns this handler.
pub struct StateSyncHandler {
    remote: Arc<dyn RemoteStore>,
    clock: Arc<dyn Scheduler>,
    store: OnceLock<Weak<LocalStore>>,
}

impl StateSyncHandler {
    /// Creates a handler with no local store attached.
    pub fn new(remote: Arc<dyn RemoteStore>, clock: Arc<dyn Scheduler>) -> Self {
        Self {
            remote,
            clock,
            store: OnceLock::new(),
        }
    }

    /// Attaches the local store that receives pulled records.
    ///
    /// Only the first call has an effect.
    pub fn bind_store(&self, store: &Arc<LocalStore>) {
        if self.store.set(Arc::downgrade(store)).is_err() {
            warn!("local store already bound to sync handler");
        }
    }

    fn local_store(&self) -> Option<Arc<LocalStore>> {
        self.store.get().and_then(Weak::upgrade)
    }

    async fn update_state(&self, update: StateUpdate) -> bool {
        let store = self.local_store();
        let apply = |record: StateRecord| match &store {
            Some(store) => {
                // The job may be stale: a later local write can already be
                // newer than the remote copy.
                let current = store.record(&update.device_id, &update.key);
                if current.is_some_and(|current| current.last_update >= record.last_update) {
                    debug!(
                        device_id = %update.device_id,
                        key = %update.key,
                        "local record newer than pulled record, keeping it"
                    );
                    return;
                }
                store.apply_update(&update.device_id, &update.key, record, Propagation::LocalOnly)
            }
            None => debug!(device_id = %update.device_id, key = %update.key, "no local store to apply pulled record"),
        };
        sync_one(
            self.remote.as_ref(),
            &update.device_id,
            &update.key,
            &update.record,
            Some(&apply),
        )
        .await
    }

    async fn add_device(&self, registration: DeviceRegistration) -> bool {
        let id = registration.device_id;
        match self.remote.read_one(&id).await {
            Ok(Some(_)) => {
                debug!(device_id = %id, "device already registered remotely");
                true
            }
            Ok(None) => {
                let thing = ThingRecord::placeholder(id.clone(), self.clock.now_millis());
                match self.remote.register(thing).await {
                    Ok(()) | Err(CloudError::AlreadyExists(_)) => {
                        debug!(device_id = %id, "registered device remotely");
                        true
                    }
                    Err(e) => {
                        warn!(device_id = %id, error = %e, "device registration failed");
                        false
                    }
                }
            }
            Err(e) => {
                warn!(device_id = %id, error = %e, "device lookup failed");
                false
            }
        }
    }
}

#[async_trait]
impl JobHandler for StateSyncHandler {
    async fn handle(&self, job: SyncJob) -> bool {
        match job {
            SyncJob::UpdateDeviceState(update) => self.update_state(update).await,
            SyncJob::AddDevice(registration) => self.add_device(registration).await,
        }
    }
}

impl std::fmt::Debug for StateSyncHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateSyncHandler")
            .field("store_bound", &self.store.get().is_some())
            .finish()
    }
}
