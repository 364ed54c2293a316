//! Last-write-wins synchronization of a single record.

use crate::error::SyncResult;
use thingsync_cloud::RemoteStore;
use thingsync_protocol::{remote_timestamp, DeviceId, Freshness, StateRecord};
use tracing::{debug, warn};

/// Callback applying a pulled remote record locally.
pub type ApplyLocal<'a> = &'a (dyn Fn(StateRecord) + Send + Sync);

/// What a sync of one record ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The local record was newer and was written remotely.
    Pushed,
    /// The remote record was newer and was handed to the local side.
    Pulled,
    /// Both sides carry the same timestamp.
    InSync,
}

/// Reconciles one `(device, key)` record with the remote store.
///
/// A missing remote device or key counts as timestamp 0, so any local write
/// wins against it. When pushing, the other keys of the remote device are
/// preserved.
pub async fn sync_record(
    remote: &dyn RemoteStore,
    device_id: &DeviceId,
    key: &str,
    local: &StateRecord,
    apply_local: Option<ApplyLocal<'_>>,
) -> SyncResult<SyncOutcome> {
    let thing = remote.read_one(device_id).await?;
    let remote_state = thing.as_ref().and_then(|thing| thing.state.as_ref());
    let remote_ts = remote_timestamp(remote_state, key);

    match Freshness::compare(local.last_update, remote_ts) {
        Freshness::LocalNewer => {
            let mut state = remote_state.cloned().unwrap_or_default();
            state.insert(key.to_string(), local.clone());
            remote.write(device_id, state).await?;
            debug!(device_id = %device_id, key, local_ts = local.last_update, remote_ts, "pushed record");
            Ok(SyncOutcome::Pushed)
        }
        Freshness::RemoteNewer => {
            let record = remote_state.and_then(|state| state.get(key));
            if let (Some(apply), Some(record)) = (apply_local, record) {
                apply(record.clone());
            }
            debug!(device_id = %device_id, key, local_ts = local.last_update, remote_ts, "remote record is newer");
            Ok(SyncOutcome::Pulled)
        }
        Freshness::Same => Ok(SyncOutcome::InSync),
    }
}

/// Like [`sync_record`], but reports only whether the remote store could be
/// reached. A `false` result means the caller should retry later.
pub async fn sync_one(
    remote: &dyn RemoteStore,
    device_id: &DeviceId,
    key: &str,
    local: &StateRecord,
    apply_local: Option<ApplyLocal<'_>>,
) -> bool {
    match sync_record(remote, device_id, key, local, apply_local).await {
        Ok(_) => true,
        Err(e) => {
            warn!(device_id = %device_id, key, error = %e, "remote sync failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use thingsync_cloud::MemoryRemoteStore;

    fn id() -> DeviceId {
        DeviceId::new("d1")
    }

    #[tokio::test]
    async fn local_newer_is_pushed() {
        let remote = MemoryRemoteStore::new();
        remote.seed("d1", "k", StateRecord::new("B", 200));
        remote.seed("d1", "other", StateRecord::new("keep", 50));

        let outcome = sync_record(&remote, &id(), "k", &StateRecord::new("A", 300), None)
            .await
            .unwrap();

        assert_eq!(outcome, SyncOutcome::Pushed);
        assert_eq!(remote.record("d1", "k"), Some(StateRecord::new("A", 300)));
        assert_eq!(remote.record("d1", "other"), Some(StateRecord::new("keep", 50)));
    }

    #[tokio::test]
    async fn remote_newer_is_handed_back() {
        let remote = MemoryRemoteStore::new();
        remote.seed("d1", "k", StateRecord::new("B", 200));
        let applied = Mutex::new(Vec::new());
        let apply = |record: StateRecord| applied.lock().push(record);

        let outcome = sync_record(&remote, &id(), "k", &StateRecord::new("A", 100), Some(&apply))
            .await
            .unwrap();

        assert_eq!(outcome, SyncOutcome::Pulled);
        assert_eq!(*applied.lock(), vec![StateRecord::new("B", 200)]);
        assert_eq!(remote.write_count(), 0);
    }

    #[tokio::test]
    async fn equal_timestamps_do_nothing() {
        let remote = MemoryRemoteStore::new();
        remote.seed("d1", "k", StateRecord::new("B", 200));

        let outcome = sync_record(&remote, &id(), "k", &StateRecord::new("A", 200), None)
            .await
            .unwrap();

        assert_eq!(outcome, SyncOutcome::InSync);
        assert_eq!(remote.write_count(), 0);
        assert_eq!(remote.record("d1", "k"), Some(StateRecord::new("B", 200)));
    }

    #[tokio::test]
    async fn unknown_device_is_created() {
        let remote = MemoryRemoteStore::new();

        assert!(sync_one(&remote, &id(), "online", &StateRecord::new(true, 1), None).await);
        assert_eq!(remote.record("d1", "online"), Some(StateRecord::new(true, 1)));
        assert_eq!(remote.things().len(), 1);
    }

    #[tokio::test]
    async fn unreachable_remote_returns_false() {
        let remote = MemoryRemoteStore::new();
        remote.set_offline(true);
        assert!(!sync_one(&remote, &id(), "k", &StateRecord::new(1, 1), None).await);

        remote.set_offline(false);
        remote.fail_next_writes(1);
        assert!(!sync_one(&remote, &id(), "k", &StateRecord::new(1, 1), None).await);
        assert!(sync_one(&remote, &id(), "k", &StateRecord::new(1, 1), None).await);
    }
}
