//! In-process remote store.

use crate::error::{CloudError, CloudResult};
use crate::store::{insert_thing, upsert_state, RemoteStore};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use thingsync_protocol::{DeviceId, DeviceState, StateRecord, ThingRecord};

/// A remote store kept in memory.
///
/// Besides serving as a stand-in cloud for demos, it can simulate outages
/// (`set_offline`) and flaky writes (`fail_next_writes`), and it counts calls
/// so tests can assert whether the remote side was touched at all.
#[derive(Debug, Default)]
pub struct MemoryRemoteStore {
    things: RwLock<Vec<ThingRecord>>,
    offline: AtomicBool,
    failing_writes: AtomicU32,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl MemoryRemoteStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail (or succeed again).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Makes the next `count` writes fail.
    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Number of read calls served or refused so far.
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of write calls served or refused so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Returns a copy of every stored thing.
    pub fn things(&self) -> Vec<ThingRecord> {
        self.things.read().clone()
    }

    /// Returns the stored record for `(id, key)`.
    pub fn record(&self, id: &str, key: &str) -> Option<StateRecord> {
        self.things
            .read()
            .iter()
            .find(|thing| thing.id.as_str() == id)
            .and_then(|thing| thing.record(key).cloned())
    }

    /// Sets a single record directly, bypassing fault injection and counters.
    pub fn seed(&self, id: &str, key: &str, record: StateRecord) {
        let mut things = self.things.write();
        let id = DeviceId::new(id);
        let mut state = things
            .iter()
            .find(|thing| thing.id == id)
            .and_then(|thing| thing.state.clone())
            .unwrap_or_default();
        state.insert(key.to_string(), record);
        upsert_state(&mut things, &id, state);
    }

    fn check_online(&self) -> CloudResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(CloudError::Unavailable("remote store offline".into()))
        } else {
            Ok(())
        }
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn read_all(&self) -> CloudResult<Vec<ThingRecord>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        Ok(self.things.read().clone())
    }

    async fn read_one(&self, id: &DeviceId) -> CloudResult<Option<ThingRecord>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        Ok(self.things.read().iter().find(|thing| &thing.id == id).cloned())
    }

    async fn write(&self, id: &DeviceId, state: DeviceState) -> CloudResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        if self.take_injected_failure() {
            return Err(CloudError::Unavailable("injected write failure".into()));
        }
        upsert_state(&mut self.things.write(), id, state);
        Ok(())
    }

    async fn delete_all(&self) -> CloudResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        self.things.write().clear();
        Ok(())
    }

    async fn register(&self, thing: ThingRecord) -> CloudResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        insert_thing(&mut self.things.write(), thing)
    }

    async fn delete(&self, id: &DeviceId) -> CloudResult<bool> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        let mut things = self.things.write();
        let before = things.len();
        things.retain(|thing| &thing.id != id);
        Ok(things.len() != before)
    }
}
