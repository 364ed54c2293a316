//! The remote store contract.

use crate::error::{CloudError, CloudResult};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};
use thingsync_protocol::{part_number, DeviceId, DeviceState, ThingRecord};
use uuid::Uuid;

/// Authoritative per-device state held outside the process.
///
/// Every method is an I/O boundary; an `Err` means the store could not be
/// read or written and the caller may retry later.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Reads every registered thing.
    async fn read_all(&self) -> CloudResult<Vec<ThingRecord>>;

    /// Reads a single thing.
    async fn read_one(&self, id: &DeviceId) -> CloudResult<Option<ThingRecord>> {
        Ok(self
            .read_all()
            .await?
            .into_iter()
            .find(|thing| &thing.id == id))
    }

    /// Replaces the state of a thing.
    ///
    /// Writing to an unknown ID registers a placeholder thing carrying the
    /// state, so that a device first seen over the radio is not lost.
    async fn write(&self, id: &DeviceId, state: DeviceState) -> CloudResult<()>;

    /// Removes every thing.
    async fn delete_all(&self) -> CloudResult<()>;

    /// Registers a new thing.
    async fn register(&self, thing: ThingRecord) -> CloudResult<()>;

    /// Removes one thing. Returns true if it existed.
    async fn delete(&self, id: &DeviceId) -> CloudResult<bool>;
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Registers a new thing of `device_type`, assigning a random ID and the
/// next part number for that type.
pub async fn register_thing(
    store: &dyn RemoteStore,
    device_type: &str,
    name: &str,
    now: u64,
) -> CloudResult<ThingRecord> {
    let things = store.read_all().await?;
    let existing = things
        .iter()
        .filter(|thing| thing.device_type == device_type)
        .count();

    let thing = ThingRecord::new(
        Uuid::new_v4().to_string(),
        device_type,
        part_number(existing + 1),
        name,
        now,
    );
    store.register(thing.clone()).await?;

    tracing::info!(
        id = %thing.id,
        device_type,
        part_number = %thing.part_number,
        "registered thing"
    );
    Ok(thing)
}

/// Counts things per device type. The `"total"` entry holds the overall
/// count.
pub fn thing_counts(things: &[ThingRecord]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for thing in things {
        *counts.entry(thing.device_type.clone()).or_insert(0) += 1;
    }
    counts.insert("total".to_string(), things.len());
    counts
}

/// Applies a state write to an in-memory thing list.
pub(crate) fn upsert_state(things: &mut Vec<ThingRecord>, id: &DeviceId, state: DeviceState) {
    match things.iter_mut().find(|thing| &thing.id == id) {
        Some(thing) => thing.state = Some(state),
        None => {
            tracing::warn!(device_id = %id, "state written for unregistered thing, creating placeholder");
            let mut thing = ThingRecord::placeholder(id.clone(), epoch_millis());
            thing.state = Some(state);
            things.push(thing);
        }
    }
}

/// Adds a thing to an in-memory thing list, rejecting duplicate IDs.
pub(crate) fn insert_thing(things: &mut Vec<ThingRecord>, thing: ThingRecord) -> CloudResult<()> {
    if things.iter().any(|existing| existing.id == thing.id) {
        return Err(CloudError::AlreadyExists(thing.id));
    }
    things.push(thing);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use thingsync_protocol::StateRecord;

    fn thing(id: &str, device_type: &str) -> ThingRecord {
        ThingRecord::new(id, device_type, "1.234-567.1", id, 1)
    }

    #[test]
    fn counts_by_type() {
        let things = vec![thing("a", "pump"), thing("b", "pump"), thing("c", "valve")];
        let counts = thing_counts(&things);
        assert_eq!(counts["pump"], 2);
        assert_eq!(counts["valve"], 1);
        assert_eq!(counts["total"], 3);

        assert_eq!(thing_counts(&[])["total"], 0);
    }

    #[test]
    fn upsert_replaces_existing_state() {
        let mut things = vec![thing("a", "pump")];
        let mut state = DeviceState::new();
        state.insert("online".into(), StateRecord::new(true, 10));

        upsert_state(&mut things, &DeviceId::new("a"), state.clone());
        assert_eq!(things.len(), 1);
        assert_eq!(things[0].state.as_ref(), Some(&state));
    }

    #[test]
    fn upsert_creates_placeholder() {
        let mut things = Vec::new();
        let mut state = DeviceState::new();
        state.insert("online".into(), StateRecord::new(true, 10));

        upsert_state(&mut things, &DeviceId::new("new"), state);
        assert_eq!(things.len(), 1);
        assert_eq!(things[0].id.as_str(), "new");
        assert_eq!(things[0].record("online").unwrap().last_update, 10);
    }

    #[test]
    fn insert_rejects_duplicates() {
        let mut things = vec![thing("a", "pump")];
        assert!(insert_thing(&mut things, thing("b", "pump")).is_ok());
        assert!(matches!(
            insert_thing(&mut things, thing("a", "valve")),
            Err(CloudError::AlreadyExists(_))
        ));
        assert_eq!(things.len(), 2);
    }
}
