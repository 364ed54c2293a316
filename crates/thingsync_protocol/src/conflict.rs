//! Last-write-wins comparison.

use crate::record::DeviceState;

/// Outcome of comparing a local timestamp with a remote one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// The local record is strictly newer; it should be pushed.
    LocalNewer,
    /// The remote record is strictly newer; it should be pulled.
    RemoteNewer,
    /// Both sides carry the same timestamp.
    Same,
}

impl Freshness {
    /// Compares two `lastUpdate` timestamps.
    pub fn compare(local: u64, remote: u64) -> Self {
        match local.cmp(&remote) {
            std::cmp::Ordering::Greater => Freshness::LocalNewer,
            std::cmp::Ordering::Less => Freshness::RemoteNewer,
            std::cmp::Ordering::Equal => Freshness::Same,
        }
    }

    /// Returns the freshness as seen from the other side.
    pub fn flip(self) -> Self {
        match self {
            Freshness::LocalNewer => Freshness::RemoteNewer,
            Freshness::RemoteNewer => Freshness::LocalNewer,
            Freshness::Same => Freshness::Same,
        }
    }
}

/// Returns the remote timestamp for `key`, treating absence as `0`.
pub fn remote_timestamp(state: Option<&DeviceState>, key: &str) -> u64 {
    state
        .and_then(|state| state.get(key))
        .map_or(0, |record| record.last_update)
}
