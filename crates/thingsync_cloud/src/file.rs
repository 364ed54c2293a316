//! JSON file backed remote store.

use crate::error::CloudResult;
use crate::store::{insert_thing, upsert_state, RemoteStore};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thingsync_protocol::{DeviceId, DeviceState, ThingRecord};
use tokio::sync::Mutex;

/// A remote store persisting every thing in a single JSON file.
///
/// The file holds a flat array of things and is created as `[]` on first
/// access. Writes go to a sibling temp file which then replaces the backing
/// file by rename; readers never see a partial array.
/// Read-modify-write cycles are serialized within the process.
#[derive(Debug)]
pub struct FileRemoteStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileRemoteStore {
    /// Creates a store backed by `path`. Nothing is touched until first use.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Returns the backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn ensure_exists(&self) -> CloudResult<()> {
        if tokio::fs::try_exists(&self.path).await? {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tracing::debug!(path = %self.path.display(), "creating empty cloud file");
        tokio::fs::write(&self.path, b"[]").await?;
        Ok(())
    }

    async fn load(&self) -> CloudResult<Vec<ThingRecord>> {
        self.ensure_exists().await?;
        let data = tokio::fs::read_to_string(&self.path).await?;
        let things = serde_json::from_str(&data).map_err(|e| {
            tracing::error!(path = %self.path.display(), error = %e, "cloud file is corrupt");
            e
        })?;
        Ok(things)
    }

    async fn save(&self, things: &[ThingRecord]) -> CloudResult<()> {
        let data = serde_json::to_vec(things)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for FileRemoteStore {
    async fn read_all(&self) -> CloudResult<Vec<ThingRecord>> {
        let _guard = self.lock.lock().await;
        self.load().await
    }

    async fn write(&self, id: &DeviceId, state: DeviceState) -> CloudResult<()> {
        let _guard = self.lock.lock().await;
        let mut things = self.load().await?;
        upsert_state(&mut things, id, state);
        self.save(&things).await
    }

    async fn delete_all(&self) -> CloudResult<()> {
        let _guard = self.lock.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn register(&self, thing: ThingRecord) -> CloudResult<()> {
        let _guard = self.lock.lock().await;
        let mut things = self.load().await?;
        insert_thing(&mut things, thing)?;
        self.save(&things).await
    }

    async fn delete(&self, id: &DeviceId) -> CloudResult<bool> {
        let _guard = self.lock.lock().await;
        let mut things = self.load().await?;
        let before = things.len();
        things.retain(|thing| &thing.id != id);
        if things.len() == before {
            return Ok(false);
        }
        self.save(&things).await?;
        Ok(true)
    }
}
