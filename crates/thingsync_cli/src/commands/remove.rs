//! Remove command implementation.

use std::path::Path;
use thingsync_cloud::{FileRemoteStore, RemoteStore};
use thingsync_protocol::DeviceId;

/// Removes one thing.
pub async fn run(path: &Path, id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = FileRemoteStore::new(path);
    if !store.delete(&DeviceId::new(id)).await? {
        return Err(format!("no thing with ID {id}").into());
    }
    println!("Removed {id}");
    Ok(())
}
