//! Reset command implementation.

use std::path::Path;
use thingsync_cloud::{FileRemoteStore, RemoteStore};

/// Removes every thing.
pub async fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let store = FileRemoteStore::new(path);
    store.delete_all().await?;
    println!("Removed every thing from {}", path.display());
    Ok(())
}
