//! Register command implementation.

use std::path::Path;
use thingsync_cloud::{epoch_millis, register_thing, FileRemoteStore};

/// Runs the register command.
pub async fn run(
    path: &Path,
    device_type: &str,
    name: &str,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    if device_type.trim().is_empty() {
        return Err("device type must not be empty".into());
    }

    let store = FileRemoteStore::new(path);
    let thing = register_thing(&store, device_type, name, epoch_millis()).await?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&thing)?),
        _ => {
            println!("Registered {} ({})", thing.name, thing.device_type);
            println!("  ID:          {}", thing.id);
            println!("  Part number: {}", thing.part_number);
        }
    }
    Ok(())
}
