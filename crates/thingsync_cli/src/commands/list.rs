//! List command implementation.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use thingsync_cloud::{thing_counts, FileRemoteStore, RemoteStore};
use thingsync_protocol::ThingRecord;

/// Listing result.
#[derive(Debug, Serialize)]
pub struct ListResult {
    /// Every registered thing.
    pub things: Vec<ThingRecord>,
    /// Count per device type plus `total`.
    pub counts: BTreeMap<String, usize>,
}

/// Runs the list command.
pub async fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = FileRemoteStore::new(path);
    let things = store.read_all().await?;
    let result = ListResult {
        counts: thing_counts(&things),
        things,
    };

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

fn print_text_output(result: &ListResult) {
    if result.things.is_empty() {
        println!("No things registered.");
        return;
    }

    for thing in &result.things {
        println!(
            "{:<38} {:<12} {:<16} {}",
            thing.id.as_str(),
            thing.device_type,
            thing.part_number,
            thing.name
        );
        if let Some(state) = &thing.state {
            for (key, record) in state {
                println!("    {key} = {} (at {})", record.value, record.last_update);
            }
        }
    }

    println!();
    for (device_type, count) in &result.counts {
        println!("{device_type}: {count}");
    }
}
