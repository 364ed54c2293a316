//! Simulate command implementation.

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thingsync_cloud::{epoch_millis, register_thing, FileRemoteStore, RemoteStore};
use thingsync_engine::{
    DeviceTransport, EngineConfig, QueueStats, StateValue, SyncEngine, TokioScheduler,
};
use thingsync_protocol::{DeviceId, DeviceState};

/// Device type used for things created by the simulator.
const SIMULATED_DEVICE_TYPE: &str = "sensor";

/// How long to wait for the queue to empty before giving up.
const SETTLE_ATTEMPTS: usize = 50;

/// Simulation result.
#[derive(Debug, Serialize)]
pub struct SimulationReport {
    /// Final local state of each simulated device.
    pub devices: Vec<DeviceReport>,
    /// Queue counters.
    pub queue: QueueSummary,
    /// Reconciliation passes that completed.
    pub reconcile_passes: u64,
}

/// Final state of one device.
#[derive(Debug, Serialize)]
pub struct DeviceReport {
    /// Device ID.
    pub id: String,
    /// Local state.
    pub state: DeviceState,
}

/// Queue counters at the end of the run.
#[derive(Debug, Serialize)]
pub struct QueueSummary {
    /// Items pushed.
    pub pushed: u64,
    /// Items completed.
    pub completed: u64,
    /// Retries scheduled.
    pub retried: u64,
    /// Items dropped as invalid.
    pub rejected: u64,
    /// Items dropped after exhausting retries.
    pub exhausted: u64,
    /// Items left in the queue.
    pub pending: usize,
}

impl QueueSummary {
    fn new(stats: QueueStats, pending: usize) -> Self {
        Self {
            pushed: stats.pushed,
            completed: stats.completed,
            retried: stats.retried,
            rejected: stats.rejected,
            exhausted: stats.exhausted,
            pending,
        }
    }
}

/// Runs the simulate command.
pub async fn run(
    path: &Path,
    devices: usize,
    seconds: u64,
    latency_ms: u64,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let remote = Arc::new(FileRemoteStore::new(path));
    let ids = device_ids(&remote, devices).await?;
    if ids.is_empty() {
        return Err("nothing to simulate, pass --devices 1 or more".into());
    }

    let latency = Duration::from_millis(latency_ms);
    let scheduler = Arc::new(TokioScheduler::current()?);
    let config = EngineConfig::default().with_transport_latency(latency);
    let engine = SyncEngine::new(config, remote, scheduler);
    engine.start()?;
    tracing::info!(devices = ids.len(), seconds, "simulation started");

    let transport = engine.transport();
    for id in &ids {
        transport.request_connect(id);
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    for tick in 0..seconds {
        ticker.tick().await;
        for id in &ids {
            transport.drain_battery(id);
            if tick % 3 == 2 {
                let mode = if tick % 2 == 0 { "eco" } else { "boost" };
                transport.request_set_attribute(id, "mode", StateValue::from(mode));
            }
        }
    }

    for id in &ids {
        transport.request_disconnect(id);
    }
    tokio::time::sleep(latency + Duration::from_millis(100)).await;

    let queue = engine.queue();
    for _ in 0..SETTLE_ATTEMPTS {
        if queue.is_empty() && !queue.is_draining() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    engine.stop();

    let snapshot = engine.store().snapshot();
    let report = SimulationReport {
        devices: ids
            .iter()
            .map(|id| DeviceReport {
                id: id.to_string(),
                state: snapshot.get(id).cloned().unwrap_or_default(),
            })
            .collect(),
        queue: QueueSummary::new(queue.stats(), queue.len()),
        reconcile_passes: engine.reconciler().stats().passes_completed,
    };

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => print_text_output(&report),
    }
    Ok(())
}

/// Uses the registered things, registering `count` sensors if there are none.
async fn device_ids(
    remote: &FileRemoteStore,
    count: usize,
) -> Result<Vec<DeviceId>, Box<dyn std::error::Error>> {
    let existing: Vec<DeviceId> = remote.read_all().await?.into_iter().map(|thing| thing.id).collect();
    if !existing.is_empty() {
        return Ok(existing);
    }

    let mut ids = Vec::with_capacity(count);
    for n in 1..=count {
        let name = format!("Simulated sensor {n}");
        let thing = register_thing(remote, SIMULATED_DEVICE_TYPE, &name, epoch_millis()).await?;
        ids.push(thing.id);
    }
    Ok(ids)
}

fn print_text_output(report: &SimulationReport) {
    println!("Simulated devices:");
    for device in &report.devices {
        println!("  {}", device.id);
        for (key, record) in &device.state {
            println!("    {key} = {}", record.value);
        }
    }
    println!();
    println!("Queue:");
    println!("  Pushed:    {}", report.queue.pushed);
    println!("  Completed: {}", report.queue.completed);
    println!("  Retried:   {}", report.queue.retried);
    println!("  Rejected:  {}", report.queue.rejected);
    println!("  Exhausted: {}", report.queue.exhausted);
    println!("  Pending:   {}", report.queue.pending);
    println!("Reconciliation passes: {}", report.reconcile_passes);
}
