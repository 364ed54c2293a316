//! Integration tests for the sync engine against in-memory remote stores.

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thingsync_cloud::{MemoryRemoteStore, RemoteStore};
use thingsync_engine::{
    DeviceId, DeviceTransport, EngineConfig, JobHandler, JobKind, Propagation, QueueItem,
    RetryConfig, StateRecord, StateValue, SyncEngine, SyncError, SyncJob, SyncQueue,
    TokioScheduler, ONLINE_KEY,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("thingsync_engine=debug")
        .with_test_writer()
        .try_init();
}

fn engine_with(remote: Arc<MemoryRemoteStore>) -> SyncEngine {
    init_tracing();
    let scheduler = Arc::new(TokioScheduler::with_epoch(0).unwrap());
    SyncEngine::new(EngineConfig::default(), remote, scheduler)
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// Records how many jobs run at once.
#[derive(Default)]
struct ConcurrencyProbe {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    handled: AtomicUsize,
}

#[async_trait]
impl JobHandler for ConcurrencyProbe {
    async fn handle(&self, _job: SyncJob) -> bool {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.handled.fetch_add(1, Ordering::SeqCst);
        true
    }
}

#[tokio::test(start_paused = true)]
async fn empty_drain_schedules_nothing() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let engine = engine_with(remote.clone());

    assert_eq!(engine.flush().await, 0);
    assert_eq!(engine.flush().await, 0);

    assert_eq!(engine.queue().scheduled_wakeups(), 0);
    assert_eq!(remote.read_count(), 0);
    assert_eq!(remote.write_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn one_drain_at_a_time() {
    init_tracing();
    let probe = Arc::new(ConcurrencyProbe::default());
    let scheduler = Arc::new(TokioScheduler::with_epoch(0).unwrap());
    let queue = SyncQueue::new(RetryConfig::default(), scheduler, probe.clone());

    let mut tasks = Vec::new();
    for n in 0..20 {
        let queue = Arc::clone(&queue);
        tasks.push(tokio::spawn(async move {
            let id = DeviceId::new(format!("d{n}"));
            queue
                .push(QueueItem::update_device_state(&id, "online", &StateRecord::new(true, 1)))
                .unwrap();
            queue.drain().await
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(probe.handled.load(Ordering::SeqCst), 20);
    assert_eq!(probe.max_in_flight.load(Ordering::SeqCst), 1);
    assert!(queue.is_empty());
    assert!(!queue.is_draining());
}

#[tokio::test(start_paused = true)]
async fn backoff_doubles_then_gives_up() {
    let remote = Arc::new(MemoryRemoteStore::new());
    remote.set_offline(true);
    let engine = engine_with(remote.clone());
    let queue = engine.queue();

    queue
        .push(QueueItem::update_device_state(
            &DeviceId::new("d1"),
            ONLINE_KEY,
            &StateRecord::new(true, 1000),
        ))
        .unwrap();

    let mut delays = Vec::new();
    let mut previous_due: Option<u64> = None;
    for _ in 0..2400 {
        if queue.stats().exhausted == 1 {
            break;
        }
        if let Some(item) = queue.pending().first() {
            if delays.len() < item.retry_count as usize {
                let attempt = item.last_attempt_time.unwrap();
                let due = item.next_retry_time.unwrap();
                if let Some(previous_due) = previous_due {
                    assert!(attempt >= previous_due, "processed before its retry time");
                }
                delays.push(due - attempt);
                previous_due = Some(due);
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    assert_eq!(delays, vec![2000, 4000, 8000, 16000, 32000]);
    assert_eq!(queue.stats().exhausted, 1);
    assert_eq!(queue.stats().retried, 5);
    assert_eq!(remote.read_count(), 6);
    assert!(queue.is_empty());
    assert_eq!(queue.scheduled_wakeups(), 0);
}

#[tokio::test(start_paused = true)]
async fn remote_newer_record_wins() {
    let remote = Arc::new(MemoryRemoteStore::new());
    remote.seed("d1", "k", StateRecord::new("B", 200));
    let engine = engine_with(remote.clone());
    let id = DeviceId::new("d1");

    engine
        .store()
        .apply_update(&id, "k", StateRecord::new("A", 100), Propagation::LocalOnly);
    engine
        .queue()
        .push(QueueItem::update_device_state(&id, "k", &StateRecord::new("A", 100)))
        .unwrap();
    settle().await;

    assert_eq!(engine.store().record(&id, "k"), Some(StateRecord::new("B", 200)));
    assert_eq!(remote.record("d1", "k"), Some(StateRecord::new("B", 200)));
    assert_eq!(remote.write_count(), 0);
    assert_eq!(engine.queue().stats().pushed, 1);
    assert!(engine.queue().is_empty());
}

#[tokio::test(start_paused = true)]
async fn local_newer_record_wins() {
    let remote = Arc::new(MemoryRemoteStore::new());
    remote.seed("d1", "k", StateRecord::new("B", 200));
    let engine = engine_with(remote.clone());
    let id = DeviceId::new("d1");

    engine
        .store()
        .apply_update(&id, "k", StateRecord::new("A", 300), Propagation::Propagate);
    settle().await;

    assert_eq!(remote.record("d1", "k"), Some(StateRecord::new("A", 300)));
    assert_eq!(engine.store().record(&id, "k"), Some(StateRecord::new("A", 300)));
    assert_eq!(engine.queue().stats().completed, 1);
}

#[tokio::test(start_paused = true)]
async fn stale_queued_write_does_not_roll_back_local_state() {
    let remote = Arc::new(MemoryRemoteStore::new());
    remote.seed("d1", "k", StateRecord::new("B", 200));
    let engine = engine_with(remote.clone());
    let id = DeviceId::new("d1");

    engine
        .store()
        .apply_update(&id, "k", StateRecord::new("A", 100), Propagation::Propagate);
    engine
        .store()
        .apply_update(&id, "k", StateRecord::new("C", 300), Propagation::Propagate);
    settle().await;

    assert_eq!(engine.store().record(&id, "k"), Some(StateRecord::new("C", 300)));
    assert_eq!(remote.record("d1", "k"), Some(StateRecord::new("C", 300)));
    assert_eq!(engine.queue().stats().completed, 2);
    assert!(engine.queue().is_empty());
}

#[tokio::test(start_paused = true)]
async fn local_only_writes_do_not_feed_back() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let engine = engine_with(remote.clone());

    engine.store().apply_update(
        &DeviceId::new("d1"),
        "status",
        StateRecord::new("idle", 10),
        Propagation::LocalOnly,
    );
    settle().await;

    assert_eq!(engine.queue().stats().pushed, 0);
    assert!(engine.queue().is_empty());
    assert_eq!(remote.write_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn connect_event_reaches_remote() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let engine = engine_with(remote.clone());
    engine.start().unwrap();
    let id = DeviceId::new("d1");

    assert!(engine.transport().request_connect(&id));
    tokio::time::sleep(Duration::from_millis(1000)).await;
    settle().await;

    assert_eq!(
        engine.store().record(&id, ONLINE_KEY),
        Some(StateRecord::new(true, 1000))
    );
    assert_eq!(remote.record("d1", ONLINE_KEY), Some(StateRecord::new(true, 1000)));
    assert!(engine.queue().is_empty());

    engine.stop();
}

#[tokio::test(start_paused = true)]
async fn attribute_and_battery_events_reach_remote() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let engine = engine_with(remote.clone());
    engine.start().unwrap();
    let id = DeviceId::new("d1");

    engine.transport().request_connect(&id);
    tokio::time::sleep(Duration::from_millis(1010)).await;
    engine.transport().request_set_attribute(&id, "mode", StateValue::from("eco"));
    engine.transport().drain_battery(&id);
    tokio::time::sleep(Duration::from_millis(1010)).await;

    let value = |key: &str| remote.record("d1", key).map(|record| record.value);
    assert_eq!(value("mode"), Some(StateValue::from("eco")));
    assert_eq!(value("battery"), Some(StateValue::from(99u8)));
    assert_eq!(value(ONLINE_KEY), Some(StateValue::Bool(true)));

    engine.stop();
}

#[tokio::test(start_paused = true)]
async fn invalid_payload_never_reaches_remote() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let engine = engine_with(remote.clone());

    engine
        .queue()
        .push(QueueItem::new(JobKind::UpdateDeviceState, json!({ "deviceId": "d1" })))
        .unwrap();
    settle().await;

    assert_eq!(remote.read_count(), 0);
    assert_eq!(remote.write_count(), 0);
    assert_eq!(engine.queue().stats().rejected, 1);
    assert!(engine.queue().is_empty());
    assert_eq!(engine.queue().scheduled_wakeups(), 0);
}

#[tokio::test(start_paused = true)]
async fn queued_update_survives_outage() {
    let remote = Arc::new(MemoryRemoteStore::new());
    remote.set_offline(true);
    let engine = engine_with(remote.clone());
    let id = DeviceId::new("d1");

    engine
        .store()
        .apply_update(&id, "k", StateRecord::new(1, 500), Propagation::Propagate);
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(engine.queue().stats().retried, 2);

    remote.set_offline(false);
    tokio::time::sleep(Duration::from_secs(4)).await;

    assert_eq!(remote.record("d1", "k"), Some(StateRecord::new(1, 500)));
    assert!(engine.queue().is_empty());
    assert_eq!(engine.queue().stats().completed, 1);
}

#[tokio::test(start_paused = true)]
async fn added_device_is_registered_remotely() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let engine = engine_with(remote.clone());

    assert!(engine.store().add_device(&DeviceId::new("d1")));
    settle().await;

    let thing = remote.read_one(&DeviceId::new("d1")).await.unwrap().unwrap();
    assert!(thing.state.is_none());
    assert_eq!(engine.queue().stats().completed, 1);
}

#[tokio::test(start_paused = true)]
async fn start_pulls_remote_state() {
    let remote = Arc::new(MemoryRemoteStore::new());
    remote.seed("d2", "status", StateRecord::new("busy", 42));
    let engine = engine_with(remote.clone());

    engine.start().unwrap();
    settle().await;

    assert_eq!(
        engine.store().record(&DeviceId::new("d2"), "status"),
        Some(StateRecord::new("busy", 42))
    );
    assert_eq!(engine.queue().stats().pushed, 0);
    assert_eq!(engine.reconciler().stats().passes_completed, 1);

    engine.stop();
}

#[tokio::test(start_paused = true)]
async fn reconcile_pushes_local_changes() {
    let remote = Arc::new(MemoryRemoteStore::new());
    remote.seed("d1", "k", StateRecord::new("old", 100));
    let engine = engine_with(remote.clone());
    let id = DeviceId::new("d1");

    engine
        .store()
        .apply_update(&id, "k", StateRecord::new("new", 300), Propagation::LocalOnly);
    engine
        .store()
        .apply_update(&id, "extra", StateRecord::new(true, 50), Propagation::LocalOnly);

    let report = engine.sync_now().await.unwrap();
    assert_eq!(report.pushed, 2);
    settle().await;

    assert_eq!(remote.record("d1", "k"), Some(StateRecord::new("new", 300)));
    assert_eq!(remote.record("d1", "extra"), Some(StateRecord::new(true, 50)));

    let report = engine.sync_now().await.unwrap();
    assert_eq!(report.pushed, 0);
    assert_eq!(report.in_sync, 2);
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_everything() {
    let remote = Arc::new(MemoryRemoteStore::new());
    remote.set_offline(true);
    let engine = engine_with(remote.clone());
    engine.start().unwrap();
    let id = DeviceId::new("d1");

    engine
        .store()
        .apply_update(&id, "k", StateRecord::new(1, 1), Propagation::Propagate);
    engine.transport().request_connect(&id);
    settle().await;
    assert_eq!(engine.queue().scheduled_wakeups(), 1);

    engine.stop();
    let reads = remote.read_count();
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert_eq!(remote.read_count(), reads);
    assert_eq!(engine.queue().scheduled_wakeups(), 0);
    assert!(engine.store().record(&id, ONLINE_KEY).is_none());
    assert!(!engine.reconciler().is_started());
    assert!(matches!(engine.start(), Err(SyncError::QueueClosed)));
}

#[test]
fn start_outside_runtime_uses_scheduler() {
    init_tracing();
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let remote = Arc::new(MemoryRemoteStore::new());
    let engine = rt.block_on(async { engine_with(remote.clone()) });

    engine.start().unwrap();
    rt.block_on(async { tokio::time::sleep(Duration::from_millis(10)).await });

    assert!(engine.reconciler().is_started());
    assert_eq!(remote.read_count(), 1);
    engine.stop();
}
