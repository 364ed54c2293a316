//! Periodic reconciliation between the local store and the remote store.

use crate::error::{SyncError, SyncResult};
use crate::scheduler::{Scheduler, TimerHandle};
use crate::store::{JobSink, LocalStore, Propagation};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use thingsync_cloud::RemoteStore;
use thingsync_protocol::{DeviceId, DeviceState, Freshness, QueueItem, StateRecord};
use tracing::{debug, error, info, warn};

/// Whether a reconciliation pass is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileState {
    /// No pass is running.
    Idle,
    /// A pass is running.
    Running,
}

impl ReconcileState {
    /// Returns true if a new pass may start.
    pub fn can_start_pass(&self) -> bool {
        matches!(self, ReconcileState::Idle)
    }
}

/// Summary of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Remote devices examined.
    pub devices: usize,
    /// Records copied from remote to local.
    pub pulled: usize,
    /// Records queued for upload.
    pub pushed: usize,
    /// Records already identical on both sides.
    pub in_sync: usize,
    /// Records that could not be handled.
    pub failures: usize,
}

/// Cumulative statistics across passes.
#[derive(Debug, Clone, Default)]
pub struct ReconcileStats {
    /// Passes that read the remote snapshot successfully.
    pub passes_completed: u64,
    /// Passes aborted because the remote snapshot could not be read.
    pub passes_failed: u64,
    /// Total records pulled.
    pub records_pulled: u64,
    /// Total records pushed.
    pub records_pushed: u64,
    /// Last pass error message.
    pub last_error: Option<String>,
}

enum KeyAction {
    Pulled,
    Pushed,
    InSync,
}

/// Brings the local store in line with the remote store on a timer.
///
/// For every remote record, a strictly newer or missing local copy is
/// replaced (locally only) and a strictly newer local copy is queued for
/// upload. On equal timestamps the remote value wins. Local keys unknown to
/// the remote store are queued as well. Only one pass runs at a time.
pub struct Reconciler {
    remote: Arc<dyn RemoteStore>,
    store: Arc<LocalStore>,
    sink: Arc<dyn JobSink>,
    scheduler: Arc<dyn Scheduler>,
    interval: Duration,
    state: RwLock<ReconcileState>,
    stats: RwLock<ReconcileStats>,
    task: Mutex<Option<TimerHandle>>,
}

impl Reconciler {
    /// Creates a stopped reconciler.
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        store: Arc<LocalStore>,
        sink: Arc<dyn JobSink>,
        scheduler: Arc<dyn Scheduler>,
        interval: Duration,
    ) -> Self {
        Self {
            remote,
            store,
            sink,
            scheduler,
            interval,
            state: RwLock::new(ReconcileState::Idle),
            stats: RwLock::new(ReconcileStats::default()),
            task: Mutex::new(None),
        }
    }

    /// Runs a pass now and then every interval until [`stop`](Self::stop).
    ///
    /// Returns false if the loop was already started. The loop runs on the
    /// scheduler, so the caller does not need to be inside a runtime.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return false;
        }

        let me: Weak<Self> = Arc::downgrade(self);
        let interval = self.interval;
        *task = Some(self.scheduler.spawn(Box::pin(async move {
            loop {
                let Some(reconciler) = me.upgrade() else {
                    break;
                };
                match reconciler.run_pass().await {
                    Ok(_) | Err(SyncError::ReconcileInProgress) => {}
                    Err(e) if e.is_retryable() => {
                        warn!(error = %e, "reconciliation pass failed, retrying next interval")
                    }
                    Err(e) => error!(error = %e, "reconciliation pass failed"),
                }
                drop(reconciler);
                tokio::time::sleep(interval).await;
            }
        })));
        info!(interval_ms = interval.as_millis() as u64, "reconciliation loop started");
        true
    }

    /// Stops the periodic loop. Returns false if it was not running.
    pub fn stop(&self) -> bool {
        match self.task.lock().take() {
            Some(handle) => {
                handle.cancel();
                info!("reconciliation loop stopped");
                true
            }
            None => false,
        }
    }

    /// Returns true while the periodic loop is scheduled.
    pub fn is_started(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Returns the current pass state.
    pub fn state(&self) -> ReconcileState {
        *self.state.read()
    }

    /// Returns cumulative statistics.
    pub fn stats(&self) -> ReconcileStats {
        self.stats.read().clone()
    }

    /// Runs one pass.
    ///
    /// Fails with [`SyncError::ReconcileInProgress`] if a pass is already
    /// running, or with the remote error if the snapshot cannot be read.
    /// Individual record failures are counted in the report instead.
    pub async fn run_pass(&self) -> SyncResult<ReconcileReport> {
        {
            let mut state = self.state.write();
            if !state.can_start_pass() {
                debug!("reconciliation pass already running, skipping");
                return Err(SyncError::ReconcileInProgress);
            }
            *state = ReconcileState::Running;
        }
        let _idle = IdleOnDrop(&self.state);

        match self.reconcile().await {
            Ok(report) => {
                let mut stats = self.stats.write();
                stats.passes_completed += 1;
                stats.records_pulled += report.pulled as u64;
                stats.records_pushed += report.pushed as u64;
                debug!(
                    devices = report.devices,
                    pulled = report.pulled,
                    pushed = report.pushed,
                    failures = report.failures,
                    "reconciliation pass finished"
                );
                Ok(report)
            }
            Err(e) => {
                let mut stats = self.stats.write();
                stats.passes_failed += 1;
                stats.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    async fn reconcile(&self) -> SyncResult<ReconcileReport> {
        let things = self.remote.read_all().await?;
        let mut report = ReconcileReport {
            devices: things.len(),
            ..ReconcileReport::default()
        };

        let remote_states: HashMap<&DeviceId, &DeviceState> = things
            .iter()
            .filter_map(|thing| thing.state.as_ref().map(|state| (&thing.id, state)))
            .collect();

        for (id, remote_state) in &remote_states {
            for (key, remote_record) in remote_state.iter() {
                match self.reconcile_key(id, key, remote_record) {
                    Ok(action) => report.count(action),
                    Err(e) => {
                        report.failures += 1;
                        warn!(device_id = %id, key = %key, error = %e, "could not reconcile record");
                    }
                }
            }
        }

        for (id, local_state) in self.store.snapshot() {
            let remote_state = remote_states.get(&id);
            for (key, record) in local_state {
                if remote_state.is_some_and(|state| state.contains_key(&key)) {
                    continue;
                }
                match self.sink.push(QueueItem::update_device_state(&id, &key, &record)) {
                    Ok(()) => report.pushed += 1,
                    Err(e) => {
                        report.failures += 1;
                        warn!(device_id = %id, key = %key, error = %e, "could not queue local-only record");
                    }
                }
            }
        }

        Ok(report)
    }

    fn reconcile_key(
        &self,
        id: &DeviceId,
        key: &str,
        remote: &StateRecord,
    ) -> SyncResult<KeyAction> {
        let Some(local) = self.store.record(id, key) else {
            self.pull(id, key, remote);
            return Ok(KeyAction::Pulled);
        };

        match Freshness::compare(local.last_update, remote.last_update) {
            Freshness::LocalNewer => {
                self.sink.push(QueueItem::update_device_state(id, key, &local))?;
                Ok(KeyAction::Pushed)
            }
            Freshness::Same if local == *remote => Ok(KeyAction::InSync),
            Freshness::RemoteNewer | Freshness::Same => {
                self.pull(id, key, remote);
                Ok(KeyAction::Pulled)
            }
        }
    }

    fn pull(&self, id: &DeviceId, key: &str, remote: &StateRecord) {
        self.store
            .apply_update(id, key, remote.clone(), Propagation::LocalOnly);
    }
}

impl ReconcileReport {
    fn count(&mut self, action: KeyAction) {
        match action {
            KeyAction::Pulled => self.pulled += 1,
            KeyAction::Pushed => self.pushed += 1,
            KeyAction::InSync => self.in_sync += 1,
        }
    }
}

impl Drop for Reconciler {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().take() {
            handle.cancel();
        }
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("interval", &self.interval)
            .field("state", &self.state())
            .finish()
    }
}

/// Puts the reconciler back to idle when a pass ends, even if it is dropped
/// mid-flight.
struct IdleOnDrop<'a>(&'a RwLock<ReconcileState>);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        *self.0.write() = ReconcileState::Idle;
    }
}
