//! The sync engine facade.

use crate::config::EngineConfig;
use crate::error::{SyncError, SyncResult};
use crate::events::EventBus;
use crate::handler::StateSyncHandler;
use crate::queue::SyncQueue;
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::router::EventRouter;
use crate::scheduler::Scheduler;
use crate::store::LocalStore;
use crate::transport::SimulatedTransport;
use std::sync::Arc;
use thingsync_cloud::RemoteStore;
use tracing::info;

/// Wires every component together and owns their lifecycle.
///
/// ```rust,ignore
/// let scheduler = Arc::new(TokioScheduler::current()?);
/// let remote = Arc::new(MemoryRemoteStore::new());
/// let engine = SyncEngine::new(EngineConfig::default(), remote, scheduler);
/// engine.start()?;
///
/// let id = DeviceId::new("pump-1");
/// engine.transport().request_connect(&id);
/// // ...one second later the store holds `online = true` and the queue
/// // pushes it to the remote store.
///
/// engine.stop();
/// ```
pub struct SyncEngine {
    config: EngineConfig,
    remote: Arc<dyn RemoteStore>,
    bus: Arc<EventBus>,
    store: Arc<LocalStore>,
    queue: Arc<SyncQueue>,
    reconciler: Arc<Reconciler>,
    router: EventRouter,
    transport: Arc<SimulatedTransport>,
}

impl SyncEngine {
    /// Builds an engine. Nothing runs until [`start`](Self::start).
    pub fn new(
        config: EngineConfig,
        remote: Arc<dyn RemoteStore>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        let handler = Arc::new(StateSyncHandler::new(
            Arc::clone(&remote),
            Arc::clone(&scheduler),
        ));
        let queue = SyncQueue::new(config.retry.clone(), Arc::clone(&scheduler), handler.clone());
        let store = Arc::new(LocalStore::new(queue.clone()));
        handler.bind_store(&store);

        let bus = Arc::new(EventBus::new());
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&remote),
            Arc::clone(&store),
            queue.clone(),
            Arc::clone(&scheduler),
            config.reconcile_interval,
        ));
        let router = EventRouter::new(Arc::clone(&bus), Arc::clone(&store), Arc::clone(&scheduler));
        let transport = SimulatedTransport::with_battery(
            scheduler,
            Arc::clone(&bus),
            config.transport_latency,
            config.initial_battery,
            config.battery_drain_step,
        );

        Self {
            config,
            remote,
            bus,
            store,
            queue,
            reconciler,
            router,
            transport,
        }
    }

    /// Starts event routing and the reconciliation loop.
    ///
    /// Fails once the engine has been stopped; a stopped engine cannot be
    /// restarted.
    pub fn start(&self) -> SyncResult<()> {
        if self.queue.is_closed() {
            return Err(SyncError::QueueClosed);
        }
        self.router.start();
        self.reconciler.start();
        info!(
            reconcile_interval_ms = self.config.reconcile_interval.as_millis() as u64,
            max_retries = self.config.retry.max_retries,
            "sync engine started"
        );
        Ok(())
    }

    /// Tears everything down: router subscriptions, the reconciliation
    /// loop, queue wake-ups and in-flight transport requests.
    pub fn stop(&self) {
        self.router.stop();
        self.reconciler.stop();
        self.queue.cancel();
        self.transport.cancel();
        info!(pending = self.queue.len(), "sync engine stopped");
    }

    /// Runs a reconciliation pass immediately.
    pub async fn sync_now(&self) -> SyncResult<ReconcileReport> {
        self.reconciler.run_pass().await
    }

    /// Processes every due queue item immediately.
    pub async fn flush(&self) -> usize {
        self.queue.drain().await
    }

    /// Returns the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the local state store.
    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    /// Returns the sync queue.
    pub fn queue(&self) -> &Arc<SyncQueue> {
        &self.queue
    }

    /// Returns the reconciler.
    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// Returns the device transport.
    pub fn transport(&self) -> &Arc<SimulatedTransport> {
        &self.transport
    }

    /// Returns the event bus.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Returns the remote store.
    pub fn remote(&self) -> &Arc<dyn RemoteStore> {
        &self.remote
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("store", &self.store)
            .field("queue", &self.queue)
            .field("reconciler", &self.reconciler)
            .finish()
    }
}
