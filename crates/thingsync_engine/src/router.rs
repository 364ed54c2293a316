//! Routes device events into the local store.

use crate::events::{DeviceEvent, EventBus, EventKind, SubscriptionId};
use crate::scheduler::Scheduler;
use crate::store::{LocalStore, Propagation};
use parking_lot::Mutex;
use std::sync::Arc;
use thingsync_protocol::{StateRecord, StateValue};
use tracing::{debug, info};

/// Attribute key under which connectivity is recorded.
pub const ONLINE_KEY: &str = "online";

/// Turns transport events into propagating local writes stamped with the
/// current time.
pub struct EventRouter {
    bus: Arc<EventBus>,
    store: Arc<LocalStore>,
    clock: Arc<dyn Scheduler>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

impl EventRouter {
    /// Creates a router that is not yet subscribed.
    pub fn new(bus: Arc<EventBus>, store: Arc<LocalStore>, clock: Arc<dyn Scheduler>) -> Self {
        Self {
            bus,
            store,
            clock,
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Subscribes to connectivity and attribute events. Returns false if
    /// already started.
    pub fn start(&self) -> bool {
        let mut subscriptions = self.subscriptions.lock();
        if !subscriptions.is_empty() {
            return false;
        }
        for kind in [EventKind::Connectivity, EventKind::Attribute] {
            let store = Arc::clone(&self.store);
            let clock = Arc::clone(&self.clock);
            subscriptions.push(
                self.bus
                    .subscribe(kind, move |event| route(&store, clock.as_ref(), event)),
            );
        }
        info!("event router started");
        true
    }

    /// Drops the router's subscriptions. Returns false if not started.
    pub fn stop(&self) -> bool {
        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        if subscriptions.is_empty() {
            return false;
        }
        for id in subscriptions {
            self.bus.unsubscribe(id);
        }
        info!("event router stopped");
        true
    }

    /// Returns true while subscribed.
    pub fn is_started(&self) -> bool {
        !self.subscriptions.lock().is_empty()
    }

    /// Applies one event directly, bypassing the bus.
    pub fn route(&self, event: &DeviceEvent) {
        route(&self.store, self.clock.as_ref(), event);
    }
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRouter")
            .field("started", &self.is_started())
            .finish()
    }
}

fn route(store: &LocalStore, clock: &dyn Scheduler, event: &DeviceEvent) {
    let (id, key, value) = match event {
        DeviceEvent::ConnectivityChanged { id, connected } => {
            (id, ONLINE_KEY, StateValue::Bool(*connected))
        }
        DeviceEvent::AttributeChanged { id, key, value } => (id, key.as_str(), value.clone()),
    };
    let record = StateRecord::new(value, clock.now_millis());
    debug!(device_id = %id, key, last_update = record.last_update, "routing device event");
    store.apply_update(id, key, record, Propagation::Propagate);
}
