//! Event bus for device events.
//!
//! The transport publishes [`DeviceEvent`]s here and any number of
//! subscribers (the event router, a UI, tests) receive them synchronously in
//! subscription order. A panicking subscriber is logged and skipped; it
//! never prevents delivery to the others.

use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thingsync_protocol::{DeviceId, StateValue};

/// Category of a device event, used to filter subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Link came up or went down.
    Connectivity,
    /// A device attribute changed.
    Attribute,
}

/// An event observed on a device.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// The device connected or disconnected.
    ConnectivityChanged {
        /// Device the event is about.
        id: DeviceId,
        /// New link status.
        connected: bool,
    },
    /// The device reported a new attribute value.
    AttributeChanged {
        /// Device the event is about.
        id: DeviceId,
        /// Attribute name.
        key: String,
        /// New value.
        value: StateValue,
    },
}

impl DeviceEvent {
    /// Returns the event's kind.
    pub fn kind(&self) -> EventKind {
        match self {
            DeviceEvent::ConnectivityChanged { .. } => EventKind::Connectivity,
            DeviceEvent::AttributeChanged { .. } => EventKind::Attribute,
        }
    }

    /// Returns the device the event is about.
    pub fn device_id(&self) -> &DeviceId {
        match self {
            DeviceEvent::ConnectivityChanged { id, .. } => id,
            DeviceEvent::AttributeChanged { id, .. } => id,
        }
    }
}

/// Identifies a subscription so it can be removed later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&DeviceEvent) + Send + Sync>;

struct Subscriber {
    id: SubscriptionId,
    kind: EventKind,
    handler: Handler,
}

/// Distributes device events to subscribers.
pub struct EventBus {
    next_id: AtomicU64,
    subscribers: RwLock<Vec<Subscriber>>,
}

impl EventBus {
    /// Creates a bus with no subscribers.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Registers `handler` for events of `kind`.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&DeviceEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().push(Subscriber {
            id,
            kind,
            handler: Arc::new(handler),
        });
        tracing::trace!(subscription = id.0, ?kind, "subscribed");
        id
    }

    /// Removes a subscription. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|subscriber| subscriber.id != id);
        subscribers.len() != before
    }

    /// Delivers `event` to every subscriber of its kind.
    ///
    /// Handlers run without the subscriber lock held, so they may subscribe
    /// or unsubscribe themselves.
    pub fn emit(&self, event: &DeviceEvent) -> usize {
        let kind = event.kind();
        let handlers: Vec<(SubscriptionId, Handler)> = self
            .subscribers
            .read()
            .iter()
            .filter(|subscriber| subscriber.kind == kind)
            .map(|subscriber| (subscriber.id, Arc::clone(&subscriber.handler)))
            .collect();

        for (id, handler) in &handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                tracing::error!(
                    subscription = id.0,
                    device_id = %event.device_id(),
                    ?kind,
                    "event handler panicked"
                );
            }
        }
        handlers.len()
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
