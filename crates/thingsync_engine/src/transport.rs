//! Device transport adapter.
//!
//! The engine never talks to a radio directly: it issues requests through a
//! [`DeviceTransport`] and learns about their effects from [`DeviceEvent`]s
//! on the [`EventBus`]. [`SimulatedTransport`] stands in for a BLE stack,
//! applying every request after a fixed latency.

use crate::events::{DeviceEvent, EventBus};
use crate::scheduler::{Scheduler, TimerSet};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use thingsync_protocol::{DeviceId, StateValue};
use tracing::{debug, warn};

/// Attribute key under which battery level changes are reported.
pub const BATTERY_KEY: &str = "battery";

/// Link status of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    /// Not connected.
    #[default]
    Disconnected,
    /// Connection requested, not yet established.
    Connecting,
    /// Connected.
    Connected,
}

/// Requests the engine can make of devices.
///
/// Requests return immediately; outcomes are reported as events.
pub trait DeviceTransport: Send + Sync {
    /// Asks the device to connect. Returns false if already connected or
    /// connecting.
    fn request_connect(&self, id: &DeviceId) -> bool;

    /// Asks the device to disconnect. Returns false if already disconnected.
    fn request_disconnect(&self, id: &DeviceId) -> bool;

    /// Asks the device to change an attribute.
    fn request_set_attribute(&self, id: &DeviceId, key: &str, value: StateValue);

    /// Returns the device's current link state.
    fn link_state(&self, id: &DeviceId) -> LinkState;

    /// Returns true if the device is connected.
    fn is_connected(&self, id: &DeviceId) -> bool {
        self.link_state(id) == LinkState::Connected
    }
}

/// An in-process transport with simulated latency and battery.
pub struct SimulatedTransport {
    me: Weak<SimulatedTransport>,
    scheduler: Arc<dyn Scheduler>,
    bus: Arc<EventBus>,
    latency: Duration,
    initial_battery: u8,
    drain_step: u8,
    links: Mutex<HashMap<DeviceId, LinkState>>,
    battery: Mutex<HashMap<DeviceId, u8>>,
    timers: TimerSet,
}

impl SimulatedTransport {
    /// Creates a transport that applies requests after `latency`.
    pub fn new(scheduler: Arc<dyn Scheduler>, bus: Arc<EventBus>, latency: Duration) -> Arc<Self> {
        Self::with_battery(scheduler, bus, latency, 100, 1)
    }

    /// Creates a transport whose devices start at `initial_battery` percent
    /// and lose `drain_step` points per drain tick.
    pub fn with_battery(
        scheduler: Arc<dyn Scheduler>,
        bus: Arc<EventBus>,
        latency: Duration,
        initial_battery: u8,
        drain_step: u8,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            scheduler,
            bus,
            latency,
            initial_battery: initial_battery.min(100),
            drain_step,
            links: Mutex::new(HashMap::new()),
            battery: Mutex::new(HashMap::new()),
            timers: TimerSet::new(),
        })
    }

    /// Simulates one tick of battery drain on a connected device and reports
    /// the new level. Returns `None` if the device is not connected.
    pub fn drain_battery(&self, id: &DeviceId) -> Option<u8> {
        if !self.is_connected(id) {
            debug!(device_id = %id, "battery drain skipped, device not connected");
            return None;
        }
        let level = {
            let mut battery = self.battery.lock();
            let level = battery.entry(id.clone()).or_insert(self.initial_battery);
            *level = level.saturating_sub(self.drain_step);
            *level
        };
        self.bus.emit(&DeviceEvent::AttributeChanged {
            id: id.clone(),
            key: BATTERY_KEY.to_string(),
            value: StateValue::from(level),
        });
        Some(level)
    }

    /// Returns the device's battery level.
    pub fn battery_level(&self, id: &DeviceId) -> u8 {
        self.battery
            .lock()
            .get(id)
            .copied()
            .unwrap_or(self.initial_battery)
    }

    /// Cancels every request that has not taken effect yet.
    ///
    /// Devices still connecting fall back to disconnected.
    pub fn cancel(&self) -> usize {
        let cancelled = self.timers.cancel_all();
        for state in self.links.lock().values_mut() {
            if *state == LinkState::Connecting {
                *state = LinkState::Disconnected;
            }
        }
        debug!(cancelled, "transport requests cancelled");
        cancelled
    }

    /// Number of requests still waiting for their latency to elapse.
    pub fn in_flight(&self) -> usize {
        self.timers.active()
    }

    fn schedule<F>(&self, effect: F)
    where
        F: FnOnce(&SimulatedTransport) + Send + 'static,
    {
        let me = self.me.clone();
        let handle = self.scheduler.after(
            self.latency,
            Box::pin(async move {
                if let Some(transport) = me.upgrade() {
                    effect(&transport);
                }
            }),
        );
        self.timers.insert(handle);
    }

    fn complete_connect(&self, id: DeviceId) {
        {
            let mut links = self.links.lock();
            let state = links.entry(id.clone()).or_default();
            if *state != LinkState::Connecting {
                return;
            }
            *state = LinkState::Connected;
        }
        debug!(device_id = %id, "device connected");
        self.bus.emit(&DeviceEvent::ConnectivityChanged { id, connected: true });
    }

    fn complete_disconnect(&self, id: DeviceId) {
        let previous = {
            let mut links = self.links.lock();
            let state = links.entry(id.clone()).or_default();
            std::mem::replace(state, LinkState::Disconnected)
        };
        if previous == LinkState::Connected {
            debug!(device_id = %id, "device disconnected");
            self.bus.emit(&DeviceEvent::ConnectivityChanged { id, connected: false });
        }
    }

    fn complete_set_attribute(&self, id: DeviceId, key: String, value: StateValue) {
        if !self.is_connected(&id) {
            warn!(device_id = %id, key = %key, "dropping attribute write, device not connected");
            return;
        }
        self.bus.emit(&DeviceEvent::AttributeChanged { id, key, value });
    }
}

impl DeviceTransport for SimulatedTransport {
    fn request_connect(&self, id: &DeviceId) -> bool {
        {
            let mut links = self.links.lock();
            let state = links.entry(id.clone()).or_default();
            if *state != LinkState::Disconnected {
                debug!(device_id = %id, state = ?*state, "connect request ignored");
                return false;
            }
            *state = LinkState::Connecting;
        }
        let id = id.clone();
        self.schedule(move |transport| transport.complete_connect(id));
        true
    }

    fn request_disconnect(&self, id: &DeviceId) -> bool {
        if self.link_state(id) == LinkState::Disconnected {
            debug!(device_id = %id, "disconnect request ignored");
            return false;
        }
        let id = id.clone();
        self.schedule(move |transport| transport.complete_disconnect(id));
        true
    }

    fn request_set_attribute(&self, id: &DeviceId, key: &str, value: StateValue) {
        let id = id.clone();
        let key = key.to_string();
        self.schedule(move |transport| transport.complete_set_attribute(id, key, value));
    }

    fn link_state(&self, id: &DeviceId) -> LinkState {
        self.links.lock().get(id).copied().unwrap_or_default()
    }
}

impl std::fmt::Debug for SimulatedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedTransport")
            .field("latency", &self.latency)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
