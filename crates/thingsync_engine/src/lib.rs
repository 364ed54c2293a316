//! # ThingSync Engine
//!
//! Offline-first state synchronization for a fleet of devices.
//!
//! This crate provides:
//! - A local state store that is the single source of local truth
//! - A sync queue with retry and exponential backoff
//! - Last-write-wins synchronization against a remote store
//! - A periodic reconciliation loop
//! - A simulated device transport and an event router feeding the store
//!
//! ## Data flow
//!
//! ```text
//! transport ──events──▶ router ──Propagate──▶ LocalStore ──jobs──▶ SyncQueue
//!                                                 ▲                    │
//!                                      LocalOnly  │                    ▼
//!                                 Reconciler ◀──▶ RemoteStore ◀── sync_one
//! ```
//!
//! ## Key Invariants
//!
//! - Local writes are unconditional; timestamps are only compared against
//!   the remote store
//! - Records pulled from the remote store are applied with
//!   [`Propagation::LocalOnly`] and never bounce back as new jobs
//! - At most one queue drain and one reconciliation pass run at a time
//! - A queue item is never processed before its `nextRetryTime`

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod engine;
mod error;
mod events;
mod handler;
mod queue;
mod reconcile;
mod remote_sync;
mod router;
mod scheduler;
mod store;
mod transport;

pub use config::{EngineConfig, RetryConfig};
pub use engine::SyncEngine;
pub use error::{SyncError, SyncResult};
pub use events::{DeviceEvent, EventBus, EventKind, SubscriptionId};
pub use handler::StateSyncHandler;
pub use queue::{JobHandler, QueueStats, SyncQueue};
pub use reconcile::{ReconcileReport, ReconcileState, ReconcileStats, Reconciler};
pub use remote_sync::{sync_one, sync_record, ApplyLocal, SyncOutcome};
pub use router::{EventRouter, ONLINE_KEY};
pub use scheduler::{Scheduler, Task, TimerHandle, TimerSet, TokioScheduler};
pub use store::{JobSink, LocalStore, MemoryJobSink, Propagation};
pub use transport::{DeviceTransport, LinkState, SimulatedTransport, BATTERY_KEY};

// Re-export protocol types for convenience
pub use thingsync_protocol::{
    DeviceId, DeviceState, JobKind, QueueItem, StateRecord, StateValue, SyncJob,
};
