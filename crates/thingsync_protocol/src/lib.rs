//! # ThingSync Protocol
//!
//! Data model shared by the ThingSync engine and remote stores.
//!
//! This crate provides:
//! - `StateValue` / `StateRecord` for timestamped device attributes
//! - `Device` and the persisted `ThingRecord` representation
//! - `QueueItem` payloads and their validation into typed `SyncJob`s
//! - Last-write-wins timestamp comparison
//!
//! This is a pure data crate with no I/O operations. JSON is the reference
//! encoding for every type.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod error;
mod job;
mod record;
mod thing;
mod value;

pub use conflict::{remote_timestamp, Freshness};
pub use error::{ProtocolError, ProtocolResult};
pub use job::{DeviceRegistration, JobKind, QueueItem, StateUpdate, SyncJob};
pub use record::{Device, DeviceId, DeviceState, StateRecord};
pub use thing::{part_number, ThingRecord, UNKNOWN_DEVICE_TYPE};
pub use value::StateValue;
