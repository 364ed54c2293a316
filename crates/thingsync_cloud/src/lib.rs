//! # ThingSync Cloud
//!
//! The authoritative side of ThingSync.
//!
//! This crate provides:
//! - The async [`RemoteStore`] contract used by the sync engine
//! - [`MemoryRemoteStore`], an in-process store with fault injection
//! - [`FileRemoteStore`], a store persisting things as a JSON array on disk
//! - Registration helpers that assign IDs and part numbers
//!
//! # Persisted format
//!
//! Every store holds an ordered list of [`ThingRecord`]s. The file store
//! writes them as a flat JSON array:
//!
//! ```json
//! [{"id":"…","deviceType":"pump","partNumber":"1.234-567.1","name":"Cellar pump",
//!   "state":{"online":{"value":true,"lastUpdate":1700000000000}},"createdAt":1699999999000}]
//! ```
//!
//! [`ThingRecord`]: thingsync_protocol::ThingRecord

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod error;
mod file;
mod memory;
mod store;

pub use error::{CloudError, CloudResult};
pub use file::FileRemoteStore;
pub use memory::MemoryRemoteStore;
pub use store::{epoch_millis, register_thing, thing_counts, RemoteStore};
