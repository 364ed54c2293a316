//! CLI command implementations.

pub mod list;
pub mod register;
pub mod remove;
pub mod reset;
pub mod simulate;
