//! Shared error types re-exported by dependent crates.

pub use crate::bus::BusError;
