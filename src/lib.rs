//! ProbeLink connectivity library.
//!
//! Keeps the environmental probe reachable: wireless link management with
//! backoff and provisioning, the backend token session, retrying transport,
//! command polling and telemetry upload.  All ESP-IDF-specific code is
//! guarded by `#[cfg(target_os = "espidf")]` within each module, so the
//! whole crate builds and tests on the host.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod backoff;
pub mod cloud;
pub mod config;
pub mod error;
pub mod events;
pub mod net;
pub mod power;
pub mod sim;
pub mod survivable;
pub mod transport;

pub use error::{Error, Result};
