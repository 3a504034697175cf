//! Application core: port traits, events and the main-loop runtime.
//!
//! Nothing in here touches a peripheral.  Radios, flash, timers and the
//! HTTP stack are reached through the traits in [`ports`]; the concrete
//! implementations live in [`crate::adapters`].

pub mod commands;
pub mod events;
pub mod ports;
pub mod runtime;
