//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises a specific flow against
//! the simulated radio, a scripted backend and virtual time.  All tests run
//! on the host with no real hardware required.

#![cfg(not(target_os = "espidf"))]

mod boot_flow_tests;
mod command_flow_tests;
mod link_recovery_tests;
mod mock_net;
