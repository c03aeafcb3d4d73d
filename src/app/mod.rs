//! Application core: pure device logic, zero I/O.
//!
//! This module holds the plug's business rules: switch arbitration, time
//! counters, energy aggregation, timers and the event history. All
//! interaction with hardware happens through **port traits** defined in
//! [`ports`], keeping this layer fully testable without real peripherals.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
pub mod shared;
