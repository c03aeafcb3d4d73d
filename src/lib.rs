//! SmartPlug firmware library.
//!
//! Exposes the pure-logic modules for integration testing and external
//! inspection. All ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module.

#![deny(unused_must_use)]

pub mod app;
pub mod config;
pub mod energy;
pub mod error;
pub mod events;
pub mod modbus;
pub mod pins;
pub mod scheduler;
pub mod store;
pub mod time_count;

// Hardware-facing modules compile everywhere; the real implementations
// are guarded by cfg attributes inside.
pub mod adapters;
pub mod drivers;
pub mod sensors;

mod esp_link_shims;
