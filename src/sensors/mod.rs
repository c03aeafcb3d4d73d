//! Sensor drivers.
//!
//! Only metering profiles carry a sensor: the BL0937 energy meter, sampled
//! through the [`MeterPort`](crate::app::ports::MeterPort) trait.

pub mod bl0937;

pub use bl0937::{Bl0937Sampler, to_reading};
