//! Peripheral drivers, GPIO initialisation and thread helpers.

pub mod blinker;
pub mod button;
pub mod hw_init;
pub mod relay;
pub mod task_pin;
