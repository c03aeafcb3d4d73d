//! Mains relay driver.
//!
//! Active-high GPIO output. The driver is a dumb actuator: the main loop
//! reconciles it with [`Device::switch_on`](crate::app::service::Device::switch_on)
//! and only writes the pin on change.

use embedded_hal::digital::OutputPin;
use log::{info, warn};

pub struct Relay<O: OutputPin> {
    pin: O,
    on: bool,
}

impl<O: OutputPin> Relay<O> {
    /// Wrap `pin` and open the relay.
    pub fn new(pin: O) -> Self {
        let mut r = Self { pin, on: true };
        r.set(false);
        r
    }

    pub fn set(&mut self, on: bool) {
        if on == self.on {
            return;
        }
        let res = if on { self.pin.set_high() } else { self.pin.set_low() };
        if res.is_err() {
            warn!("Relay: pin write failed");
            return;
        }
        self.on = on;
        info!("Relay: {}", if on { "closed" } else { "open" });
    }

    pub fn is_on(&self) -> bool {
        self.on
    }
}
