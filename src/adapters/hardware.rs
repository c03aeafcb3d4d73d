//! Hardware adapter: bridges the relay and power LED to [`SwitchPort`].
//!
//! The main loop is the only caller. It reconciles this adapter with the
//! logical switch on every iteration, so Modbus-thread writes never reach
//! GPIO directly. On non-espidf targets the pins are simulation stubs.
//!
//! On single-LED models the power LED shares its GPIO with the signal LED.
//! While the blinker owns that pin the power LED is left alone; call
//! [`HardwareAdapter::refresh_led`] once the blinker stops.

use embedded_hal::digital::OutputPin;
use log::warn;

use crate::app::ports::SwitchPort;
use crate::drivers::relay::Relay;

/// Concrete adapter combining the relay and the optional power LED.
pub struct HardwareAdapter<O: OutputPin> {
    relay: Relay<O>,
    /// Active-low, mirrors the relay.
    power_led: Option<O>,
    /// LED pin currently owned by the blinker.
    led_borrowed: bool,
}

impl<O: OutputPin> HardwareAdapter<O> {
    pub fn new(relay: O, power_led: Option<O>) -> Self {
        let mut hw = Self {
            relay: Relay::new(relay),
            power_led,
            led_borrowed: false,
        };
        hw.refresh_led();
        hw
    }

    pub fn is_on(&self) -> bool {
        self.relay.is_on()
    }

    /// Hand the shared LED pin to the blinker (`true`) or take it back.
    pub fn set_led_borrowed(&mut self, borrowed: bool) {
        self.led_borrowed = borrowed;
        if !borrowed {
            self.refresh_led();
        }
    }

    /// Drive the power LED from the current relay state.
    pub fn refresh_led(&mut self) {
        if self.led_borrowed {
            return;
        }
        let on = self.relay.is_on();
        if let Some(led) = self.power_led.as_mut() {
            let res = if on { led.set_low() } else { led.set_high() };
            if res.is_err() {
                warn!("Power LED: pin write failed");
            }
        }
    }
}

// ── SwitchPort implementation ─────────────────────────────────

impl<O: OutputPin> SwitchPort for HardwareAdapter<O> {
    fn apply(&mut self, on: bool) {
        if on == self.relay.is_on() {
            return;
        }
        self.relay.set(on);
        self.refresh_led();
    }
}
