//! LED blink-pattern driver.
//!
//! A pattern is a 16-bit map read MSB first, one bit per step: `1` = LED on,
//! `0` = off. Leading zeros are trimmed so every cycle starts lit, and
//! the trimmed length is replayed cyclically.
//!
//! ```text
//!   0x3333 ──▶ 11 0011 0011 0011 0011 ... (14 steps)
//!   0xCCC0 ──▶ 1100 1100 1100 0000       (16 steps)
//!   0xFF00 ──▶ 1111 1111 0000 0000       (16 steps)
//! ```
//!
//! [`update`](Blinker::update) must run more often than the step length.

use embedded_hal::digital::OutputPin;

/// Boot: waiting for a button press that requests CONFIG mode.
pub const KNOBBLINK: u16 = 0x3333;
/// CONFIG mode is active.
pub const CONFIGBLINK: u16 = 0xCCC0;
/// WiFi connection in progress.
pub const WIFIBLINK: u16 = 0xFF00;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Running {
    pattern: u16,
    len: u8,
    work: u16,
    step: u8,
    interval_ms: u32,
    last_ms: u32,
}

pub struct Blinker<O: OutputPin> {
    pin: O,
    active_low: bool,
    lit: bool,
    running: Option<Running>,
}

impl<O: OutputPin> Blinker<O> {
    /// Wrap `pin` and switch the LED off.
    pub fn new(pin: O, active_low: bool) -> Self {
        let mut b = Self {
            pin,
            active_low,
            lit: true,
            running: None,
        };
        b.drive(false);
        b
    }

    /// Start replaying `pattern` with `interval_ms` per bit.
    ///
    /// An all-zero pattern or a zero interval stops the blinker.
    pub fn start(&mut self, pattern: u16, interval_ms: u32, now_ms: u32) {
        if pattern == 0 || interval_ms == 0 {
            self.stop();
            return;
        }
        let lead = pattern.leading_zeros();
        let pattern = pattern << lead;
        self.running = Some(Running {
            pattern,
            len: (16 - lead) as u8,
            work: pattern,
            step: 0,
            interval_ms,
            last_ms: now_ms,
        });
    }

    /// Stop blinking and leave the LED off.
    pub fn stop(&mut self) {
        self.running = None;
        self.drive(false);
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn is_lit(&self) -> bool {
        self.lit
    }

    /// Advance one step once the interval has passed.
    pub fn update(&mut self, now_ms: u32) {
        let Some(mut r) = self.running else { return };
        if now_ms.wrapping_sub(r.last_ms) <= r.interval_ms {
            return;
        }
        let on = r.work & 0x8000 != 0;
        r.work <<= 1;
        r.step += 1;
        if r.step == r.len {
            r.step = 0;
            r.work = r.pattern;
        }
        r.last_ms = now_ms;
        self.running = Some(r);
        self.drive(on);
    }

    fn drive(&mut self, on: bool) {
        if on == self.lit {
            return;
        }
        let high = on != self.active_low;
        // Pin errors are not recoverable here; the LED is cosmetic.
        let _ = if high { self.pin.set_high() } else { self.pin.set_low() };
        self.lit = on;
    }
}
