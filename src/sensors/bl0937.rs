//! BL0937 single-phase energy metering IC.
//!
//! The chip emits two pulse trains whose frequency is proportional to the
//! measured quantity:
//!
//! ```text
//!   CF  ──▶ active power
//!   CF1 ──▶ current (SEL high) or voltage (SEL low)
//! ```
//!
//! GPIO ISRs increment atomic counters on each rising edge. A sample zeroes
//! both counters, waits one second and reads them back, so the counts are
//! frequencies in Hz. SEL is flipped after every sample, so voltage and
//! current are refreshed on alternating samples.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::app::ports::{Cf1Channel, MeterError, MeterPort, RawPulses};
use crate::energy::RawReading;

/// Internal reference voltage (V).
const VREF: f32 = 1.218;
/// Power pulse scaling from the datasheet.
const POWER_DIVISOR: f32 = 1.721_506;
/// Current shunt scaling (pulses per A, with 1 mΩ shunt).
const CURRENT_DIVISOR: f32 = 94_638.0;
/// Voltage divider scaling.
const VOLTAGE_DIVISOR: f32 = 15_397.0;
const VOLTAGE_RATIO: f32 = 2001.0;

/// Sampling window (ms).
pub const SAMPLE_WINDOW_MS: u64 = 1000;

static CF_PULSE_COUNT: AtomicU32 = AtomicU32::new(0);
static CF1_PULSE_COUNT: AtomicU32 = AtomicU32::new(0);

/// Called from the CF GPIO ISR on each rising edge.
pub fn cf_isr_handler() {
    CF_PULSE_COUNT.fetch_add(1, Ordering::Relaxed);
}

/// Called from the CF1 GPIO ISR on each rising edge.
pub fn cf1_isr_handler() {
    CF1_PULSE_COUNT.fetch_add(1, Ordering::Relaxed);
}

// ── Unit conversion ───────────────────────────────────────────

pub fn power_watts(cf_hz: u32) -> f32 {
    if cf_hz == 0 {
        return 0.0;
    }
    cf_hz as f32 * VREF * VREF * 2.0 / POWER_DIVISOR
}

pub fn current_amps(cf1_hz: u32) -> f32 {
    if cf1_hz == 0 {
        return 0.0;
    }
    cf1_hz as f32 * VREF / CURRENT_DIVISOR * 1000.0
}

pub fn voltage_volts(cf1_hz: u32) -> f32 {
    if cf1_hz == 0 {
        return 0.0;
    }
    cf1_hz as f32 * VREF / VOLTAGE_DIVISOR * VOLTAGE_RATIO
}

/// Convert one window of pulse counts into uncalibrated physical units.
pub fn to_reading(pulses: &RawPulses) -> RawReading {
    let (voltage, current) = match pulses.channel {
        Cf1Channel::Voltage => (Some(voltage_volts(pulses.cf1)), None),
        Cf1Channel::Current => (None, Some(current_amps(pulses.cf1))),
    };
    RawReading {
        power: power_watts(pulses.cf),
        voltage,
        current,
    }
}

// ── Sampler ───────────────────────────────────────────────────

/// Blocking pulse sampler implementing [`MeterPort`].
pub struct Bl0937Sampler {
    /// What CF1 measures during the next window.
    channel: Cf1Channel,
    #[cfg_attr(not(target_os = "espidf"), allow(dead_code))]
    sel_gpio: i32,
    /// Fixed counts reported off-target.
    #[cfg(not(target_os = "espidf"))]
    sim: (u32, u32),
}

impl Bl0937Sampler {
    pub fn new(sel_gpio: i32) -> Self {
        let s = Self {
            channel: Cf1Channel::Voltage,
            sel_gpio,
            #[cfg(not(target_os = "espidf"))]
            sim: (0, 0),
        };
        s.drive_sel();
        s
    }

    /// Off-target: counts to report for every following window.
    #[cfg(not(target_os = "espidf"))]
    pub fn set_sim_pulses(&mut self, cf: u32, cf1: u32) {
        self.sim = (cf, cf1);
    }

    pub fn channel(&self) -> Cf1Channel {
        self.channel
    }

    fn drive_sel(&self) {
        crate::drivers::hw_init::gpio_write(
            self.sel_gpio,
            matches!(self.channel, Cf1Channel::Current),
        );
    }

    #[cfg(target_os = "espidf")]
    fn count_window(&mut self) -> (u32, u32) {
        CF_PULSE_COUNT.store(0, Ordering::Relaxed);
        CF1_PULSE_COUNT.store(0, Ordering::Relaxed);
        std::thread::sleep(std::time::Duration::from_millis(SAMPLE_WINDOW_MS));
        (
            CF_PULSE_COUNT.swap(0, Ordering::Relaxed),
            CF1_PULSE_COUNT.swap(0, Ordering::Relaxed),
        )
    }

    #[cfg(not(target_os = "espidf"))]
    fn count_window(&mut self) -> (u32, u32) {
        // ISR counters still work off-target; tests may pulse them directly.
        let cf = CF_PULSE_COUNT.swap(0, Ordering::Relaxed);
        let cf1 = CF1_PULSE_COUNT.swap(0, Ordering::Relaxed);
        (self.sim.0 + cf, self.sim.1 + cf1)
    }
}

impl MeterPort for Bl0937Sampler {
    fn sample(&mut self) -> Result<RawPulses, MeterError> {
        let (cf, cf1) = self.count_window();
        let pulses = RawPulses {
            cf,
            cf1,
            channel: self.channel,
        };
        self.channel = match self.channel {
            Cf1Channel::Voltage => Cf1Channel::Current,
            Cf1Channel::Current => Cf1Channel::Voltage,
        };
        self.drive_sel();
        Ok(pulses)
    }
}
