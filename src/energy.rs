//! Energy measurement aggregator and low-load auto-off.
//!
//! Each fast tick the BL0937 sampler delivers an uncalibrated
//! [`RawReading`]; the aggregator multiplies it by the per-quantity
//! calibration factor, keeps the result as the live value and integrates
//! power into watt-hours over the real elapsed time.
//!
//! ```text
//!   RawReading ──▶ × factor ──▶ measured ──▶ Wh += P·Δt
//!                                   │
//!                                   └─ current ──▶ AutoOff ──▶ trip?
//! ```
//!
//! Calibration collects samples `observed / raw` and uses their running
//! average as the factor, so repeated calibrations converge instead of
//! overwriting each other.

use log::{debug, info};

const MS_PER_HOUR: f64 = 3_600_000.0;

/// Measured quantities, in calibration-selector order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MeasureKind {
    Voltage = 0,
    Current = 1,
    Power = 2,
}

impl MeasureKind {
    pub const ALL: [MeasureKind; 3] = [Self::Voltage, Self::Current, Self::Power];

    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Voltage),
            1 => Some(Self::Current),
            2 => Some(Self::Power),
            _ => None,
        }
    }
}

/// One sampling result in physical units (V, A, W) before calibration.
///
/// The BL0937 reports either voltage or current per window, so only one
/// of them is refreshed by each reading.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RawReading {
    pub power: f32,
    pub voltage: Option<f32>,
    pub current: Option<f32>,
}

/// Live value plus calibration state for one quantity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measure {
    /// Calibrated value, refreshed by [`EnergyMeter::update`].
    pub measured: f32,
    /// Last uncalibrated value.
    pub raw: f32,
    pub factor: f32,
    /// Sum of calibration samples since the last reset.
    pub sample_sum: f32,
    pub samples: u16,
}

impl Measure {
    const fn with_factor(factor: f32) -> Self {
        Self {
            measured: 0.0,
            raw: 0.0,
            factor,
            sample_sum: 0.0,
            samples: 0,
        }
    }

    fn refresh(&mut self, raw: f32) {
        self.raw = raw;
        self.measured = raw * self.factor;
    }
}

// ═══════════════════════════════════════════════════════════════
//  EnergyMeter
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct EnergyMeter {
    measures: [Measure; 3],
    watt_hours: f64,
}

impl EnergyMeter {
    /// Start from persisted factors (voltage, current, power).
    pub fn new(factors: [f32; 3]) -> Self {
        Self {
            measures: factors.map(Measure::with_factor),
            watt_hours: 0.0,
        }
    }

    /// Apply a reading taken over `elapsed_ms`.
    ///
    /// Returns `true` when the reading refreshed the current, which is the
    /// only time the auto-off check may run.
    pub fn update(&mut self, reading: &RawReading, elapsed_ms: u64) -> bool {
        self.measures[MeasureKind::Power as usize].refresh(reading.power);
        if let Some(v) = reading.voltage {
            self.measures[MeasureKind::Voltage as usize].refresh(v);
        }
        if let Some(a) = reading.current {
            self.measures[MeasureKind::Current as usize].refresh(a);
        }

        let watts = f64::from(self.measured(MeasureKind::Power));
        self.watt_hours += watts * elapsed_ms as f64 / MS_PER_HOUR;
        debug!(
            "Energy: U={:.1}V I={:.3}A P={:.1}W total={:.3}Wh",
            self.measured(MeasureKind::Voltage),
            self.measured(MeasureKind::Current),
            watts,
            self.watt_hours
        );
        reading.current.is_some()
    }

    pub fn measure(&self, kind: MeasureKind) -> &Measure {
        &self.measures[kind as usize]
    }

    pub fn measured(&self, kind: MeasureKind) -> f32 {
        self.measures[kind as usize].measured
    }

    pub fn factor(&self, kind: MeasureKind) -> f32 {
        self.measures[kind as usize].factor
    }

    pub fn accumulated_wh(&self) -> f64 {
        self.watt_hours
    }

    pub fn reset_energy(&mut self) {
        self.watt_hours = 0.0;
        info!("Energy: accumulated Wh reset");
    }

    /// Add a calibration sample, or reset calibration when `observed` is `None`.
    ///
    /// Returns the resulting factor. A zero raw reading cannot be
    /// calibrated against and leaves the factor untouched.
    pub fn calibrate(&mut self, kind: MeasureKind, observed: Option<f32>) -> f32 {
        let m = &mut self.measures[kind as usize];
        match observed {
            None => {
                m.factor = 1.0;
                m.sample_sum = 0.0;
                m.samples = 0;
                info!("Energy: {:?} calibration reset", kind);
            }
            Some(_) if m.raw == 0.0 => {
                info!("Energy: {:?} reads zero, calibration sample ignored", kind);
            }
            Some(value) => {
                m.sample_sum += value / m.raw;
                m.samples = m.samples.saturating_add(1);
                m.factor = m.sample_sum / f32::from(m.samples);
                info!(
                    "Energy: {:?} factor={} (sum={}, samples={})",
                    kind, m.factor, m.sample_sum, m.samples
                );
            }
        }
        m.measured = m.raw * m.factor;
        m.factor
    }
}

// ═══════════════════════════════════════════════════════════════
//  AutoOff
// ═══════════════════════════════════════════════════════════════

/// Counts consecutive low-current samples while the switch is on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AutoOff {
    counter: u16,
}

impl AutoOff {
    pub fn counter(&self) -> u16 {
        self.counter
    }

    pub fn reset(&mut self) {
        self.counter = 0;
    }

    /// Feed one fresh current sample. Returns `true` when the switch must
    /// go off; the counter is already cleared in that case.
    pub fn evaluate(&mut self, threshold_ma: u16, cycles: u16, switch_on: bool, current_a: f32) -> bool {
        if threshold_ma == 0 || cycles == 0 || !switch_on {
            self.counter = 0;
            return false;
        }
        if current_a * 1000.0 < f32::from(threshold_ma) {
            self.counter = (self.counter + 1).min(cycles);
            if self.counter >= cycles {
                info!(
                    "Energy: {:.0} mA below {} mA for {} cycles, auto-off",
                    current_a * 1000.0,
                    threshold_ma,
                    cycles
                );
                self.counter = 0;
                return true;
            }
        } else {
            self.counter = 0;
        }
        false
    }
}
