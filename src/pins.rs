//! GPIO assignments for the supported plug models.
//!
//! Single source of truth: drivers take a [`PinMap`] rather than hard-coding
//! pin numbers. LEDs and the button are active-low, the relay active-high.
//!
//! | Profile    | Relay | Button | Signal LED | Power LED | SEL/CF/CF1 |
//! |------------|-------|--------|------------|-----------|------------|
//! | GosundSp1  | 14    | 3      | 13         | 1         | 12/4/5     |
//! | Maxcio     | 14    | 1      | 13         | 13        | none       |
//! | SonoffS26  | 12    | 0      | 13         | none      | none       |
//! | NousA1t    | 14    | 0      | 13         | 13        | 12/4/5     |

use crate::config::DeviceProfile;

/// BL0937 energy meter wiring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeterPins {
    /// Selects what CF1 reports: HIGH = current, LOW = voltage.
    pub sel: i32,
    /// Active-power pulse output.
    pub cf: i32,
    /// Voltage / current pulse output.
    pub cf1: i32,
}

const BL0937_PINS: MeterPins = MeterPins {
    sel: 12,
    cf: 4,
    cf1: 5,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinMap {
    pub relay: i32,
    pub button: i32,
    /// Blinks boot / config / connect patterns.
    pub signal_led: i32,
    /// Mirrors the relay. May share the signal LED's pin.
    pub power_led: Option<i32>,
    pub meter: Option<MeterPins>,
}

impl PinMap {
    pub const fn for_profile(profile: DeviceProfile) -> Self {
        match profile {
            DeviceProfile::GosundSp1 => Self {
                relay: 14,
                button: 3,
                signal_led: 13,
                power_led: Some(1),
                meter: Some(BL0937_PINS),
            },
            DeviceProfile::Maxcio => Self {
                relay: 14,
                button: 1,
                signal_led: 13,
                power_led: Some(13),
                meter: None,
            },
            DeviceProfile::SonoffS26 => Self {
                relay: 12,
                button: 0,
                signal_led: 13,
                power_led: None,
                meter: None,
            },
            DeviceProfile::NousA1t => Self {
                relay: 14,
                button: 0,
                signal_led: 13,
                power_led: Some(13),
                meter: Some(BL0937_PINS),
            },
        }
    }

    /// Power LED is wired to the same GPIO as the signal LED.
    pub fn shared_led(&self) -> bool {
        self.power_led == Some(self.signal_led)
    }
}
