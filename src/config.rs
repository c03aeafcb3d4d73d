//! System configuration parameters
//!
//! Runtime tunables for the SmartPlug firmware plus the device profile that
//! decides which optional subsystems exist. Values can be overridden via an
//! NVS blob (see [`ConfigPort`](crate::app::ports::ConfigPort)).
//!
//! The user-facing persisted settings (WiFi credentials, flags, calibration,
//! timers) are *not* here; they live in the EEPROM-style image managed by
//! [`ConfigStore`](crate::store::ConfigStore).

use serde::{Deserialize, Serialize};

use crate::app::ports::ConfigError;

// ---------------------------------------------------------------------------
// Flag word bits (Modbus register 2)
// ---------------------------------------------------------------------------

/// Switch ON at power-up.
pub const CONF_DEFAULT_ON: u16 = 0x0001;
/// Bits of the flag word a client may change.
pub const CONF_MASK: u16 = 0x0001;
pub const CONF_HAS_POWER: u16 = 0x8000;
pub const CONF_HAS_TELNET: u16 = 0x4000;
pub const CONF_HAS_MODBUS: u16 = 0x2000;
pub const CONF_HAS_FAUXMO: u16 = 0x1000;
pub const CONF_TIMERS: u16 = 0x0800;

/// Floor for the fast update interval; shorter sampling stalls the device.
pub const MIN_UPDATE_INTERVAL_MS: u32 = 2000;

/// Timer checks must happen more than once a minute or a minute is skipped.
pub const MAX_TIMER_INTERVAL_MS: u32 = 59_999;

/// Upper bound for simultaneous Modbus clients (static slot table).
pub const MAX_MODBUS_CLIENTS: usize = 4;

// ---------------------------------------------------------------------------
// Device profiles
// ---------------------------------------------------------------------------

/// Hardware variant the firmware runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceProfile {
    /// Gosund SP1: BL0937 meter, separate red/blue LEDs.
    GosundSp1,
    /// Maxcio W-DE 004: plain relay socket.
    Maxcio,
    /// Sonoff S26 R2: plain relay socket, no power LED.
    SonoffS26,
    /// Nous A1T: BL0937 meter, single LED.
    NousA1t,
}

impl DeviceProfile {
    pub const fn has_power_meter(self) -> bool {
        matches!(self, Self::GosundSp1 | Self::NousA1t)
    }

    /// Parse a profile name (case-insensitive, `_`/`-` ignored).
    pub fn from_name(name: &str) -> Option<Self> {
        let mut key = heapless::String::<16>::new();
        for c in name.chars().filter(|c| *c != '_' && *c != '-') {
            key.push(c.to_ascii_lowercase()).ok()?;
        }
        match key.as_str() {
            "gosundsp1" => Some(Self::GosundSp1),
            "maxcio" => Some(Self::Maxcio),
            "sonoffs26" => Some(Self::SonoffS26),
            "nousa1t" => Some(Self::NousA1t),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Optional subsystems present on this device, resolved once at startup.
///
/// Drives the register-map size and which Modbus handlers are registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub power_meter: bool,
    pub timers: bool,
    pub event_tracking: bool,
    pub fauxmo: bool,
    pub telnet: bool,
}

impl Capabilities {
    /// Everything enabled (metering profile with timers and events).
    pub const fn full() -> Self {
        Self {
            power_meter: true,
            timers: true,
            event_tracking: true,
            fauxmo: true,
            telnet: true,
        }
    }

    /// Plain relay socket: no metering, timers or event log.
    pub const fn basic() -> Self {
        Self {
            power_meter: false,
            timers: false,
            event_tracking: false,
            fauxmo: false,
            telnet: false,
        }
    }

    pub fn resolve(config: &SystemConfig) -> Self {
        Self {
            power_meter: config.profile.has_power_meter(),
            timers: config.timers,
            event_tracking: config.event_tracking,
            fauxmo: config.fauxmo,
            telnet: config.telnet,
        }
    }

    /// Read-only capability bits reported in the flag word.
    /// `CONF_HAS_MODBUS` is always set: whoever reads it is talking Modbus.
    pub fn flag_bits(&self) -> u16 {
        let mut bits = CONF_HAS_MODBUS;
        if self.power_meter {
            bits |= CONF_HAS_POWER;
        }
        if self.telnet {
            bits |= CONF_HAS_TELNET;
        }
        if self.fauxmo {
            bits |= CONF_HAS_FAUXMO;
        }
        if self.timers {
            bits |= CONF_TIMERS;
        }
        bits
    }
}

// ---------------------------------------------------------------------------
// SystemConfig
// ---------------------------------------------------------------------------

/// Core system configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    // --- Hardware ---
    pub profile: DeviceProfile,

    // --- Optional subsystems ---
    pub timers: bool,
    pub event_tracking: bool,
    pub fauxmo: bool,
    pub telnet: bool,

    // --- Timing ---
    /// Energy/counter update interval (milliseconds, >= 2000)
    pub update_interval_ms: u32,
    /// Timer check interval (milliseconds, < 60000)
    pub timer_interval_ms: u32,

    // --- Modbus ---
    pub modbus_port: u16,
    pub modbus_unit_id: u8,
    pub modbus_max_clients: u8,
    /// Idle clients are dropped after this long without a request
    pub modbus_idle_timeout_ms: u32,

    // --- Button / LED ---
    pub double_click_ms: u32,
    pub press_ms: u32,
    /// Duration of one blink pattern bit
    pub blink_step_ms: u32,
    /// Window after reset in which a button press forces CONFIG mode
    pub config_wait_ms: u32,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            profile: DeviceProfile::GosundSp1,

            timers: true,
            event_tracking: true,
            fauxmo: false,
            telnet: false,

            update_interval_ms: 5000,
            timer_interval_ms: 40_000,

            modbus_port: 502,
            modbus_unit_id: 1,
            modbus_max_clients: 2,
            modbus_idle_timeout_ms: 2000,

            double_click_ms: 250,
            press_ms: 400,
            blink_step_ms: 100,
            config_wait_ms: 3000,
        }
    }
}

impl SystemConfig {
    /// Defaults for a given hardware profile.
    pub fn for_profile(profile: DeviceProfile) -> Self {
        Self {
            profile,
            ..Self::default()
        }
    }

    /// Update interval with the 2 s floor applied.
    pub fn effective_update_interval_ms(&self) -> u32 {
        self.update_interval_ms.max(MIN_UPDATE_INTERVAL_MS)
    }

    /// Range-check every field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_UPDATE_INTERVAL_MS..=600_000).contains(&self.update_interval_ms) {
            return Err(ConfigError::ValidationFailed(
                "update_interval_ms must be 2000–600000",
            ));
        }
        if !(1000..=MAX_TIMER_INTERVAL_MS).contains(&self.timer_interval_ms) {
            return Err(ConfigError::ValidationFailed(
                "timer_interval_ms must be 1000–59999",
            ));
        }
        if self.modbus_port == 0 {
            return Err(ConfigError::ValidationFailed("modbus_port must be non-zero"));
        }
        if !(1..=247).contains(&self.modbus_unit_id) {
            return Err(ConfigError::ValidationFailed("modbus_unit_id must be 1–247"));
        }
        if self.modbus_max_clients == 0 || usize::from(self.modbus_max_clients) > MAX_MODBUS_CLIENTS
        {
            return Err(ConfigError::ValidationFailed("modbus_max_clients must be 1–4"));
        }
        if self.double_click_ms == 0 || self.press_ms == 0 {
            return Err(ConfigError::ValidationFailed(
                "button timings must be non-zero",
            ));
        }
        if self.blink_step_ms == 0 {
            return Err(ConfigError::ValidationFailed("blink_step_ms must be non-zero"));
        }
        Ok(())
    }
}
