//! Port traits: the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ Device (domain)
//! ```
//!
//! Driven adapters (persistence, clock, meter, relay, event sinks) implement
//! these traits. The [`Device`](super::service::Device) and the Modbus engine
//! consume them via generics, so the domain core never touches hardware
//! directly.

use crate::config::SystemConfig;

// ───────────────────────────────────────────────────────────────
// Persistence port (driven adapter: domain ↔ EEPROM image)
// ───────────────────────────────────────────────────────────────

/// Byte-addressable persisted image with EEPROM semantics.
///
/// `write` only touches the RAM shadow; nothing is durable until
/// [`commit`](Self::commit) flushes the whole image in one physical write.
pub trait PersistPort {
    /// Copy `buf.len()` bytes starting at `offset` out of the shadow.
    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError>;

    /// Overwrite bytes of the shadow starting at `offset`.
    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), StorageError>;

    /// Make the shadow durable.
    fn commit(&mut self) -> Result<(), StorageError>;

    // ── Typed get/put helpers (little-endian, like a raw memcpy) ──

    fn get_u16(&self, offset: usize) -> Result<u16, StorageError> {
        let mut b = [0u8; 2];
        self.read(offset, &mut b)?;
        Ok(u16::from_le_bytes(b))
    }

    fn get_f32(&self, offset: usize) -> Result<f32, StorageError> {
        let mut b = [0u8; 4];
        self.read(offset, &mut b)?;
        Ok(f32::from_le_bytes(b))
    }

    fn put_u16(&mut self, offset: usize, value: u16) -> Result<(), StorageError> {
        self.write(offset, &value.to_le_bytes())
    }

    fn put_f32(&mut self, offset: usize, value: f32) -> Result<(), StorageError> {
        self.write(offset, &value.to_le_bytes())
    }
}

// ───────────────────────────────────────────────────────────────
// Configuration port (driven adapter: domain ↔ tunables blob)
// ───────────────────────────────────────────────────────────────

/// Loads and persists the runtime [`SystemConfig`].
pub trait ConfigPort {
    /// Returns [`SystemConfig::default()`] if no stored config exists.
    fn load(&self) -> Result<SystemConfig, ConfigError>;

    /// Validate and persist configuration.
    fn save(&mut self, config: &SystemConfig) -> Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Clock port (driven adapter: system timer + SNTP wall clock)
// ───────────────────────────────────────────────────────────────

/// Broken-down local wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WallTime {
    /// Day of week, 0 = Sunday.
    pub weekday: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    /// Day of month, 1–31.
    pub mday: u8,
    /// Month, 1–12.
    pub month: u8,
}

pub trait ClockPort {
    /// Monotonic milliseconds since boot.
    fn uptime_ms(&self) -> u64;

    /// Local time, or `None` while the wall clock is not synchronised.
    fn now(&self) -> Option<WallTime>;
}

// ───────────────────────────────────────────────────────────────
// Meter port (driven adapter: BL0937 pulse sampler → domain)
// ───────────────────────────────────────────────────────────────

/// Which quantity the CF1 output carried during a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cf1Channel {
    Voltage,
    Current,
}

/// Pulse counts gathered over one sampling window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawPulses {
    /// CF pulses (active power).
    pub cf: u32,
    /// CF1 pulses (voltage or current, see `channel`).
    pub cf1: u32,
    pub channel: Cf1Channel,
}

/// Blocking energy sampler. One call takes about a second.
pub trait MeterPort {
    fn sample(&mut self) -> Result<RawPulses, MeterError>;
}

// ───────────────────────────────────────────────────────────────
// Switch port (driven adapter: domain → relay + power LED)
// ───────────────────────────────────────────────────────────────

pub trait SwitchPort {
    /// Drive the relay (and power LED, if any) to `on`.
    fn apply(&mut self, on: bool);
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`AppEvent`](super::events::AppEvent)s
/// through this port. Adapters decide where they go.
pub trait EventSink {
    fn emit(&mut self, event: &super::events::AppEvent);
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`ConfigPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Stored config failed integrity / deserialization check.
    Corrupted,
    /// A config field failed range validation.
    ValidationFailed(&'static str),
    /// Generic I/O error from the storage backend.
    IoError,
}

/// Errors from [`PersistPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Access past the end of the persisted image.
    OutOfRange,
    /// Flash / NVS write or commit failed.
    IoError,
}

/// Errors from [`MeterPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeterError {
    /// No pulse source configured on this device.
    NotPresent,
    /// The sampling window could not be completed.
    Timeout,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::OutOfRange => write!(f, "offset out of range"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl core::fmt::Display for MeterError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotPresent => write!(f, "no power meter"),
            Self::Timeout => write!(f, "sample timeout"),
        }
    }
}
