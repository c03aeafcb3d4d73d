//! Outbound application events.
//!
//! The [`Device`](super::service::Device) emits these through the
//! [`EventSink`](super::ports::EventSink) port. Adapters on the other side
//! decide what to do with them: log to serial, print telemetry JSON, etc.

use serde::Serialize;

use crate::events::EventRecord;
use crate::scheduler::TimerFired;

use super::commands::SwitchSource;
use super::service::BootMode;

/// Structured events emitted by the device core.
#[derive(Debug, Clone)]
pub enum AppEvent {
    /// Boot finished in the given mode.
    Started { mode: BootMode, switch_on: bool },

    /// The logical switch state was set.
    SwitchChanged {
        source: SwitchSource,
        on: bool,
        value: u8,
    },

    /// A word was appended to the event history.
    EventRecorded(EventRecord),

    TimerFired(TimerFired),

    /// Low-current auto-off tripped.
    AutoOff { current_ma: f32 },

    /// Staged settings were made durable.
    Committed,

    /// Periodic telemetry snapshot.
    Telemetry(TelemetryData),
}

/// A point-in-time telemetry snapshot suitable for logging or transmission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryData {
    pub switch_on: bool,
    pub value: u8,
    /// Seconds since boot.
    pub uptime_s: u64,
    pub state_time_s: u64,
    pub on_time_s: u64,
    /// `None` on devices without a power meter.
    pub voltage: Option<f32>,
    pub current: Option<f32>,
    pub power: Option<f32>,
    pub watt_hours: Option<f64>,
    pub events: usize,
    pub timers_armed: usize,
}
