//! Inbound commands to the device service.
//!
//! These represent actions requested by the outside world (button, Modbus,
//! timers, WiFi supervisor, Hue/web layers) that the
//! [`Device`](super::service::Device) interprets and acts upon.

use crate::events::EventKind;

/// Who asked for a switch change. Decides the recorded event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchSource {
    /// Flag bit 0 set at boot.
    DefaultOn,
    Button,
    Modbus,
    Timer,
    /// Hue emulation or web UI via [`Device::external_set_state`](super::service::Device::external_set_state).
    Fauxmo,
    AutoOff,
}

impl SwitchSource {
    pub const fn event_kind(self, on: bool) -> EventKind {
        match (self, on) {
            (Self::DefaultOn, _) => EventKind::DefaultOn,
            (Self::Button, true) => EventKind::ButtonOn,
            (Self::Button, false) => EventKind::ButtonOff,
            (Self::Modbus, true) => EventKind::ModbusOn,
            (Self::Modbus, false) => EventKind::ModbusOff,
            (Self::Timer, true) => EventKind::TimerOn,
            (Self::Timer, false) => EventKind::TimerOff,
            (Self::Fauxmo, true) => EventKind::FauxmoOn,
            (Self::Fauxmo, false) => EventKind::FauxmoOff,
            (Self::AutoOff, _) => EventKind::AutoOff,
        }
    }
}

/// Station link transitions reported by the WiFi adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkEvent {
    Connected,
    /// Deliberate disconnect before a reconnect attempt.
    Disconnected,
    /// Link found down on a poll.
    Lost,
}

impl NetworkEvent {
    pub const fn event_kind(self) -> EventKind {
        match self {
            Self::Connected => EventKind::WifiConn,
            Self::Disconnected => EventKind::WifiDisconn,
            Self::Lost => EventKind::WifiLost,
        }
    }
}

/// Commands that external adapters can send into the device core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppCommand {
    SetSwitch {
        on: bool,
        value: u8,
        source: SwitchSource,
    },

    /// Flip the switch, full intensity when turning on.
    Toggle(SwitchSource),

    /// Clear the armed bit of every timer and persist.
    DisarmTimers,

    /// Zero the accumulated watt-hours.
    ResetEnergy,

    Network(NetworkEvent),
}
