//! Weekly switching timers.
//!
//! Sixteen fixed slots, each an on/off action at a wall-clock hour and
//! minute on selected weekdays. The main loop calls [`TimerTable::due`]
//! on the slow tick (well under a minute apart, so no minute is skipped).
//!
//! ```text
//!  activeDays byte          onOff byte   hour   minute
//! ┌──┬──┬──┬──┬──┬──┬──┬──┐ ┌────────┐   ┌────┐ ┌────┐
//! │A │Sa│Fr│Th│We│Tu│Mo│Su│ │      on│   │0-23│ │0-59│
//! └──┴──┴──┴──┴──┴──┴──┴──┘ └────────┘   └────┘ └────┘
//!  bit 7 = armed
//! ```
//!
//! Only the first due slot whose action differs from the current switch
//! state fires per tick; coinciding timers therefore cannot flap the relay.

use log::info;

use crate::app::ports::WallTime;

/// Number of timer slots.
pub const NUM_TIMERS: usize = 16;

/// Bit 7 of `active_days`: the timer is armed.
pub const ACTIVE_MASK: u8 = 0x80;
/// Bits 0–6 of `active_days`: Sunday (bit 0) to Saturday (bit 6).
pub const DAY_MASK: u8 = 0x7F;
/// Bit 0 of the action byte: switch ON (set) or OFF (clear).
pub const ON_MASK: u8 = 0x01;

pub const SUNDAY: u8 = 0x01;
pub const MONDAY: u8 = 0x02;
pub const TUESDAY: u8 = 0x04;
pub const WEDNESDAY: u8 = 0x08;
pub const THURSDAY: u8 = 0x10;
pub const FRIDAY: u8 = 0x20;
pub const SATURDAY: u8 = 0x40;
pub const WORKDAYS: u8 = MONDAY | TUESDAY | WEDNESDAY | THURSDAY | FRIDAY;
pub const WEEKEND: u8 = SATURDAY | SUNDAY;
pub const DAILY: u8 = DAY_MASK;

// ═══════════════════════════════════════════════════════════════
//  Timer slot
// ═══════════════════════════════════════════════════════════════

/// One timer slot. Disarmed timers keep their programmed days and time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timer {
    /// Armed flag (bit 7) and weekday mask (bits 0–6), stored verbatim.
    pub active_days: u8,
    /// Target state when the timer fires.
    pub on: bool,
    pub hour: u8,
    pub minute: u8,
}

impl Timer {
    /// An armed timer for the given weekdays.
    pub fn armed(days: u8, on: bool, hour: u8, minute: u8) -> Self {
        Self {
            active_days: ACTIVE_MASK | (days & DAY_MASK),
            on,
            hour: hour % 24,
            minute: minute % 60,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.active_days & ACTIVE_MASK != 0
    }

    pub fn days(&self) -> u8 {
        self.active_days & DAY_MASK
    }

    pub fn runs_on(&self, weekday: u8) -> bool {
        weekday < 7 && self.days() & (1 << weekday) != 0
    }

    /// Armed, scheduled for today and at this very minute.
    pub fn is_due(&self, now: &WallTime) -> bool {
        self.is_armed() && self.runs_on(now.weekday) && self.hour == now.hour && self.minute == now.minute
    }

    pub fn disarm(&mut self) {
        self.active_days &= !ACTIVE_MASK;
    }

    /// Decode the two holding registers of a slot.
    ///
    /// The day byte is taken as-is; the action byte is reduced to its on/off
    /// bit and the time is wrapped into range rather than rejected.
    pub fn from_registers(regs: [u16; 2]) -> Self {
        Self {
            active_days: (regs[0] >> 8) as u8,
            on: regs[0] as u8 & ON_MASK != 0,
            hour: ((regs[1] >> 8) as u8) % 24,
            minute: (regs[1] as u8) % 60,
        }
    }

    pub fn to_registers(&self) -> [u16; 2] {
        [
            (u16::from(self.active_days) << 8) | u16::from(self.on),
            (u16::from(self.hour) << 8) | u16::from(self.minute),
        ]
    }

    /// Persisted form: `[activeDays, onOff, hour, minute]`.
    pub fn to_bytes(&self) -> [u8; 4] {
        [self.active_days, u8::from(self.on), self.hour, self.minute]
    }

    pub fn from_bytes(b: [u8; 4]) -> Self {
        Self {
            active_days: b[0],
            on: b[1] & ON_MASK != 0,
            hour: b[2] % 24,
            minute: b[3] % 60,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Timer table
// ═══════════════════════════════════════════════════════════════

/// A timer that fired on this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub slot: usize,
    pub on: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimerTable {
    slots: [Timer; NUM_TIMERS],
}

impl TimerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, slot: usize) -> Option<&Timer> {
        self.slots.get(slot)
    }

    pub fn set(&mut self, slot: usize, timer: Timer) {
        if let Some(s) = self.slots.get_mut(slot) {
            *s = timer;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Timer> {
        self.slots.iter()
    }

    pub fn armed_count(&self) -> usize {
        self.slots.iter().filter(|t| t.is_armed()).count()
    }

    /// First due slot whose action differs from `switch_on`, if any.
    ///
    /// Scanning stops at that slot, so at most one state change results
    /// per tick.
    pub fn due(&self, now: &WallTime, switch_on: bool) -> Option<TimerFired> {
        let fired = self
            .slots
            .iter()
            .enumerate()
            .find(|(_, t)| t.is_due(now) && t.on != switch_on)
            .map(|(slot, t)| TimerFired { slot, on: t.on });
        if let Some(f) = fired {
            info!(
                "Timer: slot {} due at {:02}:{:02} -> {}",
                f.slot,
                now.hour,
                now.minute,
                if f.on { "ON" } else { "OFF" }
            );
        }
        fired
    }

    /// Clear the armed bit everywhere; days, time and action stay.
    pub fn disarm_all(&mut self) {
        for t in &mut self.slots {
            t.disarm();
        }
        info!("Timer: all slots disarmed");
    }
}
