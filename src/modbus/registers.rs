//! Holding-register address map.
//!
//! Addresses are fixed; capabilities only decide which zones exist and
//! where the map ends.
//!
//! ```text
//!   reg      zone          content                              present
//!   ───────  ────────────  ───────────────────────────────────  ─────────
//!   1        switch        0 = off, else intensity 1–255        always
//!   2        flags         bit 0 default-on | capability bits   always
//!   3–4      uptime        hours, minute<<8 | second            always
//!   5–6      state time    (same packing)                       always
//!   7–8      on time       (same packing)                       always
//!   9–10     Wh            f32, high word first                 meter
//!   11–16    factors       f32 × 3: V, A, W                     meter
//!   17–22    measured      f32 × 3: V, A, W                     meter
//!   23–54    timers        2 regs × 16 slots                    timers
//!   55       event count                                        events
//!   56–95    events        oldest first, 0 past count           events
//!   96       auto-off mA                                        meter
//!   97       auto-off cycles                                    meter
//! ```
//!
//! Absent zones below the last present one read as zero.

use crate::app::ports::PersistPort;
use crate::app::service::Device;
use crate::config::Capabilities;
use crate::energy::MeasureKind;
use crate::events::MAX_EVENTS;
use crate::scheduler::NUM_TIMERS;

pub const REG_SWITCH: u16 = 1;
pub const REG_FLAGS: u16 = 2;
pub const REG_UPTIME: u16 = 3;
pub const REG_STATE_TIME: u16 = 5;
pub const REG_ON_TIME: u16 = 7;
pub const REG_WATT_HOURS: u16 = 9;
pub const REG_FACTORS: u16 = 11;
pub const REG_MEASURED: u16 = 17;
pub const REG_TIMERS: u16 = 23;
pub const REG_TIMERS_END: u16 = REG_TIMERS + 2 * NUM_TIMERS as u16 - 1;
pub const REG_EVENT_COUNT: u16 = 55;
pub const REG_EVENTS: u16 = 56;
pub const REG_EVENTS_END: u16 = REG_EVENTS + MAX_EVENTS as u16 - 1;
pub const REG_AUTO_OFF_THRESHOLD: u16 = 96;
pub const REG_AUTO_OFF_CYCLES: u16 = 97;

/// Highest address of the full map.
pub const MAX_REGISTERS: usize = REG_AUTO_OFF_CYCLES as usize;

const END_COUNTERS: u16 = 8;
const END_POWER: u16 = 22;

/// Byte image of every register, big-endian, composed in one go.
pub type Snapshot = [u8; 2 * MAX_REGISTERS];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    Switch,
    Flags,
    Counters,
    Power,
    Timers,
    EventCount,
    Events,
    AutoOff,
}

impl Zone {
    pub fn of(address: u16) -> Option<Self> {
        match address {
            REG_SWITCH => Some(Self::Switch),
            REG_FLAGS => Some(Self::Flags),
            REG_UPTIME..=END_COUNTERS => Some(Self::Counters),
            REG_WATT_HOURS..=END_POWER => Some(Self::Power),
            REG_TIMERS..=REG_TIMERS_END => Some(Self::Timers),
            REG_EVENT_COUNT => Some(Self::EventCount),
            REG_EVENTS..=REG_EVENTS_END => Some(Self::Events),
            REG_AUTO_OFF_THRESHOLD | REG_AUTO_OFF_CYCLES => Some(Self::AutoOff),
            _ => None,
        }
    }

    pub fn present(self, caps: &Capabilities) -> bool {
        match self {
            Self::Switch | Self::Flags | Self::Counters => true,
            Self::Power | Self::AutoOff => caps.power_meter,
            Self::Timers => caps.timers,
            Self::EventCount | Self::Events => caps.event_tracking,
        }
    }
}

/// Register layout resolved for one capability set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterMap {
    caps: Capabilities,
    max_address: u16,
}

impl RegisterMap {
    pub fn new(caps: Capabilities) -> Self {
        let max_address = if caps.power_meter {
            REG_AUTO_OFF_CYCLES
        } else if caps.event_tracking {
            REG_EVENTS_END
        } else if caps.timers {
            REG_TIMERS_END
        } else {
            END_COUNTERS
        };
        Self { caps, max_address }
    }

    pub fn max_address(&self) -> u16 {
        self.max_address
    }

    pub fn caps(&self) -> &Capabilities {
        &self.caps
    }

    /// Address belongs to a zone this device has.
    pub fn is_present(&self, address: u16) -> bool {
        Zone::of(address).is_some_and(|z| z.present(&self.caps))
    }

    /// `[address, address + count)` lies inside the map.
    pub fn read_range_valid(&self, address: u16, count: u16) -> bool {
        address != 0
            && count != 0
            && count < super::pdu::MAX_READ_COUNT
            && u32::from(address) + u32::from(count) - 1 <= u32::from(self.max_address)
    }

    /// Compose a consistent image of all live values.
    pub fn snapshot<P: PersistPort>(&self, dev: &Device<P>) -> Snapshot {
        let mut img = SnapshotWriter::new();

        img.put_u16(REG_SWITCH, dev.switch_register());
        img.put_u16(REG_FLAGS, dev.flag_word());
        let c = dev.counters();
        img.put_words(REG_UPTIME, &c.uptime.registers());
        img.put_words(REG_STATE_TIME, &c.state_time.registers());
        img.put_words(REG_ON_TIME, &c.on_time.registers());

        if self.caps.power_meter {
            let e = dev.energy();
            img.put_f32(REG_WATT_HOURS, e.accumulated_wh() as f32);
            for kind in MeasureKind::ALL {
                img.put_f32(REG_FACTORS + 2 * kind as u16, e.factor(kind));
                img.put_f32(REG_MEASURED + 2 * kind as u16, e.measured(kind));
            }
            let (threshold, cycles) = dev.auto_off_settings();
            img.put_u16(REG_AUTO_OFF_THRESHOLD, threshold);
            img.put_u16(REG_AUTO_OFF_CYCLES, cycles);
        }

        if self.caps.timers {
            for (slot, t) in dev.timers().iter().enumerate() {
                img.put_words(REG_TIMERS + 2 * slot as u16, &t.to_registers());
            }
        }

        if self.caps.event_tracking {
            let events = dev.events();
            img.put_u16(REG_EVENT_COUNT, events.len() as u16);
            for (i, word) in events.iter().enumerate() {
                img.put_u16(REG_EVENTS + i as u16, word);
            }
        }

        img.0
    }

    /// Register bytes for a validated range, straight out of a snapshot.
    pub fn slice(snapshot: &Snapshot, address: u16, count: u16) -> &[u8] {
        let start = 2 * (usize::from(address) - 1);
        &snapshot[start..start + 2 * usize::from(count)]
    }
}

struct SnapshotWriter(Snapshot);

impl SnapshotWriter {
    fn new() -> Self {
        Self([0; 2 * MAX_REGISTERS])
    }

    fn put_u16(&mut self, reg: u16, value: u16) {
        let at = 2 * (usize::from(reg) - 1);
        self.0[at..at + 2].copy_from_slice(&value.to_be_bytes());
    }

    fn put_words(&mut self, reg: u16, words: &[u16]) {
        for (i, w) in words.iter().enumerate() {
            self.put_u16(reg + i as u16, *w);
        }
    }

    fn put_f32(&mut self, reg: u16, value: f32) {
        let at = 2 * (usize::from(reg) - 1);
        self.0[at..at + 4].copy_from_slice(&value.to_be_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_end_follows_capabilities() {
        assert_eq!(RegisterMap::new(Capabilities::basic()).max_address(), 8);
        assert_eq!(RegisterMap::new(Capabilities::full()).max_address(), 97);
        let timers_only = Capabilities {
            timers: true,
            ..Capabilities::basic()
        };
        assert_eq!(RegisterMap::new(timers_only).max_address(), 54);
        let events = Capabilities {
            event_tracking: true,
            ..Capabilities::basic()
        };
        assert_eq!(RegisterMap::new(events).max_address(), 95);
    }

    #[test]
    fn zones_cover_every_address() {
        for a in 1..=MAX_REGISTERS as u16 {
            assert!(Zone::of(a).is_some(), "address {} unmapped", a);
        }
        assert_eq!(Zone::of(0), None);
        assert_eq!(Zone::of(98), None);
    }

    #[test]
    fn read_range_bounds() {
        let map = RegisterMap::new(Capabilities::full());
        assert!(map.read_range_valid(1, 97));
        assert!(map.read_range_valid(97, 1));
        assert!(!map.read_range_valid(0, 1));
        assert!(!map.read_range_valid(1, 0));
        assert!(!map.read_range_valid(97, 2));
        assert!(!map.read_range_valid(u16::MAX, 125));
    }

    #[test]
    fn absent_zone_is_not_present() {
        let map = RegisterMap::new(Capabilities {
            event_tracking: true,
            ..Capabilities::basic()
        });
        assert!(map.is_present(56));
        assert!(!map.is_present(23));
        assert!(!map.is_present(9));
    }
}
