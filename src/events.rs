//! Device event history.
//!
//! Every switch transition and a few housekeeping moments (boot, date
//! change, WiFi state) are recorded as a packed 16-bit word and kept in a
//! bounded ring that Modbus clients read oldest-first.
//!
//! ```text
//!  15        11 10       6 5          0
//! ┌────────────┬──────────┬────────────┐
//! │ kind (5 b) │  hi (5 b)│  lo (6 b)  │
//! └────────────┴──────────┴────────────┘
//!   date events:  hi = day of month, lo = month (1–12)
//!   other events: hi = hour,         lo = minute
//! ```
//!
//! The ring drops its oldest entry on overflow and refuses to store a word
//! identical to the most recent one.

use heapless::Deque;

use crate::app::ports::WallTime;

/// Number of event slots (and Modbus event registers).
pub const MAX_EVENTS: usize = 40;

/// Event types, in wire-tag order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EventKind {
    NoEvent     = 0,
    DateChange  = 1,
    BootDate    = 2,
    BootTime    = 3,
    DefaultOn   = 4,
    ButtonOn    = 5,
    ButtonOff   = 6,
    ModbusOn    = 7,
    ModbusOff   = 8,
    TimerOn     = 9,
    TimerOff    = 10,
    FauxmoOn    = 11,
    FauxmoOff   = 12,
    WifiDisconn = 13,
    WifiConn    = 14,
    WifiLost    = 15,
    AutoOff     = 16,
}

impl EventKind {
    /// Date events carry day/month instead of hour/minute.
    pub const fn is_date(self) -> bool {
        matches!(self, Self::BootDate | Self::DateChange)
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::NoEvent => "no event",
            Self::DateChange => "date change",
            Self::BootDate => "boot date",
            Self::BootTime => "boot time",
            Self::DefaultOn => "default on",
            Self::ButtonOn => "button on",
            Self::ButtonOff => "button off",
            Self::ModbusOn => "Modbus on",
            Self::ModbusOff => "Modbus off",
            Self::TimerOn => "timer on",
            Self::TimerOff => "timer off",
            Self::FauxmoOn => "Fauxmo on",
            Self::FauxmoOff => "Fauxmo off",
            Self::WifiDisconn => "WiFi disconn",
            Self::WifiConn => "WiFi connected",
            Self::WifiLost => "WiFi lost",
            Self::AutoOff => "low power auto off",
        }
    }
}

fn kind_from_u8(raw: u8) -> Option<EventKind> {
    match raw {
        0  => Some(EventKind::NoEvent),
        1  => Some(EventKind::DateChange),
        2  => Some(EventKind::BootDate),
        3  => Some(EventKind::BootTime),
        4  => Some(EventKind::DefaultOn),
        5  => Some(EventKind::ButtonOn),
        6  => Some(EventKind::ButtonOff),
        7  => Some(EventKind::ModbusOn),
        8  => Some(EventKind::ModbusOff),
        9  => Some(EventKind::TimerOn),
        10 => Some(EventKind::TimerOff),
        11 => Some(EventKind::FauxmoOn),
        12 => Some(EventKind::FauxmoOff),
        13 => Some(EventKind::WifiDisconn),
        14 => Some(EventKind::WifiConn),
        15 => Some(EventKind::WifiLost),
        16 => Some(EventKind::AutoOff),
        _  => None,
    }
}

// ── Packed event word ─────────────────────────────────────────

/// One recorded event: kind plus a coarse time or date stamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventRecord {
    pub kind: EventKind,
    pub hi: u8,
    pub lo: u8,
}

impl EventRecord {
    /// Stamp `kind` with `now`. Without a wall clock both fields are zero.
    pub fn stamped(kind: EventKind, now: Option<WallTime>) -> Self {
        let (hi, lo) = match now {
            Some(t) if kind.is_date() => (t.mday, t.month),
            Some(t) => (t.hour, t.minute),
            None => (0, 0),
        };
        Self {
            kind,
            hi: hi & 0x1F,
            lo: lo & 0x3F,
        }
    }

    pub fn encode(&self) -> u16 {
        (u16::from(self.kind as u8 & 0x1F) << 11)
            | (u16::from(self.hi & 0x1F) << 6)
            | u16::from(self.lo & 0x3F)
    }

    /// Returns `None` for tags outside the known kinds.
    pub fn decode(word: u16) -> Option<Self> {
        let kind = kind_from_u8((word >> 11) as u8)?;
        Some(Self {
            kind,
            hi: ((word >> 6) & 0x1F) as u8,
            lo: (word & 0x3F) as u8,
        })
    }
}

// ── Ring buffer ───────────────────────────────────────────────

/// Bounded FIFO of packed event words.
#[derive(Debug, Default)]
pub struct EventLog {
    words: Deque<u16, MAX_EVENTS>,
}

impl EventLog {
    pub const fn new() -> Self {
        Self {
            words: Deque::new(),
        }
    }

    /// Append a record. Returns `false` when it repeats the last word.
    pub fn record(&mut self, record: EventRecord) -> bool {
        let word = record.encode();
        if self.words.back() == Some(&word) {
            return false;
        }
        if self.words.is_full() {
            let _ = self.words.pop_front();
        }
        // Cannot fail: a slot was freed above if the ring was full.
        let _ = self.words.push_back(word);
        true
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn last(&self) -> Option<u16> {
        self.words.back().copied()
    }

    /// Oldest-first iteration.
    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.words.iter().copied()
    }
}
