//! Elapsed-time accumulators for uptime, time-in-state and ON time.
//!
//! Each counter adds the real elapsed milliseconds handed to it by the
//! fast tick, so a late tick does not lose time. Values are reported the
//! way the Modbus map wants them: whole hours in one register, minute and
//! second packed as `minute << 8 | second` in the next.

const MS_PER_SECOND: u64 = 1000;
const MS_PER_MINUTE: u64 = 60 * MS_PER_SECOND;
const MS_PER_HOUR: u64 = 60 * MS_PER_MINUTE;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeCount {
    elapsed_ms: u64,
}

impl TimeCount {
    pub const fn new() -> Self {
        Self { elapsed_ms: 0 }
    }

    pub fn add(&mut self, elapsed_ms: u64) {
        self.elapsed_ms = self.elapsed_ms.saturating_add(elapsed_ms);
    }

    pub fn reset(&mut self) {
        self.elapsed_ms = 0;
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    /// Whole hours, wrapping at 65536 like the 16-bit register does.
    pub fn hours(&self) -> u16 {
        (self.elapsed_ms / MS_PER_HOUR) as u16
    }

    pub fn minutes(&self) -> u8 {
        ((self.elapsed_ms / MS_PER_MINUTE) % 60) as u8
    }

    pub fn seconds(&self) -> u8 {
        ((self.elapsed_ms / MS_PER_SECOND) % 60) as u8
    }

    /// `[hours, minute << 8 | second]`
    pub fn registers(&self) -> [u16; 2] {
        [
            self.hours(),
            (u16::from(self.minutes()) << 8) | u16::from(self.seconds()),
        ]
    }
}

/// The three counters the device maintains.
#[derive(Debug, Clone, Copy, Default)]
pub struct Counters {
    pub uptime: TimeCount,
    /// Time since the last switch state change.
    pub state_time: TimeCount,
    /// Accumulated time with the load switched on (and drawing current,
    /// on metering devices).
    pub on_time: TimeCount,
}

impl Counters {
    pub fn tick(&mut self, elapsed_ms: u64, counts_as_on: bool) {
        self.uptime.add(elapsed_ms);
        self.state_time.add(elapsed_ms);
        if counts_as_on {
            self.on_time.add(elapsed_ms);
        }
    }
}
