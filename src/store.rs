//! Persistent device settings in a 512-byte EEPROM-style image.
//!
//! ```text
//!   offset  size    field
//!   ──────  ──────  ──────────────────────────────────────────
//!        0  u16     magic 0x4711 (image valid)
//!        2  u16     flags (bit 0 = switch on at boot)
//!        4  f32     voltage factor
//!        8  f32     current factor
//!       12  f32     power factor
//!       16  4 × 64  SSID, WiFi password, device name, OTA password
//!      272  16 × 4  timers: activeDays, onOff, hour, minute
//!      336  u16     auto-off threshold (mA)
//!      338  u16     auto-off cycles
//! ```
//!
//! Two write disciplines coexist:
//!
//! | Writer                      | Shadow | Commit                   |
//! |-----------------------------|--------|--------------------------|
//! | `stage_flags` `stage_factor`| yes    | deferred, `commit()`     |
//! | `store_timers`              | yes    | immediate                |
//! | `store_auto_off`            | yes    | immediate                |
//! | `store_params`              | yes    | immediate                |
//!
//! Every physical commit writes the whole image, so an immediate commit
//! also makes anything staged durable and clears the pending flag.

use log::{error, info, warn};

use crate::app::ports::{ConfigError, PersistPort, StorageError};
use crate::energy::MeasureKind;
use crate::scheduler::{NUM_TIMERS, Timer, TimerTable};

pub const EEPROM_SIZE: usize = 512;
pub const MAGIC: u16 = 0x4711;

const OFF_MAGIC: usize = 0;
const OFF_FLAGS: usize = 2;
const OFF_FACTORS: usize = 4;
const OFF_PARAMS: usize = 16;
const PARAM_SLOT: usize = 64;
const OFF_TIMERS: usize = OFF_PARAMS + PARAM_SLOT * NUM_PARAMS;
const TIMER_SLOT: usize = 4;
const OFF_AUTO_OFF_THRESHOLD: usize = OFF_TIMERS + TIMER_SLOT * NUM_TIMERS;
const OFF_AUTO_OFF_CYCLES: usize = OFF_AUTO_OFF_THRESHOLD + 2;

/// Longest storable parameter; the slot keeps one byte for the NUL.
pub const MAX_PARAM_LEN: usize = PARAM_SLOT - 1;
pub const NUM_PARAMS: usize = 4;

pub type ParamString = heapless::String<MAX_PARAM_LEN>;

// ── Free-text parameters ──────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param {
    Ssid = 0,
    Password = 1,
    DeviceName = 2,
    OtaPassword = 3,
}

impl Param {
    pub const ALL: [Param; NUM_PARAMS] = [
        Param::Ssid,
        Param::Password,
        Param::DeviceName,
        Param::OtaPassword,
    ];

    const fn offset(self) -> usize {
        OFF_PARAMS + PARAM_SLOT * self as usize
    }
}

/// The four user parameters entered through the configuration UI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    values: [ParamString; NUM_PARAMS],
}

impl Params {
    pub fn get(&self, which: Param) -> &str {
        self.values[which as usize].as_str()
    }

    /// Replace one parameter. Values longer than 63 bytes are rejected.
    pub fn set(&mut self, which: Param, value: &str) -> Result<(), ConfigError> {
        let mut s = ParamString::new();
        s.push_str(value)
            .map_err(|_| ConfigError::ValidationFailed("parameter longer than 63 bytes"))?;
        self.values[which as usize] = s;
        Ok(())
    }

    /// Number of non-empty parameters.
    pub fn filled(&self) -> usize {
        self.values.iter().filter(|v| !v.is_empty()).count()
    }

    /// All four parameters are set; otherwise the device boots to CONFIG mode.
    pub fn is_complete(&self) -> bool {
        self.filled() == NUM_PARAMS
    }
}

/// Result of [`ConfigStore::commit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// Nothing was staged; no physical write happened.
    NothingPending,
}

// ═══════════════════════════════════════════════════════════════
//  ConfigStore
// ═══════════════════════════════════════════════════════════════

/// Typed view over the persisted image.
///
/// Decoded values are cached in RAM so the accessors never touch the port.
/// Every mutation goes to both the cache and the port shadow.
pub struct ConfigStore<P: PersistPort> {
    port: P,
    pending: bool,
    flags: u16,
    factors: [f32; 3],
    params: Params,
    timers: TimerTable,
    auto_off_threshold: u16,
    auto_off_cycles: u16,
}

impl<P: PersistPort> ConfigStore<P> {
    /// Open the image, initialising it first if the magic is missing.
    pub fn load(port: P) -> Result<Self, StorageError> {
        let mut store = Self::with_defaults(port);
        store.read_image()?;
        Ok(store)
    }

    /// Open the image, or run on defaults when the port cannot be read.
    ///
    /// The device keeps working; a commit that fails later leaves the change
    /// pending as usual.
    pub fn load_or_defaults(port: P) -> Self {
        let mut store = Self::with_defaults(port);
        if let Err(e) = store.read_image() {
            error!("Store: image unreadable ({}), running on defaults", e);
            store.reset_cache();
        }
        store
    }

    fn with_defaults(port: P) -> Self {
        Self {
            port,
            pending: false,
            flags: 0,
            factors: [1.0; 3],
            params: Params::default(),
            timers: TimerTable::new(),
            auto_off_threshold: 0,
            auto_off_cycles: 0,
        }
    }

    fn reset_cache(&mut self) {
        self.flags = 0;
        self.factors = [1.0; 3];
        self.params = Params::default();
        self.timers = TimerTable::new();
        self.auto_off_threshold = 0;
        self.auto_off_cycles = 0;
    }

    fn read_image(&mut self) -> Result<(), StorageError> {
        if self.port.get_u16(OFF_MAGIC)? != MAGIC {
            self.initialise()?;
        }
        self.decode()?;
        info!(
            "Store: loaded (flags={:#06x}, factors={:?}, params={}/{}, timers armed={})",
            self.flags,
            self.factors,
            self.params.filled(),
            NUM_PARAMS,
            self.timers.armed_count()
        );
        Ok(())
    }

    fn initialise(&mut self) -> Result<(), StorageError> {
        warn!("Store: no valid image, writing defaults");
        self.port.put_u16(OFF_FLAGS, 0)?;
        for kind in MeasureKind::ALL {
            self.port.put_f32(factor_offset(kind), 1.0)?;
        }
        self.port.write(OFF_PARAMS, &[0u8; EEPROM_SIZE - OFF_PARAMS])?;
        self.port.put_u16(OFF_MAGIC, MAGIC)?;
        // A failed commit leaves the defaults pending; the device still runs.
        let _ = self.commit_now();
        Ok(())
    }

    fn decode(&mut self) -> Result<(), StorageError> {
        self.flags = self.port.get_u16(OFF_FLAGS)?;
        for kind in MeasureKind::ALL {
            self.factors[kind as usize] = self.port.get_f32(factor_offset(kind))?;
        }
        for which in Param::ALL {
            let mut raw = [0u8; PARAM_SLOT];
            self.port.read(which.offset(), &mut raw)?;
            let len = raw.iter().position(|b| *b == 0).unwrap_or(MAX_PARAM_LEN);
            let text = core::str::from_utf8(&raw[..len]).unwrap_or_else(|_| {
                warn!("Store: parameter {:?} is not valid UTF-8, ignored", which);
                ""
            });
            // Cannot fail: `len` is at most MAX_PARAM_LEN.
            let _ = self.params.set(which, text);
        }
        for slot in 0..NUM_TIMERS {
            let mut raw = [0u8; TIMER_SLOT];
            self.port.read(OFF_TIMERS + slot * TIMER_SLOT, &mut raw)?;
            self.timers.set(slot, Timer::from_bytes(raw));
        }
        self.auto_off_threshold = self.port.get_u16(OFF_AUTO_OFF_THRESHOLD)?;
        self.auto_off_cycles = self.port.get_u16(OFF_AUTO_OFF_CYCLES)?;
        Ok(())
    }

    // ── Accessors ─────────────────────────────────────────────

    /// Stored flag word (only [`CONF_MASK`](crate::config::CONF_MASK) bits).
    pub fn flags(&self) -> u16 {
        self.flags
    }

    pub fn factor(&self, kind: MeasureKind) -> f32 {
        self.factors[kind as usize]
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn timers(&self) -> &TimerTable {
        &self.timers
    }

    pub fn auto_off(&self) -> (u16, u16) {
        (self.auto_off_threshold, self.auto_off_cycles)
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    // ── Two-phase writers ─────────────────────────────────────

    pub fn stage_flags(&mut self, flags: u16) -> Result<(), StorageError> {
        let flags = flags & crate::config::CONF_MASK;
        self.port.put_u16(OFF_FLAGS, flags)?;
        self.flags = flags;
        self.pending = true;
        Ok(())
    }

    pub fn stage_factor(&mut self, kind: MeasureKind, factor: f32) -> Result<(), StorageError> {
        self.port.put_f32(factor_offset(kind), factor)?;
        self.factors[kind as usize] = factor;
        self.pending = true;
        Ok(())
    }

    /// Make staged changes durable. On failure the change stays pending.
    pub fn commit(&mut self) -> Result<CommitOutcome, StorageError> {
        if !self.pending {
            return Ok(CommitOutcome::NothingPending);
        }
        self.commit_now()?;
        info!("Store: pending changes committed");
        Ok(CommitOutcome::Committed)
    }

    // ── Immediate writers ─────────────────────────────────────

    /// Write consecutive timer slots starting at `first` and commit.
    pub fn store_timers(&mut self, first: usize, timers: &[Timer]) -> Result<(), StorageError> {
        if first + timers.len() > NUM_TIMERS {
            return Err(StorageError::OutOfRange);
        }
        for (i, t) in timers.iter().enumerate() {
            self.port
                .write(OFF_TIMERS + (first + i) * TIMER_SLOT, &t.to_bytes())?;
            self.timers.set(first + i, *t);
        }
        self.commit_now()
    }

    /// Persist the whole timer table, e.g. after disarming every slot.
    pub fn store_timer_table(&mut self, table: &TimerTable) -> Result<(), StorageError> {
        for (slot, t) in table.iter().enumerate() {
            self.port.write(OFF_TIMERS + slot * TIMER_SLOT, &t.to_bytes())?;
        }
        self.timers = *table;
        self.commit_now()
    }

    pub fn store_auto_off(&mut self, threshold_ma: u16, cycles: u16) -> Result<(), StorageError> {
        self.port.put_u16(OFF_AUTO_OFF_THRESHOLD, threshold_ma)?;
        self.port.put_u16(OFF_AUTO_OFF_CYCLES, cycles)?;
        self.auto_off_threshold = threshold_ma;
        self.auto_off_cycles = cycles;
        self.commit_now()
    }

    pub fn store_params(&mut self, params: &Params) -> Result<(), StorageError> {
        for which in Param::ALL {
            let mut raw = [0u8; PARAM_SLOT];
            let bytes = params.get(which).as_bytes();
            raw[..bytes.len()].copy_from_slice(bytes);
            self.port.write(which.offset(), &raw)?;
        }
        self.params = params.clone();
        self.commit_now()
    }

    fn commit_now(&mut self) -> Result<(), StorageError> {
        match self.port.commit() {
            Ok(()) => {
                self.pending = false;
                Ok(())
            }
            Err(e) => {
                error!("Store: commit failed: {}", e);
                self.pending = true;
                Err(e)
            }
        }
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn into_inner(self) -> P {
        self.port
    }
}

const fn factor_offset(kind: MeasureKind) -> usize {
    OFF_FACTORS + 4 * kind as usize
}
