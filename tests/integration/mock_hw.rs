//! Mock hardware adapters for integration tests.
//!
//! Records every port call so tests can assert on the full history
//! without touching real GPIO or flash.

use std::cell::{Cell, RefCell};
use std::convert::Infallible;
use std::rc::Rc;

use embedded_hal::digital::{ErrorType, InputPin, OutputPin};
use smartplug::app::events::AppEvent;
use smartplug::app::ports::{EventSink, PersistPort, StorageError, WallTime};
use smartplug::store::EEPROM_SIZE;

// ── MockEeprom ────────────────────────────────────────────────

/// EEPROM image with a RAM shadow and a separate "flash" copy that only
/// commits update.
pub struct MockEeprom {
    shadow: [u8; EEPROM_SIZE],
    flash: [u8; EEPROM_SIZE],
    pub commits: usize,
    /// Shared so tests can flip it after the device took ownership.
    pub fail_commits: Rc<Cell<bool>>,
}

#[allow(dead_code)]
impl MockEeprom {
    /// Factory-fresh flash: all bytes erased.
    pub fn erased() -> Self {
        Self {
            shadow: [0xFF; EEPROM_SIZE],
            flash: [0xFF; EEPROM_SIZE],
            commits: 0,
            fail_commits: Rc::default(),
        }
    }

    /// Power cycle: the shadow is reloaded from flash.
    pub fn reboot(mut self) -> Self {
        self.shadow = self.flash;
        self
    }

    pub fn flash(&self) -> &[u8; EEPROM_SIZE] {
        &self.flash
    }
}

impl PersistPort for MockEeprom {
    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        let src = self
            .shadow
            .get(offset..offset + buf.len())
            .ok_or(StorageError::OutOfRange)?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), StorageError> {
        let dst = self
            .shadow
            .get_mut(offset..offset + data.len())
            .ok_or(StorageError::OutOfRange)?;
        dst.copy_from_slice(data);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        if self.fail_commits.get() {
            return Err(StorageError::IoError);
        }
        self.flash = self.shadow;
        self.commits += 1;
        Ok(())
    }
}

/// Flash that cannot be read or written at all, e.g. an uninitialised
/// NVS partition.
pub struct DeadEeprom;

impl PersistPort for DeadEeprom {
    fn read(&self, _offset: usize, _buf: &mut [u8]) -> Result<(), StorageError> {
        Err(StorageError::IoError)
    }

    fn write(&mut self, _offset: usize, _data: &[u8]) -> Result<(), StorageError> {
        Err(StorageError::IoError)
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        Err(StorageError::IoError)
    }
}

// ── RecordingSink ─────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink {
    pub events: Vec<AppEvent>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, pred: impl Fn(&AppEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &AppEvent) {
        self.events.push(event.clone());
    }
}

// ── Pins ──────────────────────────────────────────────────────

/// Output pin recording its level and the number of writes.
#[derive(Clone, Default)]
pub struct MockPin {
    pub high: Rc<Cell<bool>>,
    pub writes: Rc<Cell<usize>>,
}

impl ErrorType for MockPin {
    type Error = Infallible;
}

impl OutputPin for MockPin {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.high.set(false);
        self.writes.set(self.writes.get() + 1);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.high.set(true);
        self.writes.set(self.writes.get() + 1);
        Ok(())
    }
}

/// Active-low button input; `pressed` pulls the line low.
#[derive(Clone, Default)]
pub struct MockButton {
    pub pressed: Rc<RefCell<bool>>,
}

#[allow(dead_code)]
impl MockButton {
    pub fn set(&self, pressed: bool) {
        *self.pressed.borrow_mut() = pressed;
    }
}

impl ErrorType for MockButton {
    type Error = Infallible;
}

impl InputPin for MockButton {
    fn is_high(&mut self) -> Result<bool, Infallible> {
        Ok(!*self.pressed.borrow())
    }

    fn is_low(&mut self) -> Result<bool, Infallible> {
        Ok(*self.pressed.borrow())
    }
}

// ── Helpers ───────────────────────────────────────────────────

#[allow(dead_code)]
pub fn wall(weekday: u8, hour: u8, minute: u8) -> Option<WallTime> {
    Some(WallTime {
        weekday,
        hour,
        minute,
        second: 0,
        mday: 12,
        month: 3,
    })
}
