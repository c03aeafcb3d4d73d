//! Cross-thread access to the [`Device`].
//!
//! The main loop and the Modbus server thread both mutate the device. They
//! share one `Arc` around an `embassy-sync` blocking mutex, so every
//! request and every tick runs inside a single critical section:
//!
//! ```text
//!   main loop ──┐
//!               ├──▶ SharedDevice::lock(|dev| ...) ──▶ Device<P>
//!   modbus-io ──┘
//! ```
//!
//! Closures must stay short. Blocking work such as the one-second meter
//! sample happens outside the lock and only its result is handed in.

use core::cell::RefCell;
use std::sync::Arc;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

use super::ports::PersistPort;
use super::service::Device;

pub struct SharedDevice<P: PersistPort> {
    inner: Arc<Mutex<CriticalSectionRawMutex, RefCell<Device<P>>>>,
}

impl<P: PersistPort> Clone for SharedDevice<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: PersistPort> SharedDevice<P> {
    pub fn new(device: Device<P>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RefCell::new(device))),
        }
    }

    /// Run `f` with exclusive access to the device.
    pub fn lock<R>(&self, f: impl FnOnce(&mut Device<P>) -> R) -> R {
        self.inner.lock(|cell| f(&mut cell.borrow_mut()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::commands::SwitchSource;
    use crate::app::events::AppEvent;
    use crate::app::ports::{EventSink, StorageError};
    use crate::config::Capabilities;
    use crate::store::ConfigStore;

    struct NullSink;
    impl EventSink for NullSink {
        fn emit(&mut self, _event: &AppEvent) {}
    }

    struct Ram([u8; 512]);
    impl PersistPort for Ram {
        fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError> {
            buf.copy_from_slice(self.0.get(offset..offset + buf.len()).ok_or(StorageError::OutOfRange)?);
            Ok(())
        }
        fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), StorageError> {
            self.0
                .get_mut(offset..offset + data.len())
                .ok_or(StorageError::OutOfRange)?
                .copy_from_slice(data);
            Ok(())
        }
        fn commit(&mut self) -> Result<(), StorageError> {
            Ok(())
        }
    }

    #[test]
    fn clones_see_the_same_device() {
        let store = ConfigStore::load(Ram([0; 512])).unwrap();
        let shared = SharedDevice::new(Device::new(Capabilities::basic(), store));
        let other = shared.clone();
        other.lock(|dev| dev.set_switch(true, 9, SwitchSource::Modbus, None, &mut NullSink));
        assert_eq!(shared.lock(|dev| dev.switch_register()), 9);
    }
}
