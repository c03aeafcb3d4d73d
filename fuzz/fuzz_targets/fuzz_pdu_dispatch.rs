//! Fuzz target: `ModbusEngine::handle_pdu`
//!
//! Dispatches arbitrary request PDUs against a fully featured device and
//! checks that every answer is a well-formed reply or exception.
//!
//! cargo fuzz run fuzz_pdu_dispatch

#![no_main]

use libfuzzer_sys::fuzz_target;
use smartplug::app::events::AppEvent;
use smartplug::app::ports::{EventSink, PersistPort, StorageError};
use smartplug::app::service::{BootMode, Device};
use smartplug::config::Capabilities;
use smartplug::modbus::ModbusEngine;
use smartplug::store::ConfigStore;

struct Ram([u8; 512]);

impl PersistPort for Ram {
    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        let src = self.0.get(offset..offset + buf.len()).ok_or(StorageError::OutOfRange)?;
        buf.copy_from_slice(src);
        Ok(())
    }
    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), StorageError> {
        let dst = self.0.get_mut(offset..offset + data.len()).ok_or(StorageError::OutOfRange)?;
        dst.copy_from_slice(data);
        Ok(())
    }
    fn commit(&mut self) -> Result<(), StorageError> {
        Ok(())
    }
}

struct NullSink;
impl EventSink for NullSink {
    fn emit(&mut self, _event: &AppEvent) {}
}

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }
    let caps = Capabilities::full();
    let Ok(store) = ConfigStore::load(Ram([0xFF; 512])) else {
        return;
    };
    let mut dev = Device::new(caps, store);
    dev.boot(BootMode::Run, None, &mut NullSink);
    let engine = ModbusEngine::new(caps, 1);

    // Split the input into several requests against the same device.
    for pdu in data.split(|b| *b == 0xFF).filter(|p| !p.is_empty()) {
        let resp = engine.handle_pdu(pdu, &mut dev, None, &mut NullSink);
        assert!(!resp.is_empty());
        if resp[0] & 0x80 != 0 {
            assert_eq!(resp.len(), 2);
            assert!(matches!(resp[1], 0x01 | 0x02 | 0x03 | 0x07));
        }
    }
});
