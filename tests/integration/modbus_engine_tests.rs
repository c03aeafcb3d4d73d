//! Integration tests for the Modbus engine → Device → ConfigStore chain.
//!
//! Requests go in as raw PDUs (or whole MBAP frames) and the answers are
//! checked byte for byte, the way a Modbus master would see them.

use smartplug::app::events::AppEvent;
use smartplug::app::service::{BootMode, Device};
use smartplug::config::Capabilities;
use smartplug::events::EventKind;
use smartplug::modbus::ModbusEngine;
use smartplug::modbus::codec::FrameDecoder;
use smartplug::modbus::pdu::Pdu;
use smartplug::scheduler::{ACTIVE_MASK, DAILY};
use smartplug::store::ConfigStore;

use super::mock_hw::{MockEeprom, RecordingSink, wall};

fn boot(caps: Capabilities, port: MockEeprom) -> (Device<MockEeprom>, RecordingSink) {
    let mut sink = RecordingSink::new();
    let store = ConfigStore::load(port).unwrap();
    let mut dev = Device::new(caps, store);
    dev.boot(BootMode::Run, None, &mut sink);
    (dev, sink)
}

fn fresh(caps: Capabilities) -> (ModbusEngine, Device<MockEeprom>, RecordingSink) {
    let (dev, sink) = boot(caps, MockEeprom::erased());
    (ModbusEngine::new(caps, 1), dev, sink)
}

fn read_pdu(address: u16, count: u16) -> [u8; 5] {
    let a = address.to_be_bytes();
    let c = count.to_be_bytes();
    [0x03, a[0], a[1], c[0], c[1]]
}

fn write_pdu(address: u16, value: u16) -> [u8; 5] {
    let a = address.to_be_bytes();
    let v = value.to_be_bytes();
    [0x06, a[0], a[1], v[0], v[1]]
}

fn send(engine: &ModbusEngine, dev: &mut Device<MockEeprom>, sink: &mut RecordingSink, pdu: &[u8]) -> Pdu {
    engine.handle_pdu(pdu, dev, None, sink)
}

/// Read `count` registers and return them as words.
fn read_words(engine: &ModbusEngine, dev: &mut Device<MockEeprom>, address: u16, count: u16) -> Vec<u16> {
    let resp = send(engine, dev, &mut RecordingSink::new(), &read_pdu(address, count));
    assert_eq!(resp[0], 0x03, "read failed: {:02x?}", &resp[..]);
    assert_eq!(usize::from(resp[1]), 2 * usize::from(count));
    resp[2..]
        .chunks_exact(2)
        .map(|w| u16::from_be_bytes([w[0], w[1]]))
        .collect()
}

// ── Persistence scenario ──────────────────────────────────────

#[test]
fn default_on_flag_survives_reboot() {
    let (engine, mut dev, mut sink) = fresh(Capabilities::full());

    // Uninitialised image: defaults written and committed once.
    assert_eq!(dev.store().port().commits, 1);
    assert_eq!(read_words(&engine, &mut dev, 2, 1), vec![0xF800]);
    assert_eq!(read_words(&engine, &mut dev, 11, 2), vec![0x3F80, 0x0000]);

    let req = write_pdu(2, 0x0001);
    assert_eq!(&send(&engine, &mut dev, &mut sink, &req)[..], &req);
    assert_eq!(read_words(&engine, &mut dev, 2, 1), vec![0xF801]);
    assert!(dev.store().is_pending());

    assert_eq!(&send(&engine, &mut dev, &mut sink, &[0x42])[..], &[0x42]);
    assert_eq!(dev.store().port().commits, 2);
    assert!(sink.events.iter().any(|e| matches!(e, AppEvent::Committed)));

    let port = dev.into_store().into_inner().reboot();
    let (mut dev, _) = boot(Capabilities::full(), port);
    assert_eq!(dev.store().flags(), 0x0001);
    assert!(dev.switch_on());
    assert_eq!(read_words(&engine, &mut dev, 1, 2), vec![255, 0xF801]);
    assert_eq!(dev.events().last(), Some(u16::from(EventKind::DefaultOn as u8) << 11));
}

#[test]
fn staged_flag_is_lost_without_commit() {
    let (engine, mut dev, mut sink) = fresh(Capabilities::full());
    send(&engine, &mut dev, &mut sink, &write_pdu(2, 1));
    let port = dev.into_store().into_inner().reboot();
    let (dev, _) = boot(Capabilities::full(), port);
    assert_eq!(dev.store().flags(), 0);
    assert!(!dev.switch_on());
}

#[test]
fn second_commit_is_negative_acknowledge() {
    let (engine, mut dev, mut sink) = fresh(Capabilities::full());
    send(&engine, &mut dev, &mut sink, &write_pdu(2, 1));
    assert_eq!(&send(&engine, &mut dev, &mut sink, &[0x42])[..], &[0x42]);
    let commits = dev.store().port().commits;
    assert_eq!(&send(&engine, &mut dev, &mut sink, &[0x42])[..], &[0xC2, 0x07]);
    assert_eq!(dev.store().port().commits, commits);
}

#[test]
fn failed_commit_stays_pending_for_retry() {
    let (engine, mut dev, mut sink) = fresh(Capabilities::full());
    let fail = dev.store().port().fail_commits.clone();
    send(&engine, &mut dev, &mut sink, &write_pdu(2, 1));

    fail.set(true);
    assert_eq!(&send(&engine, &mut dev, &mut sink, &[0x42])[..], &[0xC2, 0x07]);
    assert!(dev.store().is_pending());

    fail.set(false);
    assert_eq!(&send(&engine, &mut dev, &mut sink, &[0x42])[..], &[0x42]);
    assert!(!dev.store().is_pending());
}

#[test]
fn only_bit_zero_of_the_flag_word_is_stored() {
    let (engine, mut dev, mut sink) = fresh(Capabilities::basic());
    send(&engine, &mut dev, &mut sink, &write_pdu(2, 0xFFFF));
    assert_eq!(dev.store().flags(), 0x0001);
    // Basic device: only the always-on Modbus capability bit.
    assert_eq!(read_words(&engine, &mut dev, 2, 1), vec![0x2001]);
}

// ── Switch register ───────────────────────────────────────────

#[test]
fn switch_register_carries_intensity() {
    let (engine, mut dev, mut sink) = fresh(Capabilities::full());
    send(&engine, &mut dev, &mut sink, &write_pdu(1, 128));
    assert!(dev.switch_on());
    assert_eq!(read_words(&engine, &mut dev, 1, 1), vec![128]);

    send(&engine, &mut dev, &mut sink, &write_pdu(1, 0));
    assert!(!dev.switch_on());
    assert_eq!(read_words(&engine, &mut dev, 1, 1), vec![0]);

    assert_eq!(&send(&engine, &mut dev, &mut sink, &write_pdu(1, 256))[..], &[0x86, 0x03]);
    assert!(!dev.switch_on());
}

#[test]
fn modbus_switching_is_recorded_as_events() {
    let (engine, mut dev, mut sink) = fresh(Capabilities::full());
    send(&engine, &mut dev, &mut sink, &write_pdu(1, 1));
    send(&engine, &mut dev, &mut sink, &write_pdu(1, 0));
    assert_eq!(
        read_words(&engine, &mut dev, 55, 3),
        vec![2, (EventKind::ModbusOn as u16) << 11, (EventKind::ModbusOff as u16) << 11]
    );
    // Past the count the event zone reads zero.
    assert_eq!(read_words(&engine, &mut dev, 58, 2), vec![0, 0]);
}

// ── Address validation ────────────────────────────────────────

#[test]
fn basic_device_map_ends_after_counters() {
    let (engine, mut dev, mut sink) = fresh(Capabilities::basic());
    assert_eq!(engine.map().max_address(), 8);
    assert_eq!(read_words(&engine, &mut dev, 1, 8).len(), 8);
    assert_eq!(&send(&engine, &mut dev, &mut sink, &read_pdu(8, 2))[..], &[0x83, 0x02]);
    assert_eq!(&send(&engine, &mut dev, &mut sink, &read_pdu(0, 1))[..], &[0x83, 0x02]);
    assert_eq!(&send(&engine, &mut dev, &mut sink, &read_pdu(1, 0))[..], &[0x83, 0x02]);
}

#[test]
fn basic_device_rejects_optional_function_codes() {
    let (engine, mut dev, mut sink) = fresh(Capabilities::basic());
    let fc10 = [0x10, 0, 23, 0, 2, 4, 0x80, 0x01, 0x07, 0x00];
    assert_eq!(&send(&engine, &mut dev, &mut sink, &fc10)[..], &[0x90, 0x01]);
    assert_eq!(&send(&engine, &mut dev, &mut sink, &[0x43, 0x00])[..], &[0xC3, 0x01]);
    assert_eq!(&send(&engine, &mut dev, &mut sink, &write_pdu(9, 0))[..], &[0x86, 0x02]);
    assert_eq!(&send(&engine, &mut dev, &mut sink, &[0x04, 0, 1, 0, 1])[..], &[0x84, 0x01]);
}

#[test]
fn read_limit_is_125_registers() {
    let caps = Capabilities::full();
    let (engine, mut dev, mut sink) = fresh(caps);
    assert_eq!(engine.map().max_address(), 97);
    assert_eq!(read_words(&engine, &mut dev, 1, 97).len(), 97);
    assert_eq!(&send(&engine, &mut dev, &mut sink, &read_pdu(1, 98))[..], &[0x83, 0x02]);
    assert_eq!(&send(&engine, &mut dev, &mut sink, &read_pdu(1, 126))[..], &[0x83, 0x02]);
}

// ── Timers ────────────────────────────────────────────────────

#[test]
fn timer_slots_are_written_and_persisted_immediately() {
    let (engine, mut dev, mut sink) = fresh(Capabilities::full());
    let days = u16::from(ACTIVE_MASK | DAILY);
    let slot = [(days << 8) | 1, (7 << 8) | 30];
    let mut req = vec![0x10, 0, 25, 0, 2, 4];
    for w in slot {
        req.extend_from_slice(&w.to_be_bytes());
    }
    let commits = dev.store().port().commits;
    assert_eq!(&send(&engine, &mut dev, &mut sink, &req)[..], &[0x10, 0, 25, 0, 2]);
    assert_eq!(dev.store().port().commits, commits + 1);
    assert_eq!(read_words(&engine, &mut dev, 25, 2), slot.to_vec());

    // Slot 1 fires on its minute, without a commit.
    dev.timer_tick(wall(2, 7, 30), &mut sink);
    assert!(dev.switch_on());

    let port = dev.into_store().into_inner().reboot();
    let (mut dev, _) = boot(Capabilities::full(), port);
    assert_eq!(read_words(&engine, &mut dev, 25, 2), slot.to_vec());
}

#[test]
fn misaligned_timer_writes_are_rejected() {
    let (engine, mut dev, mut sink) = fresh(Capabilities::full());
    let odd_start = [0x10, 0, 24, 0, 2, 4, 0, 0, 0, 0];
    let half_slot = [0x10, 0, 23, 0, 1, 2, 0, 0];
    let past_end = [0x10, 0, 53, 0, 4, 8, 0, 0, 0, 0, 0, 0, 0, 0];
    let short = [0x10, 0, 23, 0, 2, 4, 0, 0];
    assert_eq!(&send(&engine, &mut dev, &mut sink, &odd_start)[..], &[0x90, 0x02]);
    assert_eq!(&send(&engine, &mut dev, &mut sink, &half_slot)[..], &[0x90, 0x02]);
    assert_eq!(&send(&engine, &mut dev, &mut sink, &past_end)[..], &[0x90, 0x02]);
    assert_eq!(&send(&engine, &mut dev, &mut sink, &short)[..], &[0x90, 0x03]);
}

// ── Energy ────────────────────────────────────────────────────

#[test]
fn calibration_factor_is_readable_and_committable() {
    let (engine, mut dev, mut sink) = fresh(Capabilities::full());
    let reading = smartplug::energy::RawReading {
        power: 50.0,
        voltage: None,
        current: None,
    };
    dev.fast_tick(1000, Some(&reading), None, &mut sink);

    let mut req = vec![0x43, 2];
    req.extend_from_slice(&55.0f32.to_be_bytes());
    assert_eq!(&send(&engine, &mut dev, &mut sink, &req)[..], &[0x43]);

    let expected = (55.0f32 / 50.0).to_bits();
    let words = read_words(&engine, &mut dev, 15, 2);
    assert_eq!((u32::from(words[0]) << 16) | u32::from(words[1]), expected);
    assert!(dev.store().is_pending());
    assert_eq!(&send(&engine, &mut dev, &mut sink, &[0x42])[..], &[0x42]);

    // Reset to 1.0 with the short form.
    assert_eq!(&send(&engine, &mut dev, &mut sink, &[0x43, 2])[..], &[0x43]);
    assert_eq!(read_words(&engine, &mut dev, 15, 2), vec![0x3F80, 0]);

    assert_eq!(&send(&engine, &mut dev, &mut sink, &[0x43, 3])[..], &[0xC3, 0x03]);
    assert_eq!(&send(&engine, &mut dev, &mut sink, &[0x43, 0, 1])[..], &[0xC3, 0x03]);
}

#[test]
fn reads_may_start_or_end_inside_a_float() {
    let (engine, mut dev, mut sink) = fresh(Capabilities::full());
    let reading = smartplug::energy::RawReading {
        power: 0.0,
        voltage: Some(200.0),
        current: None,
    };
    dev.fast_tick(1000, Some(&reading), None, &mut sink);

    let mut req = vec![0x43, 0];
    req.extend_from_slice(&230.0f32.to_be_bytes());
    assert_eq!(&send(&engine, &mut dev, &mut sink, &req)[..], &[0x43]);
    // 1.15f32 = 0x3F93_3333, voltage factor at 11–12.
    assert_eq!(read_words(&engine, &mut dev, 11, 2), vec![0x3F93, 0x3333]);

    // Low half alone.
    assert_eq!(&send(&engine, &mut dev, &mut sink, &read_pdu(12, 1))[..], &[0x03, 0x02, 0x33, 0x33]);
    // Low half of Wh, then high half of the voltage factor.
    assert_eq!(
        &send(&engine, &mut dev, &mut sink, &read_pdu(10, 2))[..],
        &[0x03, 0x04, 0x00, 0x00, 0x3F, 0x93]
    );
    // Low half of the voltage factor, then high half of the current factor.
    assert_eq!(read_words(&engine, &mut dev, 12, 2), vec![0x3333, 0x3F80]);
}

#[test]
fn auto_off_registers_drive_the_trip() {
    let (engine, mut dev, mut sink) = fresh(Capabilities::full());
    send(&engine, &mut dev, &mut sink, &write_pdu(96, 100));
    send(&engine, &mut dev, &mut sink, &write_pdu(97, 2));
    assert_eq!(read_words(&engine, &mut dev, 96, 2), vec![100, 2]);
    assert_eq!(dev.store().auto_off(), (100, 2));

    send(&engine, &mut dev, &mut sink, &write_pdu(1, 255));
    let low = smartplug::energy::RawReading {
        power: 1.0,
        voltage: None,
        current: Some(0.05),
    };
    dev.fast_tick(1000, Some(&low), None, &mut sink);
    assert!(dev.switch_on());
    dev.fast_tick(1000, Some(&low), None, &mut sink);
    assert!(!dev.switch_on());
    assert_eq!(sink.count(|e| matches!(e, AppEvent::AutoOff { .. })), 1);
    assert_eq!(dev.events().last(), Some((EventKind::AutoOff as u16) << 11));
}

#[test]
fn watt_hours_reset_only_with_zero() {
    let (engine, mut dev, mut sink) = fresh(Capabilities::full());
    let reading = smartplug::energy::RawReading {
        power: 3600.0,
        voltage: None,
        current: None,
    };
    dev.fast_tick(1000, Some(&reading), None, &mut sink);
    assert!(dev.energy().accumulated_wh() > 0.0);
    assert_eq!(&send(&engine, &mut dev, &mut sink, &write_pdu(9, 5))[..], &[0x86, 0x03]);
    assert!(dev.energy().accumulated_wh() > 0.0);
    send(&engine, &mut dev, &mut sink, &write_pdu(9, 0));
    assert_eq!(dev.energy().accumulated_wh(), 0.0);
}

// ── MBAP framing ──────────────────────────────────────────────

#[test]
fn frames_for_other_units_get_no_reply() {
    let (engine, mut dev, mut sink) = fresh(Capabilities::full());
    let mut decoder = FrameDecoder::new();
    let mut out = [0u8; 260];

    let foreign = [0x00, 0x07, 0, 0, 0, 6, 9, 0x06, 0, 1, 0, 1];
    let (_, frame) = decoder.feed(&foreign);
    let frame = frame.unwrap();
    assert_eq!(engine.handle_frame(&frame, &mut dev, None, &mut sink, &mut out), None);
    assert!(!dev.switch_on());

    let ours = [0x12, 0x34, 0, 0, 0, 6, 1, 0x03, 0, 1, 0, 1];
    let (_, frame) = decoder.feed(&ours);
    let frame = frame.unwrap();
    let n = engine.handle_frame(&frame, &mut dev, None, &mut sink, &mut out).unwrap();
    assert_eq!(&out[..n], &[0x12, 0x34, 0, 0, 0, 5, 1, 0x03, 2, 0, 0]);
}
