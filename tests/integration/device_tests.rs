//! Integration tests for the Device core with its surrounding drivers
//! and adapters: boot modes, button gestures, WiFi events, ticks and the
//! relay reconciliation the main loop performs.

use smartplug::adapters::hardware::HardwareAdapter;
use smartplug::adapters::nvs::NvsEeprom;
use smartplug::adapters::wifi::{ConnectivityPort, WifiAdapter};
use smartplug::app::commands::{AppCommand, NetworkEvent, SwitchSource};
use smartplug::app::events::AppEvent;
use smartplug::app::ports::SwitchPort;
use smartplug::app::service::{BootMode, ButtonEvent, Device};
use smartplug::app::shared::SharedDevice;
use smartplug::config::Capabilities;
use smartplug::drivers::button::ButtonDriver;
use smartplug::energy::{MeasureKind, RawReading};
use smartplug::events::{EventKind, EventRecord};
use smartplug::scheduler::{DAILY, Timer};
use smartplug::store::{ConfigStore, Param, Params};

use super::mock_hw::{DeadEeprom, MockButton, MockEeprom, MockPin, RecordingSink, wall};

fn device(caps: Capabilities, mode: BootMode) -> (Device<MockEeprom>, RecordingSink) {
    let mut sink = RecordingSink::new();
    let store = ConfigStore::load(MockEeprom::erased()).unwrap();
    let mut dev = Device::new(caps, store);
    dev.boot(mode, None, &mut sink);
    (dev, sink)
}

fn kinds(dev: &Device<MockEeprom>) -> Vec<EventKind> {
    dev.events()
        .iter()
        .map(|w| EventRecord::decode(w).unwrap().kind)
        .collect()
}

// ── Boot ──────────────────────────────────────────────────────

#[test]
fn boot_mode_follows_button_and_params() {
    assert_eq!(BootMode::select(false, true), BootMode::Run);
    assert_eq!(BootMode::select(true, true), BootMode::Config);
    assert_eq!(BootMode::select(false, false), BootMode::Config);
}

#[test]
fn default_on_applies_only_in_run_mode() {
    let mut store = ConfigStore::load(MockEeprom::erased()).unwrap();
    store.stage_flags(1).unwrap();
    store.commit().unwrap();
    let port = store.into_inner().reboot();

    let mut sink = RecordingSink::new();
    let mut dev = Device::new(Capabilities::full(), ConfigStore::load(port).unwrap());
    dev.boot(BootMode::Config, None, &mut sink);
    assert!(!dev.switch_on());

    let port = dev.into_store().into_inner().reboot();
    let mut dev = Device::new(Capabilities::full(), ConfigStore::load(port).unwrap());
    dev.boot(BootMode::Run, None, &mut sink);
    assert!(dev.switch_on());
    assert_eq!(dev.switch_value(), 255);
    assert_eq!(kinds(&dev), vec![EventKind::DefaultOn]);
}

#[test]
fn unreadable_storage_boots_on_defaults() {
    let store = ConfigStore::load_or_defaults(DeadEeprom);
    assert_eq!(store.flags(), 0);
    assert_eq!(store.factor(MeasureKind::Voltage), 1.0);
    assert_eq!(store.auto_off(), (0, 0));
    assert_eq!(store.timers().armed_count(), 0);
    assert!(!store.params().is_complete());

    let mut sink = RecordingSink::new();
    let mut dev = Device::new(Capabilities::full(), store);
    dev.boot(BootMode::Run, None, &mut sink);
    assert!(!dev.switch_on());

    dev.set_switch(true, 255, SwitchSource::Modbus, None, &mut sink);
    assert!(dev.switch_on());
    assert!(dev.store_params(&Params::default()).is_err());
}

#[test]
fn stored_params_decide_completeness() {
    let (mut dev, _) = device(Capabilities::full(), BootMode::Config);
    assert!(!dev.store().params().is_complete());

    let mut params = Params::default();
    params.set(Param::Ssid, "HomeWiFi").unwrap();
    params.set(Param::Password, "secret-pass").unwrap();
    params.set(Param::DeviceName, "plug-kitchen").unwrap();
    params.set(Param::OtaPassword, "ota").unwrap();
    dev.store_params(&params).unwrap();

    let port = dev.into_store().into_inner().reboot();
    let store = ConfigStore::load(port).unwrap();
    assert!(store.params().is_complete());
    assert_eq!(store.params().get(Param::DeviceName), "plug-kitchen");
}

// ── Button ────────────────────────────────────────────────────

#[test]
fn button_is_ignored_in_config_mode() {
    let (mut dev, mut sink) = device(Capabilities::full(), BootMode::Config);
    dev.handle_button(ButtonEvent::Click, None, &mut sink);
    assert!(!dev.switch_on());
}

#[test]
fn click_and_double_click_toggle() {
    let (mut dev, mut sink) = device(Capabilities::full(), BootMode::Run);
    dev.handle_button(ButtonEvent::Click, None, &mut sink);
    assert!(dev.switch_on());
    assert_eq!(dev.switch_value(), 255);
    dev.handle_button(ButtonEvent::DoubleClick, None, &mut sink);
    assert!(!dev.switch_on());
    assert_eq!(kinds(&dev), vec![EventKind::ButtonOn, EventKind::ButtonOff]);
}

#[test]
fn long_press_disarms_timers_where_present() {
    let (mut dev, mut sink) = device(Capabilities::full(), BootMode::Run);
    dev.write_timers(0, &[Timer::armed(DAILY, true, 6, 0), Timer::armed(DAILY, false, 22, 0)])
        .unwrap();
    assert_eq!(dev.timers().armed_count(), 2);

    dev.handle_button(ButtonEvent::Press, None, &mut sink);
    assert_eq!(dev.timers().armed_count(), 0);
    assert!(!dev.switch_on());
    // Days and times survive disarming.
    assert_eq!(dev.timers().get(1).unwrap().hour, 22);

    let (mut dev, mut sink) = device(Capabilities::basic(), BootMode::Run);
    dev.handle_button(ButtonEvent::Press, None, &mut sink);
    assert!(dev.switch_on());
}

#[test]
fn debounced_click_reaches_the_device() {
    let (mut dev, mut sink) = device(Capabilities::full(), BootMode::Run);
    let mut button = ButtonDriver::new();
    let mut pin = MockButton::default();

    pin.set(true);
    let mut t = 0;
    while t <= 100 {
        button.poll(t, &mut pin);
        t += 5;
    }
    pin.set(false);
    while t <= 400 {
        button.poll(t, &mut pin);
        t += 5;
    }

    assert_eq!(button.queued(), 1);
    while let Some(ev) = button.next_event() {
        dev.handle_button(ev, None, &mut sink);
    }
    assert!(dev.switch_on());
}

// ── Network events ────────────────────────────────────────────

#[test]
fn wifi_loss_records_lost_disconn_conn() {
    let (mut dev, mut sink) = device(Capabilities::full(), BootMode::Run);
    let mut wifi = WifiAdapter::new();
    wifi.set_credentials("HomeWiFi", "mysecret8").unwrap();
    wifi.connect().unwrap();
    dev.network_event(NetworkEvent::Connected, wall(1, 8, 0), &mut sink);

    wifi.sim_drop_link();
    for ev in wifi.poll() {
        dev.network_event(ev, wall(1, 8, 5), &mut sink);
    }
    assert_eq!(
        kinds(&dev),
        vec![EventKind::WifiConn, EventKind::WifiLost, EventKind::WifiDisconn, EventKind::WifiConn]
    );
    let last = EventRecord::decode(dev.events().last().unwrap()).unwrap();
    assert_eq!((last.hi, last.lo), (8, 5));
}

#[test]
fn events_are_not_tracked_without_the_capability() {
    let mut caps = Capabilities::full();
    caps.event_tracking = false;
    let (mut dev, mut sink) = device(caps, BootMode::Run);
    dev.handle_button(ButtonEvent::Click, None, &mut sink);
    assert!(dev.events().is_empty());
    assert_eq!(sink.count(|e| matches!(e, AppEvent::EventRecorded(_))), 0);
}

#[test]
fn commands_dispatch_to_device_operations() {
    let (mut dev, mut sink) = device(Capabilities::full(), BootMode::Run);
    dev.handle_command(
        AppCommand::SetSwitch {
            on: true,
            value: 64,
            source: SwitchSource::Modbus,
        },
        None,
        &mut sink,
    );
    assert_eq!(dev.switch_register(), 64);

    dev.handle_command(AppCommand::Toggle(SwitchSource::Button), None, &mut sink);
    assert!(!dev.switch_on());

    dev.write_timers(0, &[Timer::armed(DAILY, true, 6, 0)]).unwrap();
    dev.handle_command(AppCommand::DisarmTimers, None, &mut sink);
    assert_eq!(dev.timers().armed_count(), 0);

    let reading = RawReading {
        power: 3600.0,
        voltage: None,
        current: None,
    };
    dev.fast_tick(1000, Some(&reading), None, &mut sink);
    dev.handle_command(AppCommand::ResetEnergy, None, &mut sink);
    assert_eq!(dev.energy().accumulated_wh(), 0.0);

    dev.handle_command(AppCommand::Network(NetworkEvent::Lost), None, &mut sink);
    assert_eq!(kinds(&dev).last(), Some(&EventKind::WifiLost));
}

// ── Ticks ─────────────────────────────────────────────────────

#[test]
fn first_valid_clock_stamps_boot_then_date_changes() {
    let (mut dev, mut sink) = device(Capabilities::full(), BootMode::Run);
    dev.timer_tick(None, &mut sink);
    assert!(dev.events().is_empty());

    dev.timer_tick(wall(3, 10, 15), &mut sink);
    assert_eq!(kinds(&dev), vec![EventKind::BootDate, EventKind::BootTime]);
    let boot_date = EventRecord::decode(dev.events().iter().next().unwrap()).unwrap();
    assert_eq!((boot_date.hi, boot_date.lo), (12, 3));

    dev.timer_tick(wall(3, 10, 16), &mut sink);
    assert_eq!(dev.events().len(), 2);

    let mut next_day = wall(4, 0, 1).unwrap();
    next_day.mday = 13;
    dev.timer_tick(Some(next_day), &mut sink);
    assert_eq!(kinds(&dev).last(), Some(&EventKind::DateChange));
}

#[test]
fn timers_switch_on_and_off() {
    let (mut dev, mut sink) = device(Capabilities::full(), BootMode::Run);
    dev.write_timers(3, &[Timer::armed(DAILY, true, 6, 30), Timer::armed(DAILY, false, 6, 45)])
        .unwrap();

    dev.timer_tick(wall(0, 6, 29), &mut sink);
    assert!(!dev.switch_on());
    dev.timer_tick(wall(0, 6, 30), &mut sink);
    assert!(dev.switch_on());
    dev.timer_tick(wall(0, 6, 45), &mut sink);
    assert!(!dev.switch_on());
    assert_eq!(sink.count(|e| matches!(e, AppEvent::TimerFired(_))), 2);
    assert_eq!(&kinds(&dev)[2..], &[EventKind::TimerOn, EventKind::TimerOff]);
}

#[test]
fn on_time_needs_current_on_metering_devices() {
    let (mut dev, mut sink) = device(Capabilities::full(), BootMode::Run);
    dev.set_switch(true, 255, SwitchSource::Modbus, None, &mut sink);

    let idle = RawReading {
        power: 0.0,
        voltage: None,
        current: Some(0.0),
    };
    dev.fast_tick(5000, Some(&idle), None, &mut sink);
    assert_eq!(dev.counters().on_time.elapsed_ms(), 0);
    assert_eq!(dev.counters().state_time.elapsed_ms(), 5000);

    let loaded = RawReading {
        power: 100.0,
        voltage: None,
        current: Some(0.5),
    };
    dev.fast_tick(5000, Some(&loaded), None, &mut sink);
    assert_eq!(dev.counters().on_time.elapsed_ms(), 5000);
    assert_eq!(dev.counters().uptime.elapsed_ms(), 10_000);

    let mut relay_only = Capabilities::full();
    relay_only.power_meter = false;
    let (mut dev, mut sink) = device(relay_only, BootMode::Run);
    dev.set_switch(true, 255, SwitchSource::Modbus, None, &mut sink);
    dev.fast_tick(5000, None, None, &mut sink);
    assert_eq!(dev.counters().on_time.elapsed_ms(), 5000);
}

#[test]
fn switching_restarts_state_time() {
    let (mut dev, mut sink) = device(Capabilities::basic(), BootMode::Run);
    dev.fast_tick(61_000, None, None, &mut sink);
    assert_eq!(dev.counters().state_time.registers(), [0, (1 << 8) | 1]);
    dev.toggle(SwitchSource::Button, None, &mut sink);
    assert_eq!(dev.counters().state_time.elapsed_ms(), 0);
    assert_eq!(dev.counters().uptime.elapsed_ms(), 61_000);
}

#[test]
fn external_entry_point_records_fauxmo_events() {
    let (mut dev, mut sink) = device(Capabilities::full(), BootMode::Run);
    dev.external_set_state(1, "plug", true, 200, None, &mut sink);
    assert!(dev.switch_on());
    assert_eq!(dev.switch_value(), 200);
    dev.external_set_state(1, "plug", false, 0, None, &mut sink);
    assert_eq!(kinds(&dev), vec![EventKind::FauxmoOn, EventKind::FauxmoOff]);
}

#[test]
fn telemetry_hides_meter_fields_without_meter() {
    let (dev, _) = device(Capabilities::basic(), BootMode::Run);
    let t = dev.telemetry();
    assert!(t.voltage.is_none());
    assert!(t.watt_hours.is_none());

    let (dev, _) = device(Capabilities::full(), BootMode::Run);
    assert_eq!(dev.telemetry().watt_hours, Some(0.0));
}

// ── Relay reconciliation ──────────────────────────────────────

#[test]
fn relay_follows_the_logical_switch_from_another_thread() {
    let store = ConfigStore::load(NvsEeprom::open().unwrap()).unwrap();
    let mut dev = Device::new(Capabilities::full(), store);
    dev.boot(BootMode::Run, None, &mut smartplug::adapters::log_sink::LogEventSink::new());
    let shared = SharedDevice::new(dev);

    let relay = MockPin::default();
    let led = MockPin::default();
    let mut hw = HardwareAdapter::new(relay.clone(), Some(led.clone()));

    let remote = shared.clone();
    std::thread::spawn(move || {
        let mut sink = smartplug::adapters::log_sink::LogEventSink::new();
        remote.lock(|dev| dev.set_switch(true, 255, SwitchSource::Modbus, None, &mut sink));
    })
    .join()
    .unwrap();

    // GPIO is untouched until the main loop reconciles.
    assert!(!relay.high.get());
    hw.apply(shared.lock(|dev| dev.switch_on()));
    assert!(relay.high.get());
    assert!(!led.high.get());

    let writes = relay.writes.get();
    hw.apply(shared.lock(|dev| dev.switch_on()));
    assert_eq!(relay.writes.get(), writes);
}
