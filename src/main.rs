//! SmartPlug firmware entry point.
//!
//! Hexagonal architecture: a pure [`Device`] core shared between the main
//! loop and the Modbus-TCP server thread.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  HardwareAdapter   LogEventSink   NvsEeprom     SystemClock    │
//! │  (SwitchPort)      (EventSink)    (PersistPort) (ClockPort)    │
//! │  WifiAdapter       Bl0937Sampler  NvsConfig                    │
//! │  (Connectivity)    (MeterPort)    (ConfigPort)                 │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │           SharedDevice<NvsEeprom> (pure logic)         │    │
//! │  │  switch · counters · energy · timers · events · store  │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │        ▲ main loop (core 1)          ▲ modbus-io (core 0)      │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Boot: KNOBBLINK for the config-wait window, then CONFIG mode (blink
//! CONFIGBLINK, network left to the external portal) or RUN mode (WiFi,
//! SNTP, Modbus server, periodic ticks).

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::Result;
use log::{error, info, warn};

use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::sntp::EspSntp;
use esp_idf_svc::wifi::{BlockingWifi, EspWifi};

use smartplug::adapters::hardware::HardwareAdapter;
use smartplug::adapters::log_sink::LogEventSink;
use smartplug::adapters::nvs::{self, NvsConfig, NvsEeprom};
use smartplug::adapters::time::SystemClock;
use smartplug::adapters::wifi::{ConnectivityPort, WifiAdapter};
use smartplug::app::commands::{AppCommand, NetworkEvent};
use smartplug::app::events::AppEvent;
use smartplug::app::ports::{ClockPort, ConfigPort, EventSink, MeterPort, SwitchPort};
use smartplug::app::service::{BootMode, Device};
use smartplug::app::shared::SharedDevice;
use smartplug::config::{Capabilities, SystemConfig};
use smartplug::drivers::blinker::{Blinker, CONFIGBLINK, KNOBBLINK, WIFIBLINK};
use smartplug::drivers::button::ButtonDriver;
use smartplug::drivers::hw_init::{self, GpioInput, GpioOutput};
use smartplug::error::{CommsError, Error};
use smartplug::modbus::{ServerConfig, server};
use smartplug::pins::PinMap;
use smartplug::sensors::{Bl0937Sampler, to_reading};
use smartplug::store::{ConfigStore, Param};

/// Main loop period. Short enough for the 5 ms button sampler.
const LOOP_PERIOD_MS: u64 = 5;

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  SmartPlug v{}                       ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 2. Load config from NVS (or defaults) ─────────────────
    if let Err(e) = nvs::init_flash() {
        warn!("NVS init failed ({}), settings will not persist", e);
    }
    let config = match NvsConfig::new().load() {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("NVS config load failed ({}), using defaults", e);
            SystemConfig::default()
        }
    };
    let caps = Capabilities::resolve(&config);
    let pins = PinMap::for_profile(config.profile);
    info!("Profile {:?}, caps {:?}", config.profile, caps);

    // ── 3. Peripherals ────────────────────────────────────────
    hw_init::init_peripherals(&pins).map_err(|e| {
        error!("HAL init failed: {}", e);
        Error::Init("GPIO configuration")
    })?;
    if let Err(e) = hw_init::init_isr_service(&pins) {
        error!("ISR service init failed: {}, continuing without energy metering", e);
    }

    let clock = SystemClock::new();
    let mut sink = LogEventSink::new();
    let mut hw = HardwareAdapter::new(GpioOutput(pins.relay), pins.power_led.map(GpioOutput));
    let mut blinker = Blinker::new(GpioOutput(pins.signal_led), true);
    let mut button = ButtonDriver::with_timing(config.double_click_ms, config.press_ms);
    let mut button_pin = GpioInput(pins.button);
    let ms = || clock.uptime_ms() as u32;

    // ── 4. Persisted image ────────────────────────────────────
    let eeprom = NvsEeprom::open().unwrap_or_else(|e| {
        error!("NVS image unavailable ({}), settings will not persist", e);
        NvsEeprom::erased()
    });
    let store = ConfigStore::load_or_defaults(eeprom);
    let params = store.params().clone();

    // ── 5. Boot window ────────────────────────────────────────
    hw.set_led_borrowed(pins.shared_led());
    blinker.start(KNOBBLINK, config.blink_step_ms, ms());
    let wait_start = ms();
    while ms().wrapping_sub(wait_start) < config.config_wait_ms {
        button.poll(ms(), &mut button_pin);
        blinker.update(ms());
        thread::sleep(Duration::from_millis(LOOP_PERIOD_MS));
    }
    blinker.stop();
    let button_seen = button.queued() > 0;
    button.clear_events();
    let mode = BootMode::select(button_seen, params.is_complete());

    let mut device = Device::new(caps, store);
    device.boot(mode, clock.now(), &mut sink);
    let shared = SharedDevice::new(device);

    if mode == BootMode::Config {
        info!("CONFIG mode: waiting for the configuration portal");
        blinker.start(CONFIGBLINK, config.blink_step_ms, ms());
        loop {
            blinker.update(ms());
            thread::sleep(Duration::from_millis(10));
        }
    }

    // ── 6. WiFi + SNTP ────────────────────────────────────────
    let peripherals = Peripherals::take()?;
    let sys_loop = EspSystemEventLoop::take()?;
    let esp_wifi = EspWifi::new(peripherals.modem, sys_loop.clone(), None)?;
    let mut wifi = WifiAdapter::new();
    wifi.attach(BlockingWifi::wrap(esp_wifi, sys_loop)?);
    wifi.set_hostname(params.get(Param::DeviceName));

    blinker.start(WIFIBLINK, config.blink_step_ms, ms());
    let connecting = AtomicBool::new(true);
    let connected = thread::scope(|s| {
        s.spawn(|| {
            while connecting.load(Ordering::Relaxed) {
                blinker.update(ms());
                thread::sleep(Duration::from_millis(10));
            }
        });
        let res = wifi
            .set_credentials(params.get(Param::Ssid), params.get(Param::Password))
            .and_then(|()| wifi.connect());
        connecting.store(false, Ordering::Relaxed);
        res
    });
    blinker.stop();
    hw.set_led_borrowed(false);
    match connected {
        Ok(()) => shared.lock(|dev| dev.network_event(NetworkEvent::Connected, clock.now(), &mut sink)),
        Err(e) => warn!("WiFi: initial connect failed ({}), retrying from the loop", e),
    }
    let _sntp = EspSntp::new_default()?;

    // ── 7. Modbus server ──────────────────────────────────────
    let _modbus = server::spawn(ServerConfig::from_system(&config), shared.clone(), clock.clone(), sink)
        .map_err(|e| {
            error!("Modbus: listener failed: {}", e);
            Error::from(CommsError::ListenFailed)
        })?;

    // ── 8. Main loop ──────────────────────────────────────────
    let mut meter = pins.meter.map(|m| Bl0937Sampler::new(m.sel));
    let update_interval = u64::from(config.effective_update_interval_ms());
    let timer_interval = u64::from(config.timer_interval_ms);
    let mut last_update = clock.uptime_ms();
    let mut last_timer = last_update;

    info!("System ready. Entering main loop.");

    loop {
        let now_ms = clock.uptime_ms();

        button.poll(now_ms as u32, &mut button_pin);
        while let Some(ev) = button.next_event() {
            shared.lock(|dev| dev.handle_button(ev, clock.now(), &mut sink));
        }

        if now_ms.saturating_sub(last_update) >= update_interval {
            // The sample blocks for a second; keep it outside the lock.
            let reading = meter.as_mut().and_then(|m| match m.sample() {
                Ok(pulses) => Some(to_reading(&pulses)),
                Err(e) => {
                    warn!("Energy: sample failed: {}", e);
                    None
                }
            });
            let t = clock.uptime_ms();
            let elapsed = t.saturating_sub(last_update);
            last_update = t;
            let wall = clock.now();

            let telemetry = shared.lock(|dev| {
                dev.fast_tick(elapsed, reading.as_ref(), wall, &mut sink);
                dev.telemetry()
            });
            for ev in wifi.poll() {
                shared.lock(|dev| dev.handle_command(AppCommand::Network(ev), wall, &mut sink));
            }
            sink.emit(&AppEvent::Telemetry(telemetry));
        }

        if now_ms.saturating_sub(last_timer) >= timer_interval {
            last_timer = now_ms;
            shared.lock(|dev| dev.timer_tick(clock.now(), &mut sink));
        }

        // Only this loop drives GPIO; Modbus writes land here.
        let on = shared.lock(|dev| dev.switch_on());
        hw.apply(on);

        thread::sleep(Duration::from_millis(LOOP_PERIOD_MS));
    }
}
