//! Device service: the hexagonal core.
//!
//! [`Device`] owns every piece of runtime state the plug has: the logical
//! switch, time counters, energy aggregator, auto-off counter, event
//! history and the persisted settings. It exposes a hardware-agnostic API;
//! all I/O flows through port traits or plain values handed in by the
//! caller, so the whole core is testable with mock adapters.
//!
//! ```text
//!   Button ──┐                                  ┌──▶ EventSink
//!   Modbus ──┤   ┌───────────────────────────┐  │
//!   Timers ──┼──▶│          Device           │──┤
//!   Meter  ──┤   │ switch · counters · energy│  │
//!   WiFi   ──┘   │ events · ConfigStore<P>   │  └──▶ switch_on() ──▶ relay
//!                └───────────────────────────┘
//! ```
//!
//! The device never drives GPIO itself. The main loop reconciles the relay
//! from [`Device::switch_on`] on every iteration, so callers on other
//! threads only ever touch logical state.

use log::{debug, error, info, warn};

use crate::config::{CONF_DEFAULT_ON, Capabilities};
use crate::energy::{AutoOff, EnergyMeter, MeasureKind, RawReading};
use crate::events::{EventKind, EventLog, EventRecord};
use crate::scheduler::{Timer, TimerTable};
use crate::store::{CommitOutcome, ConfigStore, Params};
use crate::time_count::Counters;

use super::commands::{AppCommand, NetworkEvent, SwitchSource};
use super::events::{AppEvent, TelemetryData};
use super::ports::{EventSink, PersistPort, StorageError, WallTime};

/// Intensity used by button, timer and boot toggles.
pub const FULL_VALUE: u8 = 255;

// ───────────────────────────────────────────────────────────────
// Boot mode
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootMode {
    /// Parameters missing or requested by the user: AP + web UI only.
    Config,
    /// Normal operation with network services.
    Run,
}

impl BootMode {
    /// CONFIG when the button was touched during the wait window or the
    /// parameter set is incomplete.
    pub fn select(button_seen: bool, params_complete: bool) -> Self {
        if button_seen || !params_complete {
            Self::Config
        } else {
            Self::Run
        }
    }
}

/// Gestures delivered by the button driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
    Click,
    DoubleClick,
    Press,
}

// ───────────────────────────────────────────────────────────────
// Device
// ───────────────────────────────────────────────────────────────

pub struct Device<P: PersistPort> {
    caps: Capabilities,
    store: ConfigStore<P>,
    mode: BootMode,
    switch_on: bool,
    switch_value: u8,
    counters: Counters,
    energy: EnergyMeter,
    auto_off: AutoOff,
    events: EventLog,
    /// Day of month seen on the previous timer tick.
    last_mday: Option<u8>,
    boot_stamped: bool,
}

impl<P: PersistPort> Device<P> {
    /// Construct the device around a loaded store. The switch starts OFF;
    /// call [`boot`](Self::boot) next.
    pub fn new(caps: Capabilities, store: ConfigStore<P>) -> Self {
        let factors = MeasureKind::ALL.map(|k| store.factor(k));
        Self {
            caps,
            store,
            mode: BootMode::Config,
            switch_on: false,
            switch_value: 0,
            counters: Counters::default(),
            energy: EnergyMeter::new(factors),
            auto_off: AutoOff::default(),
            events: EventLog::new(),
            last_mday: None,
            boot_stamped: false,
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Enter `mode`. In RUN mode the default-on flag switches the load on.
    pub fn boot(&mut self, mode: BootMode, now: Option<WallTime>, sink: &mut impl EventSink) {
        self.mode = mode;
        if mode == BootMode::Run && self.store.flags() & CONF_DEFAULT_ON != 0 {
            self.set_switch(true, FULL_VALUE, SwitchSource::DefaultOn, now, sink);
        }
        sink.emit(&AppEvent::Started {
            mode,
            switch_on: self.switch_on,
        });
        info!("Device started in {:?} mode (caps={:?})", mode, self.caps);
    }

    // ── Switch ────────────────────────────────────────────────

    /// Set the logical switch. Every call restarts the time-in-state
    /// counter; turning off also clears the auto-off counter.
    pub fn set_switch(
        &mut self,
        on: bool,
        value: u8,
        source: SwitchSource,
        now: Option<WallTime>,
        sink: &mut impl EventSink,
    ) {
        info!("Switch {} (value={}, by {:?})", if on { "ON" } else { "OFF" }, value, source);
        self.switch_on = on;
        self.switch_value = value;
        self.counters.state_time.reset();
        if !on {
            self.auto_off.reset();
        }
        self.record_event(source.event_kind(on), now, sink);
        sink.emit(&AppEvent::SwitchChanged { source, on, value });
    }

    /// Entry point for the Hue emulation and web layers.
    pub fn external_set_state(
        &mut self,
        device_id: u8,
        name: &str,
        state: bool,
        value: u8,
        now: Option<WallTime>,
        sink: &mut impl EventSink,
    ) {
        debug!("External set state: id={} name={:?} state={} value={}", device_id, name, state, value);
        self.set_switch(state, value, SwitchSource::Fauxmo, now, sink);
    }

    pub fn toggle(&mut self, source: SwitchSource, now: Option<WallTime>, sink: &mut impl EventSink) {
        self.set_switch(!self.switch_on, FULL_VALUE, source, now, sink);
    }

    // ── Command handling ──────────────────────────────────────

    pub fn handle_command(&mut self, cmd: AppCommand, now: Option<WallTime>, sink: &mut impl EventSink) {
        match cmd {
            AppCommand::SetSwitch { on, value, source } => self.set_switch(on, value, source, now, sink),
            AppCommand::Toggle(source) => self.toggle(source, now, sink),
            AppCommand::DisarmTimers => self.disarm_timers(),
            AppCommand::ResetEnergy => self.reset_energy(),
            AppCommand::Network(ev) => self.network_event(ev, now, sink),
        }
    }

    /// RUN-mode button gestures. Click and double click toggle; a long
    /// press disarms all timers where timers exist and toggles otherwise.
    pub fn handle_button(&mut self, ev: ButtonEvent, now: Option<WallTime>, sink: &mut impl EventSink) {
        if self.mode != BootMode::Run {
            debug!("Button {:?} ignored in {:?} mode", ev, self.mode);
            return;
        }
        match ev {
            ButtonEvent::Press if self.caps.timers => self.disarm_timers(),
            _ => self.toggle(SwitchSource::Button, now, sink),
        }
    }

    pub fn network_event(&mut self, ev: NetworkEvent, now: Option<WallTime>, sink: &mut impl EventSink) {
        match ev {
            NetworkEvent::Connected => info!("WiFi: connected"),
            NetworkEvent::Disconnected => info!("WiFi: disconnected"),
            NetworkEvent::Lost => warn!("WiFi: link lost"),
        }
        self.record_event(ev.event_kind(), now, sink);
    }

    // ── Periodic ticks ────────────────────────────────────────

    /// Fast tick: counters, energy and auto-off.
    ///
    /// `reading` is the converted result of the meter sample taken outside
    /// the lock, or `None` when there is no meter or the sample failed.
    pub fn fast_tick(
        &mut self,
        elapsed_ms: u64,
        reading: Option<&RawReading>,
        now: Option<WallTime>,
        sink: &mut impl EventSink,
    ) {
        let current_refreshed = match reading {
            Some(r) if self.caps.power_meter => self.energy.update(r, elapsed_ms),
            _ => false,
        };

        let current = self.energy.measured(MeasureKind::Current);
        let counts_as_on = self.switch_on && (!self.caps.power_meter || current > 0.0);
        self.counters.tick(elapsed_ms, counts_as_on);

        if current_refreshed {
            let (threshold, cycles) = self.store.auto_off();
            if self.auto_off.evaluate(threshold, cycles, self.switch_on, current) {
                sink.emit(&AppEvent::AutoOff {
                    current_ma: current * 1000.0,
                });
                self.set_switch(false, 0, SwitchSource::AutoOff, now, sink);
            }
        }
    }

    /// Slow tick: boot/date events and timer evaluation. Does nothing
    /// until the wall clock is valid.
    pub fn timer_tick(&mut self, now: Option<WallTime>, sink: &mut impl EventSink) {
        let Some(t) = now else {
            debug!("Timer: no wall clock yet");
            return;
        };

        if !self.boot_stamped {
            self.boot_stamped = true;
            self.record_event(EventKind::BootDate, now, sink);
            self.record_event(EventKind::BootTime, now, sink);
        }
        if self.last_mday.is_some_and(|d| d != t.mday) {
            self.record_event(EventKind::DateChange, now, sink);
        }
        self.last_mday = Some(t.mday);

        if !self.caps.timers {
            return;
        }
        if let Some(fired) = self.store.timers().due(&t, self.switch_on) {
            sink.emit(&AppEvent::TimerFired(fired));
            self.set_switch(fired.on, FULL_VALUE, SwitchSource::Timer, now, sink);
        }
    }

    // ── Settings (called by the Modbus engine) ───────────────

    /// Stage the writable flag bits for the next commit.
    pub fn stage_flags(&mut self, flags: u16) -> Result<(), StorageError> {
        self.store.stage_flags(flags)
    }

    pub fn commit(&mut self, sink: &mut impl EventSink) -> Result<CommitOutcome, StorageError> {
        let outcome = self.store.commit()?;
        if outcome == CommitOutcome::Committed {
            sink.emit(&AppEvent::Committed);
        }
        Ok(outcome)
    }

    pub fn reset_energy(&mut self) {
        self.energy.reset_energy();
    }

    /// Change auto-off settings; persisted immediately.
    pub fn set_auto_off(&mut self, threshold_ma: Option<u16>, cycles: Option<u16>) -> Result<(), StorageError> {
        let (cur_threshold, cur_cycles) = self.store.auto_off();
        let threshold = threshold_ma.unwrap_or(cur_threshold);
        let cycles = cycles.unwrap_or(cur_cycles);
        self.auto_off.reset();
        self.store.store_auto_off(threshold, cycles)
    }

    /// Replace consecutive timer slots; persisted immediately.
    pub fn write_timers(&mut self, first_slot: usize, timers: &[Timer]) -> Result<(), StorageError> {
        self.store.store_timers(first_slot, timers)?;
        info!("Timer: slots {}..{} updated", first_slot, first_slot + timers.len());
        Ok(())
    }

    pub fn disarm_timers(&mut self) {
        let mut table = *self.store.timers();
        table.disarm_all();
        if let Err(e) = self.store.store_timer_table(&table) {
            error!("Timer: disarmed table not persisted: {}", e);
        }
    }

    /// Add a calibration sample (or reset with `None`) and stage the
    /// resulting factor. Returns the new factor.
    pub fn calibrate(&mut self, kind: MeasureKind, observed: Option<f32>) -> Result<f32, StorageError> {
        let factor = self.energy.calibrate(kind, observed);
        self.store.stage_factor(kind, factor)?;
        Ok(factor)
    }

    /// Web-config entry point: store all four parameters.
    pub fn store_params(&mut self, params: &Params) -> Result<(), StorageError> {
        self.store.store_params(params)
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn caps(&self) -> &Capabilities {
        &self.caps
    }

    pub fn mode(&self) -> BootMode {
        self.mode
    }

    pub fn switch_on(&self) -> bool {
        self.switch_on
    }

    pub fn switch_value(&self) -> u8 {
        self.switch_value
    }

    /// Register-1 view: 0 when off, else the stored intensity.
    pub fn switch_register(&self) -> u16 {
        if self.switch_on {
            u16::from(self.switch_value)
        } else {
            0
        }
    }

    /// Register-2 view: stored writable bits plus capability bits.
    pub fn flag_word(&self) -> u16 {
        (self.store.flags() & crate::config::CONF_MASK) | self.caps.flag_bits()
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn energy(&self) -> &EnergyMeter {
        &self.energy
    }

    pub fn auto_off_counter(&self) -> u16 {
        self.auto_off.counter()
    }

    pub fn auto_off_settings(&self) -> (u16, u16) {
        self.store.auto_off()
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn timers(&self) -> &TimerTable {
        self.store.timers()
    }

    pub fn store(&self) -> &ConfigStore<P> {
        &self.store
    }

    pub fn into_store(self) -> ConfigStore<P> {
        self.store
    }

    /// Build a telemetry snapshot from the current state.
    pub fn telemetry(&self) -> TelemetryData {
        let meter = self.caps.power_meter;
        let m = |k: MeasureKind| meter.then(|| self.energy.measured(k));
        TelemetryData {
            switch_on: self.switch_on,
            value: self.switch_value,
            uptime_s: self.counters.uptime.elapsed_ms() / 1000,
            state_time_s: self.counters.state_time.elapsed_ms() / 1000,
            on_time_s: self.counters.on_time.elapsed_ms() / 1000,
            voltage: m(MeasureKind::Voltage),
            current: m(MeasureKind::Current),
            power: m(MeasureKind::Power),
            watt_hours: meter.then(|| self.energy.accumulated_wh()),
            events: self.events.len(),
            timers_armed: self.store.timers().armed_count(),
        }
    }

    // ── Internal ──────────────────────────────────────────────

    fn record_event(&mut self, kind: EventKind, now: Option<WallTime>, sink: &mut impl EventSink) {
        if !self.caps.event_tracking {
            return;
        }
        let rec = EventRecord::stamped(kind, now);
        if self.events.record(rec) {
            sink.emit(&AppEvent::EventRecorded(rec));
        }
    }
}
