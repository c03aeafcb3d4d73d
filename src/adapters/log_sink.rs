//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing structured application events to
//! the logger (UART in production, stderr on the host). Telemetry is
//! printed as one JSON object per line so it can be scraped off the
//! console.

use log::{info, warn};

use crate::app::events::AppEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`AppEvent`] to the serial console.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AppEvent) {
        match event {
            AppEvent::Telemetry(t) => match serde_json::to_string(t) {
                Ok(json) => info!("TELEM | {}", json),
                Err(e) => warn!("TELEM | serialisation failed: {}", e),
            },
            AppEvent::Started { mode, switch_on } => {
                info!("START | mode={:?} switch={}", mode, if *switch_on { "ON" } else { "OFF" });
            }
            AppEvent::SwitchChanged { source, on, value } => {
                info!("SWITCH | {} value={} by {:?}", if *on { "ON" } else { "OFF" }, value, source);
            }
            AppEvent::EventRecorded(rec) => {
                info!(
                    "EVENT | {:?} {:02}/{:02} word={:#06x}",
                    rec.kind,
                    rec.hi,
                    rec.lo,
                    rec.encode()
                );
            }
            AppEvent::TimerFired(fired) => {
                info!("TIMER | slot {} -> {}", fired.slot, if fired.on { "ON" } else { "OFF" });
            }
            AppEvent::AutoOff { current_ma } => {
                info!("AUTOOFF | current {:.0} mA below threshold", current_ma);
            }
            AppEvent::Committed => {
                info!("STORE | committed");
            }
        }
    }
}
