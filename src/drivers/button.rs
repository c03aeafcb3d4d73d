//! Debounced push-button driver with click, double-click and press detection.
//!
//! ## Hardware
//!
//! Active-low momentary switch with pull-up. The main loop polls the pin;
//! sampling is rate-limited to one sample per 5 ms.
//!
//! ## Debounce
//!
//! Each sample shifts into a 16-bit register whose top six bits are held
//! at 1. The button counts as pressed only when the ten live bits are all
//! 0, i.e. after 50 ms of continuous contact.
//!
//! ## Gesture detection
//!
//! ```text
//!            pressed                 released
//!   Idle ───────────▶ Clicked ────────────────▶ Released
//!    ▲                   │ held > press_ms          │ pressed again ≤ dct
//!    │                   ▼                          ▼
//!    └──── released ── Cooldown ◀──── DoubleClick ──┘
//!    ▲                                              │ dct elapsed
//!    └───────────────────── Click ◀─────────────────┘
//! ```
//!
//! | Gesture      | Condition                                | Event          |
//! |--------------|------------------------------------------|----------------|
//! | Click        | Released, no second press within 250 ms  | `Click`        |
//! | Double click | Second press within 250 ms of the first  | `DoubleClick`  |
//! | Press        | Held longer than 400 ms                  | `Press`        |
//!
//! Every physical interaction yields exactly one event. Events queue up
//! (four deep, further events are dropped) until the consumer drains them.

use embedded_hal::digital::InputPin;
use heapless::Deque;

use crate::app::service::ButtonEvent;

/// Minimum interval between two samples.
pub const SAMPLE_INTERVAL_MS: u32 = 5;
pub const DEFAULT_DOUBLE_CLICK_MS: u32 = 250;
pub const DEFAULT_PRESS_MS: u32 = 400;
pub const QUEUE_DEPTH: usize = 4;

/// Bits held high in the debounce register; the remaining ten are samples.
const SAMPLE_MASK: u16 = 0xFC00;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GestureState {
    Idle,
    Clicked,
    Released,
    Cooldown,
}

pub struct ButtonDriver {
    state: GestureState,
    key_state: u16,
    /// Start of the current gesture.
    gesture_ms: u32,
    last_sample_ms: Option<u32>,
    double_click_ms: u32,
    press_ms: u32,
    events: Deque<ButtonEvent, QUEUE_DEPTH>,
}

impl Default for ButtonDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl ButtonDriver {
    pub fn new() -> Self {
        Self::with_timing(DEFAULT_DOUBLE_CLICK_MS, DEFAULT_PRESS_MS)
    }

    pub fn with_timing(double_click_ms: u32, press_ms: u32) -> Self {
        Self {
            state: GestureState::Idle,
            key_state: u16::MAX,
            gesture_ms: 0,
            last_sample_ms: None,
            double_click_ms,
            press_ms,
            events: Deque::new(),
        }
    }

    /// Sample an active-low pin. Read errors count as released.
    pub fn poll<I: InputPin>(&mut self, now_ms: u32, pin: &mut I) -> usize {
        let pressed = pin.is_low().unwrap_or(false);
        self.update(now_ms, pressed)
    }

    /// Feed one raw sample taken at `now_ms`.
    ///
    /// Samples arriving within 5 ms of the previous one are ignored.
    /// Returns the number of queued events.
    pub fn update(&mut self, now_ms: u32, raw_pressed: bool) -> usize {
        if let Some(last) = self.last_sample_ms {
            if now_ms.wrapping_sub(last) < SAMPLE_INTERVAL_MS {
                return self.events.len();
            }
        }
        self.last_sample_ms = Some(now_ms);

        self.key_state = (self.key_state << 1) | u16::from(!raw_pressed) | SAMPLE_MASK;
        let pressed = self.key_state == SAMPLE_MASK;
        let elapsed = now_ms.wrapping_sub(self.gesture_ms);

        match self.state {
            GestureState::Idle => {
                if pressed {
                    self.gesture_ms = now_ms;
                    self.state = GestureState::Clicked;
                }
            }
            GestureState::Clicked => {
                if !pressed {
                    self.state = GestureState::Released;
                } else if elapsed > self.press_ms {
                    self.push(ButtonEvent::Press);
                    self.state = GestureState::Cooldown;
                }
            }
            GestureState::Released => {
                if elapsed > self.double_click_ms {
                    self.push(ButtonEvent::Click);
                    self.state = GestureState::Idle;
                } else if pressed {
                    self.push(ButtonEvent::DoubleClick);
                    self.state = GestureState::Cooldown;
                }
            }
            GestureState::Cooldown => {
                if !pressed {
                    self.state = GestureState::Idle;
                }
            }
        }
        self.events.len()
    }

    /// Take the oldest queued event.
    pub fn next_event(&mut self) -> Option<ButtonEvent> {
        self.events.pop_front()
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    pub fn queued(&self) -> usize {
        self.events.len()
    }

    fn push(&mut self, ev: ButtonEvent) {
        if self.events.push_back(ev).is_err() {
            log::debug!("Button: queue full, {:?} dropped", ev);
        }
    }
}
