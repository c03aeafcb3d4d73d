//! System clock adapter.
//!
//! Implements [`ClockPort`]:
//!
//! - **`target_os = "espidf"`**: monotonic time from `esp_timer_get_time()`,
//!   wall clock from the SNTP-synchronised system time via `localtime_r`.
//! - **`not(target_os = "espidf")`**: `std::time::Instant` plus a wall
//!   clock the host sets explicitly. Clones share the wall clock.

use crate::app::ports::{ClockPort, WallTime};

#[cfg(not(target_os = "espidf"))]
use std::sync::{Arc, Mutex};

/// Times before 2020-01-01 mean SNTP has not synchronised yet.
#[cfg(target_os = "espidf")]
const EPOCH_2020: i64 = 1_577_836_800;

#[derive(Clone)]
pub struct SystemClock {
    #[cfg(not(target_os = "espidf"))]
    start: std::time::Instant,
    #[cfg(not(target_os = "espidf"))]
    wall: Arc<Mutex<Option<WallTime>>>,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_os = "espidf"))]
            start: std::time::Instant::now(),
            #[cfg(not(target_os = "espidf"))]
            wall: Arc::new(Mutex::new(None)),
        }
    }

    /// Simulation: set (or clear) the wall clock.
    #[cfg(not(target_os = "espidf"))]
    pub fn set_wall_time(&self, now: Option<WallTime>) {
        if let Ok(mut wall) = self.wall.lock() {
            *wall = now;
        }
    }
}

impl ClockPort for SystemClock {
    #[cfg(target_os = "espidf")]
    fn uptime_ms(&self) -> u64 {
        (unsafe { esp_idf_svc::sys::esp_timer_get_time() }) as u64 / 1_000
    }

    #[cfg(not(target_os = "espidf"))]
    fn uptime_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    #[cfg(target_os = "espidf")]
    fn now(&self) -> Option<WallTime> {
        let mut tv = esp_idf_svc::sys::timeval {
            tv_sec: 0,
            tv_usec: 0,
        };
        if unsafe { esp_idf_svc::sys::gettimeofday(&mut tv, core::ptr::null_mut()) } != 0 {
            return None;
        }
        if i64::from(tv.tv_sec) < EPOCH_2020 {
            return None;
        }
        let secs = tv.tv_sec as esp_idf_svc::sys::time_t;
        // SAFETY: tm is plain old data; localtime_r fills it completely.
        let mut tm: esp_idf_svc::sys::tm = unsafe { core::mem::zeroed() };
        if unsafe { esp_idf_svc::sys::localtime_r(&secs, &mut tm) }.is_null() {
            return None;
        }
        Some(WallTime {
            weekday: tm.tm_wday as u8,
            hour: tm.tm_hour as u8,
            minute: tm.tm_min as u8,
            second: tm.tm_sec as u8,
            mday: tm.tm_mday as u8,
            month: (tm.tm_mon + 1) as u8,
        })
    }

    #[cfg(not(target_os = "espidf"))]
    fn now(&self) -> Option<WallTime> {
        self.wall.lock().map(|w| *w).unwrap_or(None)
    }
}

#[cfg(all(test, not(target_os = "espidf")))]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_wall_clock() {
        let clock = SystemClock::new();
        let other = clock.clone();
        assert_eq!(other.now(), None);
        let t = WallTime {
            weekday: 1,
            hour: 7,
            minute: 30,
            second: 0,
            mday: 4,
            month: 5,
        };
        clock.set_wall_time(Some(t));
        assert_eq!(other.now(), Some(t));
    }

    #[test]
    fn uptime_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.uptime_ms();
        assert!(clock.uptime_ms() >= a);
    }
}
