//! One-shot GPIO initialisation and raw pin access.
//!
//! Configures the relay, LEDs, button and BL0937 pins of the selected
//! [`PinMap`] using raw ESP-IDF sys calls, and installs the pulse ISRs.
//! Called once from `main()` before the loop starts.
//!
//! [`GpioOutput`] and [`GpioInput`] expose configured pins through the
//! `embedded-hal` digital traits so drivers stay hardware-agnostic.

use core::convert::Infallible;

use embedded_hal::digital::{ErrorType, InputPin, OutputPin};

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;
#[cfg(target_os = "espidf")]
use log::info;

use crate::pins::PinMap;

// ── Error type ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwInitError {
    GpioConfigFailed(i32),
    IsrInstallFailed(i32),
}

impl core::fmt::Display for HwInitError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::GpioConfigFailed(rc) => write!(f, "GPIO config failed (rc={})", rc),
            Self::IsrInstallFailed(rc) => write!(f, "GPIO ISR service install failed (rc={})", rc),
        }
    }
}

// ── Pin configuration ─────────────────────────────────────────

#[cfg(target_os = "espidf")]
pub fn init_peripherals(map: &PinMap) -> Result<(), HwInitError> {
    // SAFETY: called once from main() before any other task touches GPIO.
    unsafe {
        let mut outputs = heapless::Vec::<i32, 4>::new();
        let _ = outputs.push(map.relay);
        let _ = outputs.push(map.signal_led);
        if let Some(led) = map.power_led {
            if led != map.signal_led {
                let _ = outputs.push(led);
            }
        }
        if let Some(meter) = map.meter {
            let _ = outputs.push(meter.sel);
        }
        for &pin in &outputs {
            configure(pin, gpio_mode_t_GPIO_MODE_OUTPUT, false)?;
        }
        // Relay open, LEDs dark (active-low).
        gpio_set_level(map.relay, 0);
        gpio_set_level(map.signal_led, 1);
        if let Some(led) = map.power_led {
            gpio_set_level(led, 1);
        }

        configure(map.button, gpio_mode_t_GPIO_MODE_INPUT, true)?;
        if let Some(meter) = map.meter {
            configure(meter.cf, gpio_mode_t_GPIO_MODE_INPUT, false)?;
            configure(meter.cf1, gpio_mode_t_GPIO_MODE_INPUT, false)?;
        }
    }
    info!("hw_init: GPIO configured (relay={}, button={})", map.relay, map.button);
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
pub fn init_peripherals(map: &PinMap) -> Result<(), HwInitError> {
    log::info!("hw_init(sim): GPIO init skipped (relay={}, button={})", map.relay, map.button);
    Ok(())
}

#[cfg(target_os = "espidf")]
unsafe fn configure(pin: i32, mode: gpio_mode_t, pull_up: bool) -> Result<(), HwInitError> {
    let cfg = gpio_config_t {
        pin_bit_mask: 1u64 << pin,
        mode,
        pull_up_en: if pull_up {
            gpio_pullup_t_GPIO_PULLUP_ENABLE
        } else {
            gpio_pullup_t_GPIO_PULLUP_DISABLE
        },
        pull_down_en: gpio_pulldown_t_GPIO_PULLDOWN_DISABLE,
        intr_type: gpio_int_type_t_GPIO_INTR_DISABLE,
    };
    let ret = unsafe { gpio_config(&cfg) };
    if ret != ESP_OK as i32 {
        return Err(HwInitError::GpioConfigFailed(ret));
    }
    Ok(())
}

// ── Raw access ────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
pub fn gpio_read(pin: i32) -> bool {
    // SAFETY: read-only register access on a configured input.
    (unsafe { gpio_get_level(pin) }) != 0
}

/// Off-target inputs idle high (released, with pull-up).
#[cfg(not(target_os = "espidf"))]
pub fn gpio_read(_pin: i32) -> bool {
    true
}

#[cfg(target_os = "espidf")]
pub fn gpio_write(pin: i32, high: bool) {
    // SAFETY: pin was configured as output in init_peripherals().
    unsafe {
        gpio_set_level(pin, u32::from(high));
    }
}

#[cfg(not(target_os = "espidf"))]
pub fn gpio_write(_pin: i32, _high: bool) {}

// ── embedded-hal pins ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpioOutput(pub i32);

impl ErrorType for GpioOutput {
    type Error = Infallible;
}

impl OutputPin for GpioOutput {
    fn set_low(&mut self) -> Result<(), Infallible> {
        gpio_write(self.0, false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        gpio_write(self.0, true);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpioInput(pub i32);

impl ErrorType for GpioInput {
    type Error = Infallible;
}

impl InputPin for GpioInput {
    fn is_high(&mut self) -> Result<bool, Infallible> {
        Ok(gpio_read(self.0))
    }

    fn is_low(&mut self) -> Result<bool, Infallible> {
        Ok(!gpio_read(self.0))
    }
}

// ── GPIO ISR service ──────────────────────────────────────────

#[cfg(target_os = "espidf")]
unsafe extern "C" fn cf_gpio_isr(_arg: *mut core::ffi::c_void) {
    crate::sensors::bl0937::cf_isr_handler();
}

#[cfg(target_os = "espidf")]
unsafe extern "C" fn cf1_gpio_isr(_arg: *mut core::ffi::c_void) {
    crate::sensors::bl0937::cf1_isr_handler();
}

/// Install the GPIO ISR service and the BL0937 pulse counters.
/// No-op on models without a power meter.
#[cfg(target_os = "espidf")]
pub fn init_isr_service(map: &PinMap) -> Result<(), HwInitError> {
    let Some(meter) = map.meter else {
        return Ok(());
    };
    // SAFETY: ESP_ERR_INVALID_STATE means the service is already installed.
    // The handlers only bump atomics.
    unsafe {
        let ret = gpio_install_isr_service(0);
        if ret != ESP_OK && ret != ESP_ERR_INVALID_STATE {
            return Err(HwInitError::IsrInstallFailed(ret));
        }

        gpio_set_intr_type(meter.cf, gpio_int_type_t_GPIO_INTR_POSEDGE);
        gpio_isr_handler_add(meter.cf, Some(cf_gpio_isr), core::ptr::null_mut());
        gpio_intr_enable(meter.cf);

        gpio_set_intr_type(meter.cf1, gpio_int_type_t_GPIO_INTR_POSEDGE);
        gpio_isr_handler_add(meter.cf1, Some(cf1_gpio_isr), core::ptr::null_mut());
        gpio_intr_enable(meter.cf1);
    }
    info!("hw_init: pulse ISRs installed (CF={}, CF1={})", meter.cf, meter.cf1);
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
pub fn init_isr_service(_map: &PinMap) -> Result<(), HwInitError> {
    log::info!("hw_init(sim): ISR service skipped");
    Ok(())
}
