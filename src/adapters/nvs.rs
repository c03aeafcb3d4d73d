//! NVS (Non-Volatile Storage) adapters.
//!
//! | Type         | Implements    | NVS key (namespace `smartplug`) |
//! |--------------|---------------|---------------------------------|
//! | `NvsEeprom`  | PersistPort   | `eeprom`: 512-byte image blob   |
//! | `NvsConfig`  | ConfigPort    | `syscfg`: postcard SystemConfig |
//!
//! `NvsEeprom` keeps a RAM shadow of the image. Reads and writes touch
//! only the shadow; `commit` stores the whole blob in one NVS write, which
//! ESP-IDF commits atomically. A missing blob reads as erased flash (0xFF).
//!
//! Off-target, both adapters keep their blobs in an in-memory map so the
//! rest of the system runs unchanged in tests.

use crate::app::ports::{ConfigError, ConfigPort, PersistPort, StorageError};
use crate::config::SystemConfig;
use crate::store::EEPROM_SIZE;
use log::info;

#[cfg(not(target_os = "espidf"))]
use std::collections::HashMap;

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;
#[cfg(target_os = "espidf")]
use log::warn;

#[cfg(target_os = "espidf")]
const NAMESPACE: &[u8] = b"smartplug\0";
#[cfg(target_os = "espidf")]
const EEPROM_KEY: &[u8] = b"eeprom\0";
#[cfg(target_os = "espidf")]
const CONFIG_KEY: &[u8] = b"syscfg\0";
#[cfg(target_os = "espidf")]
const MAX_BLOB_SIZE: usize = 1024;

#[cfg(not(target_os = "espidf"))]
const EEPROM_KEY: &str = "eeprom";
#[cfg(not(target_os = "espidf"))]
const CONFIG_KEY: &str = "syscfg";

/// Initialise the NVS flash partition, erasing it on layout mismatch.
///
/// Must run once before either adapter is created.
pub fn init_flash() -> Result<(), StorageError> {
    #[cfg(target_os = "espidf")]
    {
        // SAFETY: called from the single main-task context before any
        // concurrent NVS access.
        let ret = unsafe { nvs_flash_init() };
        if ret == ESP_ERR_NVS_NO_FREE_PAGES || ret == ESP_ERR_NVS_NEW_VERSION_FOUND {
            warn!("NVS: erasing and re-initialising flash partition");
            if unsafe { nvs_flash_erase() } != ESP_OK {
                return Err(StorageError::IoError);
            }
            if unsafe { nvs_flash_init() } != ESP_OK {
                return Err(StorageError::IoError);
            }
        } else if ret != ESP_OK {
            return Err(StorageError::IoError);
        }
        info!("NVS: flash initialised");
    }

    #[cfg(not(target_os = "espidf"))]
    info!("NVS: simulation backend");

    Ok(())
}

// ── Raw blob access (ESP-IDF) ─────────────────────────────────

/// Open the namespace, run `f` with the handle, then close.
#[cfg(target_os = "espidf")]
fn with_nvs_handle<F, T>(write: bool, f: F) -> Result<T, i32>
where
    F: FnOnce(nvs_handle_t) -> Result<T, i32>,
{
    let mut handle: nvs_handle_t = 0;
    let mode = if write {
        nvs_open_mode_t_NVS_READWRITE
    } else {
        nvs_open_mode_t_NVS_READONLY
    };
    // SAFETY: NAMESPACE is null-terminated; handle is closed below.
    let ret = unsafe { nvs_open(NAMESPACE.as_ptr().cast(), mode, &mut handle) };
    if ret != ESP_OK {
        return Err(ret);
    }
    let result = f(handle);
    unsafe { nvs_close(handle) };
    result
}

/// Read a whole blob. `Ok(None)` when the key does not exist.
#[cfg(target_os = "espidf")]
fn get_blob(key: &[u8]) -> Result<Option<Vec<u8>>, i32> {
    let result = with_nvs_handle(false, |handle| {
        let mut size: usize = 0;
        // First call: get size.
        let ret = unsafe { nvs_get_blob(handle, key.as_ptr().cast(), core::ptr::null_mut(), &mut size) };
        if ret != ESP_OK {
            return Err(ret);
        }
        if size == 0 || size > MAX_BLOB_SIZE {
            return Err(ESP_ERR_NVS_INVALID_LENGTH);
        }
        let mut buf = vec![0u8; size];
        let ret = unsafe { nvs_get_blob(handle, key.as_ptr().cast(), buf.as_mut_ptr().cast(), &mut size) };
        if ret != ESP_OK {
            return Err(ret);
        }
        Ok(buf)
    });
    match result {
        Ok(buf) => Ok(Some(buf)),
        Err(e) if e == ESP_ERR_NVS_NOT_FOUND => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(target_os = "espidf")]
fn set_blob(key: &[u8], data: &[u8]) -> Result<(), i32> {
    with_nvs_handle(true, |handle| {
        let ret = unsafe { nvs_set_blob(handle, key.as_ptr().cast(), data.as_ptr().cast(), data.len()) };
        if ret != ESP_OK {
            return Err(ret);
        }
        let ret = unsafe { nvs_commit(handle) };
        if ret != ESP_OK {
            return Err(ret);
        }
        Ok(())
    })
}

// ═══════════════════════════════════════════════════════════════
//  NvsEeprom
// ═══════════════════════════════════════════════════════════════

/// EEPROM-style image backed by one NVS blob.
pub struct NvsEeprom {
    shadow: [u8; EEPROM_SIZE],
    #[cfg(not(target_os = "espidf"))]
    flash: HashMap<&'static str, Vec<u8>>,
    #[cfg(not(target_os = "espidf"))]
    commits: usize,
    #[cfg(not(target_os = "espidf"))]
    fail_commits: bool,
}

impl NvsEeprom {
    /// Load the shadow from flash.
    #[cfg(target_os = "espidf")]
    pub fn open() -> Result<Self, StorageError> {
        let mut shadow = [0xFF; EEPROM_SIZE];
        match get_blob(EEPROM_KEY) {
            Ok(Some(bytes)) => {
                let n = bytes.len().min(EEPROM_SIZE);
                shadow[..n].copy_from_slice(&bytes[..n]);
                info!("NvsEeprom: image loaded ({} bytes)", bytes.len());
            }
            Ok(None) => info!("NvsEeprom: no image stored, starting erased"),
            Err(e) => {
                warn!("NvsEeprom: NVS read error {}", e);
                return Err(StorageError::IoError);
            }
        }
        Ok(Self { shadow })
    }

    /// Simulation: start from erased flash.
    #[cfg(not(target_os = "espidf"))]
    pub fn open() -> Result<Self, StorageError> {
        info!("NvsEeprom: simulation backend, starting erased");
        Ok(Self::erased())
    }

    /// Erased shadow without reading flash. Fallback when [`open`](Self::open)
    /// fails; commits still go to NVS and are retried on every write.
    pub fn erased() -> Self {
        Self {
            shadow: [0xFF; EEPROM_SIZE],
            #[cfg(not(target_os = "espidf"))]
            flash: HashMap::new(),
            #[cfg(not(target_os = "espidf"))]
            commits: 0,
            #[cfg(not(target_os = "espidf"))]
            fail_commits: false,
        }
    }

    /// Simulation: number of successful commits.
    #[cfg(not(target_os = "espidf"))]
    pub fn commit_count(&self) -> usize {
        self.commits
    }

    /// Simulation: make every following commit fail.
    #[cfg(not(target_os = "espidf"))]
    pub fn set_fail_commits(&mut self, fail: bool) {
        self.fail_commits = fail;
    }

    /// Simulation: power cycle. Uncommitted shadow changes are lost.
    #[cfg(not(target_os = "espidf"))]
    #[must_use]
    pub fn reboot(mut self) -> Self {
        self.shadow = [0xFF; EEPROM_SIZE];
        if let Some(bytes) = self.flash.get(EEPROM_KEY) {
            self.shadow.copy_from_slice(bytes);
        }
        self
    }
}

impl PersistPort for NvsEeprom {
    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        let src = self
            .shadow
            .get(offset..offset + buf.len())
            .ok_or(StorageError::OutOfRange)?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), StorageError> {
        let dst = self
            .shadow
            .get_mut(offset..offset + data.len())
            .ok_or(StorageError::OutOfRange)?;
        dst.copy_from_slice(data);
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn commit(&mut self) -> Result<(), StorageError> {
        set_blob(EEPROM_KEY, &self.shadow).map_err(|e| {
            warn!("NvsEeprom: NVS write error {}", e);
            StorageError::IoError
        })
    }

    #[cfg(not(target_os = "espidf"))]
    fn commit(&mut self) -> Result<(), StorageError> {
        if self.fail_commits {
            return Err(StorageError::IoError);
        }
        self.flash.insert(EEPROM_KEY, self.shadow.to_vec());
        self.commits += 1;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════
//  NvsConfig
// ═══════════════════════════════════════════════════════════════

/// Runtime tunables, stored as a postcard blob.
pub struct NvsConfig {
    #[cfg(not(target_os = "espidf"))]
    store: HashMap<&'static str, Vec<u8>>,
}

impl Default for NvsConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl NvsConfig {
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_os = "espidf"))]
            store: HashMap::new(),
        }
    }
}

impl ConfigPort for NvsConfig {
    fn load(&self) -> Result<SystemConfig, ConfigError> {
        #[cfg(not(target_os = "espidf"))]
        let stored = self.store.get(CONFIG_KEY).cloned();

        #[cfg(target_os = "espidf")]
        let stored = match get_blob(CONFIG_KEY) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("NvsConfig: NVS read error {}, using defaults", e);
                None
            }
        };

        let Some(bytes) = stored else {
            info!("NvsConfig: no stored config, using defaults");
            return Ok(SystemConfig::default());
        };
        let cfg: SystemConfig = postcard::from_bytes(&bytes).map_err(|_| ConfigError::Corrupted)?;
        cfg.validate()?;
        info!("NvsConfig: loaded config ({} bytes)", bytes.len());
        Ok(cfg)
    }

    fn save(&mut self, config: &SystemConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let bytes = postcard::to_allocvec(config).map_err(|_| ConfigError::IoError)?;

        #[cfg(not(target_os = "espidf"))]
        self.store.insert(CONFIG_KEY, bytes.clone());

        #[cfg(target_os = "espidf")]
        set_blob(CONFIG_KEY, &bytes).map_err(|e| {
            warn!("NvsConfig: NVS write error {}", e);
            ConfigError::IoError
        })?;

        info!("NvsConfig: config saved ({} bytes)", bytes.len());
        Ok(())
    }
}
