//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter    | Implements         | Connects to                 |
//! |------------|--------------------|-----------------------------|
//! | `hardware` | SwitchPort         | Relay + power LED GPIO      |
//! | `log_sink` | EventSink          | Serial log output           |
//! | `nvs`      | PersistPort        | NVS blob (EEPROM image)     |
//! |            | ConfigPort         | NVS blob (SystemConfig)     |
//! | `time`     | ClockPort          | ESP32 system timer + SNTP   |
//! | `wifi`     | ConnectivityPort   | ESP-IDF WiFi STA            |

pub mod hardware;
pub mod log_sink;
pub mod nvs;
pub mod time;
pub mod wifi;
