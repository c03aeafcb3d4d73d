//! WiFi station-mode adapter.
//!
//! Implements [`ConnectivityPort`], the boundary for network connectivity.
//! The adapter reports link transitions as [`NetworkEvent`]s which the main
//! loop forwards to the device for the event history.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: `esp-idf-svc` `BlockingWifi<EspWifi>`.
//! - **all other targets**: a simulated link that tests can drop.
//!
//! ## Reconnection policy
//!
//! Every fast tick calls [`poll`](ConnectivityPort::poll). A link found
//! down yields `Lost`, then a deliberate `Disconnected` and a fresh
//! connect attempt (`Connected` on success). A failed attempt is retried
//! on the next poll.

use core::fmt;
use log::{error, info, warn};

use crate::app::commands::NetworkEvent;

#[cfg(target_os = "espidf")]
use esp_idf_svc::wifi::{AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi};

/// Events a single poll can produce.
pub type NetworkEvents = heapless::Vec<NetworkEvent, 3>;

// ───────────────────────────────────────────────────────────────
// Port trait
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectivityError {
    NoCredentials,
    InvalidSsid,
    InvalidPassword,
    ConnectionFailed,
    AlreadyConnected,
}

impl fmt::Display for ConnectivityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoCredentials => write!(f, "no WiFi credentials configured"),
            Self::InvalidSsid => write!(f, "SSID invalid (must be 1-32 printable ASCII bytes)"),
            Self::InvalidPassword => write!(f, "password invalid (must be 8-63 bytes for WPA2, or empty for open)"),
            Self::ConnectionFailed => write!(f, "WiFi connection failed"),
            Self::AlreadyConnected => write!(f, "already connected to AP"),
        }
    }
}

pub trait ConnectivityPort {
    fn connect(&mut self) -> Result<(), ConnectivityError>;
    fn disconnect(&mut self);
    fn is_connected(&self) -> bool;
    /// Check the link and reconnect if needed. Returns what happened.
    fn poll(&mut self) -> NetworkEvents;
    fn set_credentials(&mut self, ssid: &str, password: &str) -> Result<(), ConnectivityError>;
}

// ───────────────────────────────────────────────────────────────
// Connection state
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiState {
    Disconnected,
    Connected,
    Reconnecting { attempt: u32 },
}

// ───────────────────────────────────────────────────────────────
// Validation
// ───────────────────────────────────────────────────────────────

fn is_printable_ascii(s: &str) -> bool {
    s.bytes().all(|b| (0x20..=0x7E).contains(&b))
}

fn validate_ssid(ssid: &str) -> Result<(), ConnectivityError> {
    if ssid.is_empty() || ssid.len() > 32 || !is_printable_ascii(ssid) {
        return Err(ConnectivityError::InvalidSsid);
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), ConnectivityError> {
    if password.is_empty() {
        return Ok(());
    }
    if password.len() < 8 || password.len() > 63 {
        return Err(ConnectivityError::InvalidPassword);
    }
    Ok(())
}

// ───────────────────────────────────────────────────────────────
// WiFi adapter
// ───────────────────────────────────────────────────────────────

pub struct WifiAdapter {
    state: WifiState,
    ssid: heapless::String<32>,
    password: heapless::String<64>,
    hostname: heapless::String<32>,
    #[cfg(target_os = "espidf")]
    wifi: Option<BlockingWifi<EspWifi<'static>>>,
    /// Simulation: physical link state.
    #[cfg(not(target_os = "espidf"))]
    sim_link: bool,
    /// Simulation: refuse the next N connect attempts.
    #[cfg(not(target_os = "espidf"))]
    sim_fail_connects: u32,
}

impl Default for WifiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl WifiAdapter {
    pub fn new() -> Self {
        Self {
            state: WifiState::Disconnected,
            ssid: heapless::String::new(),
            password: heapless::String::new(),
            hostname: heapless::String::new(),
            #[cfg(target_os = "espidf")]
            wifi: None,
            #[cfg(not(target_os = "espidf"))]
            sim_link: false,
            #[cfg(not(target_os = "espidf"))]
            sim_fail_connects: 0,
        }
    }

    /// Hand over the driver created from the modem peripheral.
    #[cfg(target_os = "espidf")]
    pub fn attach(&mut self, wifi: BlockingWifi<EspWifi<'static>>) {
        self.wifi = Some(wifi);
    }

    /// Device name announced via DHCP. Truncated to 32 bytes.
    pub fn set_hostname(&mut self, name: &str) {
        self.hostname.clear();
        for c in name.chars() {
            if self.hostname.push(c).is_err() {
                break;
            }
        }
    }

    pub fn state(&self) -> WifiState {
        self.state
    }

    /// Simulation: drop the link as if the AP went away.
    #[cfg(not(target_os = "espidf"))]
    pub fn sim_drop_link(&mut self) {
        self.sim_link = false;
    }

    /// Simulation: make the next `n` connect attempts fail.
    #[cfg(not(target_os = "espidf"))]
    pub fn sim_fail_next_connects(&mut self, n: u32) {
        self.sim_fail_connects = n;
    }

    // ── Platform-specific ─────────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_connect(&mut self) -> Result<(), ConnectivityError> {
        let Some(wifi) = self.wifi.as_mut() else {
            return Err(ConnectivityError::ConnectionFailed);
        };
        let auth_method = if self.password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };
        let client = ClientConfiguration {
            ssid: self.ssid.as_str().try_into().map_err(|_| ConnectivityError::InvalidSsid)?,
            password: self
                .password
                .as_str()
                .try_into()
                .map_err(|_| ConnectivityError::InvalidPassword)?,
            auth_method,
            ..Default::default()
        };
        wifi.set_configuration(&Configuration::Client(client))
            .map_err(|_| ConnectivityError::ConnectionFailed)?;
        if !self.hostname.is_empty() {
            if let Err(e) = wifi.wifi_mut().sta_netif_mut().set_hostname(&self.hostname) {
                warn!("WiFi: hostname not set: {}", e);
            }
        }
        if !wifi.is_started().unwrap_or(false) {
            wifi.start().map_err(|_| ConnectivityError::ConnectionFailed)?;
        }
        wifi.connect().map_err(|_| ConnectivityError::ConnectionFailed)?;
        wifi.wait_netif_up().map_err(|_| ConnectivityError::ConnectionFailed)?;
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_connect(&mut self) -> Result<(), ConnectivityError> {
        if self.sim_fail_connects > 0 {
            self.sim_fail_connects -= 1;
            warn!("WiFi(sim): simulated connect failure");
            return Err(ConnectivityError::ConnectionFailed);
        }
        self.sim_link = true;
        info!("WiFi(sim): connected to '{}'", self.ssid);
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_disconnect(&mut self) {
        if let Some(wifi) = self.wifi.as_mut() {
            let _ = wifi.disconnect();
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_disconnect(&mut self) {
        self.sim_link = false;
    }

    #[cfg(target_os = "espidf")]
    fn platform_link_up(&self) -> bool {
        self.wifi
            .as_ref()
            .is_some_and(|w| w.is_connected().unwrap_or(false))
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_link_up(&self) -> bool {
        self.sim_link
    }

    fn try_connect(&mut self, attempt: u32) -> Result<(), ConnectivityError> {
        match self.platform_connect() {
            Ok(()) => {
                self.state = WifiState::Connected;
                info!("WiFi: connected to '{}'", self.ssid);
                Ok(())
            }
            Err(e) => {
                error!("WiFi: connection failed: {}", e);
                self.state = WifiState::Reconnecting { attempt };
                Err(e)
            }
        }
    }
}

// ───────────────────────────────────────────────────────────────
// ConnectivityPort
// ───────────────────────────────────────────────────────────────

impl ConnectivityPort for WifiAdapter {
    fn connect(&mut self) -> Result<(), ConnectivityError> {
        if self.ssid.is_empty() {
            return Err(ConnectivityError::NoCredentials);
        }
        if self.state == WifiState::Connected {
            return Err(ConnectivityError::AlreadyConnected);
        }
        info!("WiFi: connecting to '{}'", self.ssid);
        self.try_connect(0)
    }

    fn disconnect(&mut self) {
        self.platform_disconnect();
        self.state = WifiState::Disconnected;
        info!("WiFi: disconnected");
    }

    fn is_connected(&self) -> bool {
        self.state == WifiState::Connected && self.platform_link_up()
    }

    fn poll(&mut self) -> NetworkEvents {
        let mut events = NetworkEvents::new();
        let attempt = match self.state {
            WifiState::Disconnected => return events,
            WifiState::Connected if self.platform_link_up() => return events,
            WifiState::Connected => {
                warn!("WiFi: connection lost, reconnecting");
                let _ = events.push(NetworkEvent::Lost);
                self.disconnect();
                let _ = events.push(NetworkEvent::Disconnected);
                0
            }
            WifiState::Reconnecting { attempt } => {
                info!("WiFi: reconnect attempt {}", attempt + 1);
                attempt + 1
            }
        };
        if self.try_connect(attempt).is_ok() {
            let _ = events.push(NetworkEvent::Connected);
        }
        events
    }

    fn set_credentials(&mut self, ssid: &str, password: &str) -> Result<(), ConnectivityError> {
        validate_ssid(ssid)?;
        validate_password(password)?;
        self.ssid.clear();
        self.ssid.push_str(ssid).map_err(|_| ConnectivityError::InvalidSsid)?;
        self.password.clear();
        self.password
            .push_str(password)
            .map_err(|_| ConnectivityError::InvalidPassword)?;
        info!("WiFi: credentials updated (SSID='{}')", self.ssid);
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
