//! Link-layer value types shared by the connection manager, the radio
//! adapters and the event bus.

use core::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::app::ports::{ConfigError, LinkError, StorageError, TimerError};

/// Full 6-byte MAC address.
pub type MacAddress = [u8; 6];

pub const SSID_MAX_LEN: usize = 32;
pub const PASSWORD_MAX_LEN: usize = 64;
const PASSWORD_MIN_LEN: usize = 8;

// ───────────────────────────────────────────────────────────────
// Connection state
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    Idle = 0,
    Disconnected = 1,
    Connecting = 2,
    Connected = 3,
    Provisioning = 4,
    Failed = 5,
}

impl ConnectionState {
    pub const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Disconnected,
            2 => Self::Connecting,
            3 => Self::Connected,
            4 => Self::Provisioning,
            5 => Self::Failed,
            _ => Self::Idle,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Provisioning => "provisioning",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

// ───────────────────────────────────────────────────────────────
// Errors
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionError {
    AlreadyInitialized,
    NotInitialized,
    /// No stored credentials.
    NotFound,
    InvalidArgument,
    InvalidSsid,
    InvalidPassword,
    Link(LinkError),
    Storage(StorageError),
    Config(ConfigError),
    Timer(TimerError),
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyInitialized => write!(f, "connection manager already initialized"),
            Self::NotInitialized => write!(f, "connection manager not initialized"),
            Self::NotFound => write!(f, "no WiFi credentials stored"),
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::InvalidSsid => write!(f, "SSID invalid (must be 1-32 printable ASCII bytes)"),
            Self::InvalidPassword => {
                write!(f, "password invalid (must be 8-64 bytes for WPA2, or empty for open)")
            }
            Self::Link(e) => write!(f, "link: {e}"),
            Self::Storage(e) => write!(f, "storage: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Timer(e) => write!(f, "timer: {e}"),
        }
    }
}

impl From<LinkError> for ConnectionError {
    fn from(e: LinkError) -> Self {
        Self::Link(e)
    }
}

impl From<StorageError> for ConnectionError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<ConfigError> for ConnectionError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<TimerError> for ConnectionError {
    fn from(e: TimerError) -> Self {
        Self::Timer(e)
    }
}

// ───────────────────────────────────────────────────────────────
// Credentials
// ───────────────────────────────────────────────────────────────

/// Station credentials.  An empty password means an open network.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Credentials {
    pub ssid: heapless::String<SSID_MAX_LEN>,
    pub password: heapless::String<PASSWORD_MAX_LEN>,
}

impl Credentials {
    pub fn new(ssid: &str, password: &str) -> Result<Self, ConnectionError> {
        validate_ssid(ssid)?;
        validate_password(password)?;
        let mut creds = Self::default();
        creds.ssid.push_str(ssid).map_err(|_| ConnectionError::InvalidSsid)?;
        creds
            .password
            .push_str(password)
            .map_err(|_| ConnectionError::InvalidPassword)?;
        Ok(creds)
    }

    pub fn is_open(&self) -> bool {
        self.password.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("ssid", &self.ssid)
            .field("password", &if self.password.is_empty() { "" } else { "***" })
            .finish()
    }
}

pub(crate) fn validate_ssid(ssid: &str) -> Result<(), ConnectionError> {
    if ssid.is_empty() || ssid.len() > SSID_MAX_LEN {
        return Err(ConnectionError::InvalidSsid);
    }
    if !ssid.bytes().all(|b| (0x20..=0x7E).contains(&b)) {
        return Err(ConnectionError::InvalidSsid);
    }
    Ok(())
}

pub(crate) fn validate_password(password: &str) -> Result<(), ConnectionError> {
    if password.is_empty() {
        return Ok(());
    }
    if password.len() < PASSWORD_MIN_LEN || password.len() > PASSWORD_MAX_LEN {
        return Err(ConnectionError::InvalidPassword);
    }
    Ok(())
}

// ───────────────────────────────────────────────────────────────
// Connection info
// ───────────────────────────────────────────────────────────────

/// Address and radio details of the current association.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub ip: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub rssi: i8,
    pub channel: u8,
}

impl Default for ConnectionInfo {
    fn default() -> Self {
        Self {
            ip: Ipv4Addr::UNSPECIFIED,
            gateway: Ipv4Addr::UNSPECIFIED,
            netmask: Ipv4Addr::UNSPECIFIED,
            rssi: 0,
            channel: 0,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Provisioning
// ───────────────────────────────────────────────────────────────

/// Caller-supplied provisioning request.
#[derive(Clone, PartialEq, Eq)]
pub struct ProvisioningConfig {
    /// Prefix of the advertised name; the MAC tail is appended.
    pub device_name_prefix: heapless::String<16>,
    /// Proof-of-possession secret.  Must be non-empty.
    pub pop: heapless::String<64>,
    /// Custom 128-bit service UUID, if any.
    pub service_uuid: Option<[u8; 16]>,
    /// Session timeout in seconds; 0 disables the timeout.
    pub timeout_secs: u32,
}

impl ProvisioningConfig {
    pub fn with_pop(pop: &str) -> Result<Self, ConnectionError> {
        let mut cfg = Self::default();
        cfg.pop.push_str(pop).map_err(|_| ConnectionError::InvalidArgument)?;
        Ok(cfg)
    }
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        let mut prefix = heapless::String::new();
        let _ = prefix.push_str("PROV");
        Self {
            device_name_prefix: prefix,
            pop: heapless::String::new(),
            service_uuid: None,
            timeout_secs: 300,
        }
    }
}

impl fmt::Debug for ProvisioningConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisioningConfig")
            .field("device_name_prefix", &self.device_name_prefix)
            .field("timeout_secs", &self.timeout_secs)
            .finish_non_exhaustive()
    }
}

/// What the radio driver needs to open a pairing session.
#[derive(Clone, PartialEq, Eq)]
pub struct PairingParams {
    pub device_name: heapless::String<32>,
    pub pop: heapless::String<64>,
    pub service_uuid: Option<[u8; 16]>,
}

impl fmt::Debug for PairingParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairingParams")
            .field("device_name", &self.device_name)
            .finish_non_exhaustive()
    }
}

// ───────────────────────────────────────────────────────────────
// Driver events
// ───────────────────────────────────────────────────────────────

/// Raw events reported by the radio driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Started,
    Disconnected { reason: u16 },
    GotIp(ConnectionInfo),
    CredentialsReceived(Credentials),
    CredentialsFailed,
    ProvisioningEnded,
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
