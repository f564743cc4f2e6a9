//! LoRaWAN link configuration data structures.
//!
//! Platform-independent types for the credentials and operating parameters
//! that get written into the radio module during bring-up.
//!
//! # Example
//!
//! ```
//! use iot_node_lorawan::config::{DeviceClass, LinkConfig, Region, SecretKey};
//!
//! let mut config = LinkConfig::default();
//! config.app_key = Some(SecretKey::new("CD32AAB41C54175E9060D86F3A8B7F48").unwrap());
//! config.network_key = Some(SecretKey::new("CD32AAB41C54175E9060D86F3A8B7F48").unwrap());
//! assert!(config.has_credentials());
//!
//! let class: DeviceClass = "a".parse().unwrap();
//! assert_eq!(class, DeviceClass::A);
//! assert_eq!(Region::Us915.code(), 8);
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Development application EUI used when none is configured.
pub const DEVELOPMENT_APP_EUI: &str = "37D56A3F6CDCF0A5";

/// Length of an application EUI in hex digits (8 bytes).
pub const APP_EUI_HEX_LEN: usize = 16;

/// Length of an AES-128 key in hex digits (16 bytes).
pub const KEY_HEX_LEN: usize = 32;

fn is_hex(s: &str) -> bool {
    s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Application EUI (join EUI), stored as 16 upper-case hex digits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppEui(String);

impl AppEui {
    /// Parse and validate an application EUI.
    pub fn new(value: impl AsRef<str>) -> Result<Self, ConfigError> {
        let value = value.as_ref().trim();
        if value.len() != APP_EUI_HEX_LEN {
            return Err(ConfigError::EuiLength {
                len: value.len(),
                expected: APP_EUI_HEX_LEN,
            });
        }
        if !is_hex(value) {
            return Err(ConfigError::NotHex("application EUI"));
        }
        Ok(Self(value.to_ascii_uppercase()))
    }

    /// The EUI as hex digits.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for AppEui {
    fn default() -> Self {
        Self(DEVELOPMENT_APP_EUI.to_string())
    }
}

impl fmt::Display for AppEui {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for AppEui {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for AppEui {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        AppEui::new(s).map_err(serde::de::Error::custom)
    }
}

/// AES-128 key in hex (application or network key).
///
/// The contents are wiped on drop and never printed through `Debug` or
/// `Display`; use [`SecretKey::expose`] when the module needs the value.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey(String);

impl SecretKey {
    /// Parse and validate a key.
    pub fn new(value: impl AsRef<str>) -> Result<Self, ConfigError> {
        let value = value.as_ref().trim();
        if value.len() != KEY_HEX_LEN {
            return Err(ConfigError::KeyLength {
                len: value.len(),
                expected: KEY_HEX_LEN,
            });
        }
        if !is_hex(value) {
            return Err(ConfigError::NotHex("key"));
        }
        Ok(Self(value.to_ascii_uppercase()))
    }

    /// Access the raw key digits.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Redacted form that keeps the last four digits for identification.
    pub fn redacted(&self) -> String {
        let tail = &self.0[self.0.len().saturating_sub(4)..];
        format!("****{}", tail)
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey({})", self.redacted())
    }
}

impl fmt::Display for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

impl Serialize for SecretKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for SecretKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut s = String::deserialize(deserializer)?;
        let key = SecretKey::new(&s).map_err(serde::de::Error::custom);
        s.zeroize();
        key
    }
}

/// LoRaWAN operating class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceClass {
    /// Uplink followed by two short receive windows.
    A,
    /// Scheduled receive slots.
    B,
    /// Continuously listening.
    C,
}

impl DeviceClass {
    /// Class letter as written to the module.
    pub fn as_char(self) -> char {
        match self {
            Self::A => 'A',
            Self::B => 'B',
            Self::C => 'C',
        }
    }
}

impl Default for DeviceClass {
    fn default() -> Self {
        Self::C
    }
}

impl FromStr for DeviceClass {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(Self::A),
            "B" => Ok(Self::B),
            "C" => Ok(Self::C),
            _ => Err(ConfigError::UnknownClass(s.to_string())),
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Frequency plan the module operates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Region {
    /// US 902-928 MHz
    Us915,
    /// EU 863-870 MHz
    Eu868,
}

impl Region {
    /// Region code understood by the radio module.
    pub fn code(self) -> u8 {
        match self {
            Self::Us915 => 8,
            Self::Eu868 => 5,
        }
    }

    /// Look up a region from its module code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            8 => Some(Self::Us915),
            5 => Some(Self::Eu868),
            _ => None,
        }
    }

    /// Display name of the region.
    pub fn name(self) -> &'static str {
        match self {
            Self::Us915 => "US915",
            Self::Eu868 => "EU868",
        }
    }
}

impl Default for Region {
    fn default() -> Self {
        if cfg!(feature = "region-eu868") {
            Self::Eu868
        } else {
            Self::Us915
        }
    }
}

impl FromStr for Region {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "US915" => Ok(Self::Us915),
            "EU868" => Ok(Self::Eu868),
            _ => Err(ConfigError::UnknownRegion(s.to_string())),
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How the connection manager behaves when it is initialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartupMode {
    /// Connect as part of initialization.
    #[default]
    Immediate,
    /// Skip the connect during initialization; the owner connects later
    /// (the module may still be powering up).
    Delayed,
}

/// Persisted link configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// User intent to be connected.
    pub enabled: bool,
    /// Application (join) EUI.
    pub app_eui: AppEui,
    /// Application key, unset until provisioned.
    pub app_key: Option<SecretKey>,
    /// Network key, unset until provisioned.
    pub network_key: Option<SecretKey>,
    /// Operating class.
    pub class: DeviceClass,
    /// Operating region.
    pub region: Region,
    /// Set once the credentials have been written into the module.
    pub module_configured: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            app_eui: AppEui::default(),
            app_key: None,
            network_key: None,
            class: DeviceClass::default(),
            region: Region::default(),
            module_configured: false,
        }
    }
}

impl LinkConfig {
    /// Both join keys are present.
    pub fn has_credentials(&self) -> bool {
        self.app_key.is_some() && self.network_key.is_some()
    }
}

/// Upper bound for [`LinkTiming::max_backoff`].
pub const MAX_BACKOFF_CEILING: Duration = Duration::from_secs(24 * 3600);

/// Timing and retry parameters of the connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTiming {
    /// Period of the connection health poll.
    pub health_poll: Duration,
    /// Period of the receive pump.
    pub receive_pump: Duration,
    /// First reconnect period after a fresh disconnect.
    pub initial_backoff: Duration,
    /// Ceiling for the reconnect period.
    pub max_backoff: Duration,
    /// Radio-level join attempts per `connect()`.
    pub connect_attempts: u8,
    /// Pause between join attempts.
    pub connect_retry_delay: Duration,
    /// Device EUI read attempts during bring-up.
    pub eui_read_attempts: u8,
    /// Pause between EUI read attempts.
    pub eui_retry_delay: Duration,
}

impl Default for LinkTiming {
    fn default() -> Self {
        Self {
            health_poll: Duration::from_secs(15),
            receive_pump: Duration::from_secs(5),
            initial_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(3600),
            connect_attempts: 3,
            connect_retry_delay: Duration::from_millis(200),
            eui_read_attempts: 3,
            eui_retry_delay: Duration::from_millis(100),
        }
    }
}

impl LinkTiming {
    /// Validate timing values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.health_poll.is_zero() {
            return Err(ConfigError::InvalidTiming("health_poll must be > 0"));
        }
        if self.receive_pump.is_zero() {
            return Err(ConfigError::InvalidTiming("receive_pump must be > 0"));
        }
        if self.initial_backoff.is_zero() {
            return Err(ConfigError::InvalidTiming("initial_backoff must be > 0"));
        }
        if self.max_backoff < self.initial_backoff {
            return Err(ConfigError::InvalidTiming(
                "max_backoff must be >= initial_backoff",
            ));
        }
        if self.max_backoff > MAX_BACKOFF_CEILING {
            return Err(ConfigError::InvalidTiming("max_backoff must be <= 24h"));
        }
        if self.connect_attempts == 0 {
            return Err(ConfigError::InvalidTiming("connect_attempts must be > 0"));
        }
        if self.eui_read_attempts == 0 {
            return Err(ConfigError::InvalidTiming("eui_read_attempts must be > 0"));
        }
        Ok(())
    }
}

/// Errors that can occur while building or validating configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// EUI has the wrong number of hex digits.
    EuiLength { len: usize, expected: usize },
    /// Key has the wrong number of hex digits.
    KeyLength { len: usize, expected: usize },
    /// Value contains non-hex characters.
    NotHex(&'static str),
    /// Unknown class letter.
    UnknownClass(String),
    /// Unknown region name.
    UnknownRegion(String),
    /// Invalid timing parameter.
    InvalidTiming(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EuiLength { len, expected } => {
                write!(f, "EUI must be {} hex digits, got {}", expected, len)
            }
            Self::KeyLength { len, expected } => {
                write!(f, "key must be {} hex digits, got {}", expected, len)
            }
            Self::NotHex(what) => write!(f, "{} contains non-hex characters", what),
            Self::UnknownClass(s) => write!(f, "unknown LoRaWAN class: {}", s),
            Self::UnknownRegion(s) => write!(f, "unknown LoRaWAN region: {}", s),
            Self::InvalidTiming(msg) => write!(f, "invalid link timing: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
