//! Radio module adapter boundary.
//!
//! The LoRaWAN MAC runs inside the radio module; this crate talks to it
//! through [`RadioModule`]. Module calls are slow (hundreds of milliseconds)
//! and may fail transiently, so every call returns a `Result`.
//!
//! Asynchronous module output (downlinks, send-complete reports) is drained
//! through [`RadioModule::process`] as a list of [`ModuleEvent`]s rather than
//! through registered callbacks.

use crate::config::{AppEui, DeviceClass, Region, SecretKey};
use std::fmt;
use std::time::Duration;

/// Application port used for uplinks and accepted for downlinks.
pub const APP_PORT: u8 = 2;

/// API options value written during configuration (explicit receive indicators).
pub const API_OPTIONS: u8 = 0x01;

/// Factory used to create (or re-create) the module handle during bring-up.
pub type ModuleFactory<M> = Box<dyn FnMut() -> Result<M, ModuleError>>;

/// 64-bit device EUI reported by the module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceEui(pub [u8; 8]);

impl fmt::Display for DeviceEui {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{:02X}", b)?;
        }
        Ok(())
    }
}

/// Outbound frame handed to the module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UplinkPacket {
    /// LoRaWAN FPort.
    pub port: u8,
    /// Request a confirmed uplink.
    pub ack: bool,
    /// Application payload.
    pub payload: Vec<u8>,
}

/// Inbound frame reported by the module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownlinkPacket {
    /// LoRaWAN FPort.
    pub port: u8,
    /// Application payload.
    pub payload: Vec<u8>,
    /// Frame carried an acknowledgment.
    pub ack: bool,
    /// Received signal strength in dBm.
    pub rssi: i16,
    /// Signal to noise ratio in dB.
    pub snr: i8,
    /// Downlink frame counter.
    pub counter: u32,
}

impl DownlinkPacket {
    /// Downlink on `port` with default link metrics.
    pub fn new(port: u8, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            port,
            payload: payload.into(),
            ack: false,
            rssi: 0,
            snr: 0,
            counter: 0,
        }
    }
}

/// Transport-level result of a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// Frame left the radio.
    Delivered,
    /// Confirmed uplink was not acknowledged.
    AckFailed,
    /// Module was not joined.
    NotConnected,
    /// Any other module status code.
    Other(u8),
}

impl SendStatus {
    /// Map a module status code.
    pub fn from_code(code: u8) -> Self {
        match code {
            0x00 => Self::Delivered,
            0x01 => Self::AckFailed,
            0x22 => Self::NotConnected,
            other => Self::Other(other),
        }
    }

    /// Module status code.
    pub fn code(self) -> u8 {
        match self {
            Self::Delivered => 0x00,
            Self::AckFailed => 0x01,
            Self::NotConnected => 0x22,
            Self::Other(code) => code,
        }
    }

    /// Whether the send succeeded at the transport level.
    pub fn is_ok(self) -> bool {
        self == Self::Delivered
    }
}

impl fmt::Display for SendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delivered => write!(f, "delivered"),
            Self::AckFailed => write!(f, "ACK failed"),
            Self::NotConnected => write!(f, "not connected"),
            Self::Other(code) => write!(f, "code {:#04X}", code),
        }
    }
}

/// Output drained from the module by [`RadioModule::process`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleEvent {
    /// A downlink arrived.
    Received(DownlinkPacket),
    /// A previously queued uplink finished.
    SendComplete {
        /// Frame id returned by [`RadioModule::send`].
        frame_id: u8,
        /// Transport status.
        status: SendStatus,
    },
}

/// Errors reported by the radio module adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleError {
    /// The module handle could not be created.
    CreateFailed(String),
    /// The module did not answer in time.
    Timeout,
    /// The module is busy with another operation.
    Busy,
    /// The module rejected a command or setting.
    Rejected(&'static str),
    /// The network join did not complete.
    JoinFailed,
    /// Transport (serial) failure.
    Io(String),
}

impl fmt::Display for ModuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateFailed(msg) => write!(f, "failed to create module: {}", msg),
            Self::Timeout => write!(f, "module timed out"),
            Self::Busy => write!(f, "module busy"),
            Self::Rejected(what) => write!(f, "module rejected {}", what),
            Self::JoinFailed => write!(f, "network join failed"),
            Self::Io(msg) => write!(f, "module I/O error: {}", msg),
        }
    }
}

impl std::error::Error for ModuleError {}

/// LoRaWAN radio module driver.
///
/// Implementations wrap a physical module (an XBee LR over serial, for
/// instance). Settings written with the `set_*` calls only persist in the
/// module after [`write_config`](RadioModule::write_config) and take effect
/// after [`apply_changes`](RadioModule::apply_changes).
pub trait RadioModule {
    /// Initialize communication with the module.
    fn begin(&mut self) -> Result<(), ModuleError>;

    /// Soft-reset an existing module.
    fn reset(&mut self) -> Result<(), ModuleError>;

    /// Read the device EUI (fails while the module is still starting).
    fn read_device_eui(&mut self) -> Result<DeviceEui, ModuleError>;

    /// Write the application EUI.
    fn set_app_eui(&mut self, eui: &AppEui) -> Result<(), ModuleError>;

    /// Write the application key.
    fn set_app_key(&mut self, key: &SecretKey) -> Result<(), ModuleError>;

    /// Write the network key.
    fn set_network_key(&mut self, key: &SecretKey) -> Result<(), ModuleError>;

    /// Set the operating class (effective immediately).
    fn set_class(&mut self, class: DeviceClass) -> Result<(), ModuleError>;

    /// Set the operating region.
    fn set_region(&mut self, region: Region) -> Result<(), ModuleError>;

    /// Set module API options.
    fn set_api_options(&mut self, options: u8) -> Result<(), ModuleError>;

    /// Persist written settings in module flash.
    fn write_config(&mut self) -> Result<(), ModuleError>;

    /// Apply written settings.
    fn apply_changes(&mut self) -> Result<(), ModuleError>;

    /// Join the network.
    fn connect(&mut self) -> Result<(), ModuleError>;

    /// Leave the network.
    fn disconnect(&mut self) -> Result<(), ModuleError>;

    /// Live connection flag. Slow; keep off the send path.
    fn is_connected(&mut self) -> bool;

    /// Queue an uplink, returning its frame id.
    fn send(&mut self, packet: &UplinkPacket) -> Result<u8, ModuleError>;

    /// Drive protocol processing and drain pending module output.
    fn process(&mut self) -> Vec<ModuleEvent>;

    /// Blocking pause between retries.
    fn pause(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
