//! Downlink control messages.
//!
//! Downlinks on the application port carry an opcode byte followed by up to
//! three parameter bytes. They are relayed to the application as a single
//! `u32` with the opcode in the most significant byte, zero padded:
//!
//! ```
//! use iot_node_lorawan::lorawan::DownlinkMessage;
//!
//! let msg = DownlinkMessage::from_payload(&[0x01, 0xFF, 0x00, 0x80]).unwrap();
//! assert_eq!(msg.value(), 0x01FF_0080);
//! assert_eq!(msg.opcode(), 0x01);
//! assert_eq!(msg.params(), [0xFF, 0x00, 0x80]);
//! ```
//!
//! Opcode meaning is defined by the application.

use super::module::{DownlinkPacket, APP_PORT};
use std::fmt;

/// Largest downlink payload relayed to the application.
pub const MAX_DOWNLINK_LEN: usize = 4;

/// Opcode plus up to three parameter bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DownlinkMessage(u32);

impl DownlinkMessage {
    /// Wrap a raw relayed value.
    pub fn from_value(value: u32) -> Self {
        Self(value)
    }

    /// Decode a payload of 1..=4 bytes.
    pub fn from_payload(payload: &[u8]) -> Result<Self, DownlinkError> {
        if payload.is_empty() {
            return Err(DownlinkError::Empty);
        }
        if payload.len() > MAX_DOWNLINK_LEN {
            return Err(DownlinkError::TooLong { len: payload.len() });
        }
        let mut bytes = [0u8; MAX_DOWNLINK_LEN];
        bytes[..payload.len()].copy_from_slice(payload);
        Ok(Self(u32::from_be_bytes(bytes)))
    }

    /// Decode a module packet, accepting only the application port.
    pub fn from_packet(packet: &DownlinkPacket) -> Result<Self, DownlinkError> {
        if packet.port != APP_PORT {
            return Err(DownlinkError::WrongPort(packet.port));
        }
        Self::from_payload(&packet.payload)
    }

    /// Relayed value.
    pub fn value(self) -> u32 {
        self.0
    }

    /// Opcode byte.
    pub fn opcode(self) -> u8 {
        self.0.to_be_bytes()[0]
    }

    /// Parameter bytes (zero where absent).
    pub fn params(self) -> [u8; 3] {
        let b = self.0.to_be_bytes();
        [b[1], b[2], b[3]]
    }
}

/// Reasons a downlink is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownlinkError {
    /// No payload.
    Empty,
    /// Payload longer than [`MAX_DOWNLINK_LEN`].
    TooLong { len: usize },
    /// Downlink arrived on a port other than [`APP_PORT`].
    WrongPort(u8),
}

impl fmt::Display for DownlinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty downlink"),
            Self::TooLong { len } => write!(
                f,
                "downlink too long: {} bytes (max {})",
                len, MAX_DOWNLINK_LEN
            ),
            Self::WrongPort(port) => write!(f, "downlink on unexpected port {}", port),
        }
    }
}

impl std::error::Error for DownlinkError {}
