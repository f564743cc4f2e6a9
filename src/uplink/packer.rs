//! Greedy uplink frame packer.
//!
//! Records are appended to a fixed-capacity buffer. When a record does not
//! fit in the remaining space, the pending bytes are sent as one frame first
//! and the record starts a fresh frame. A record is never split across frames.
//!
//! # Example
//!
//! ```
//! use iot_node_lorawan::lorawan::SendError;
//! use iot_node_lorawan::uplink::{Uplink, UplinkPacker};
//!
//! #[derive(Default)]
//! struct Capture(Vec<Vec<u8>>);
//!
//! impl Uplink for Capture {
//!     fn is_ready(&self) -> bool {
//!         true
//!     }
//!     fn send_frame(&mut self, frame: &[u8]) -> Result<(), SendError> {
//!         self.0.push(frame.to_vec());
//!         Ok(())
//!     }
//! }
//!
//! let mut link = Capture::default();
//! let mut packer = UplinkPacker::default();
//! packer.encode(&mut link, 5, 200u8).unwrap();
//! packer.encode(&mut link, 6, 1000u16).unwrap();
//! packer.flush(&mut link).unwrap();
//! assert_eq!(link.0, vec![vec![5, 200, 6, 0x03, 0xE8]]);
//! ```

use super::record::{Record, Value};
use crate::config::ConfigStore;
use crate::lorawan::{ConnectionManager, EventSink, RadioModule, Scheduler, SendError};
use log::{debug, error};
use std::fmt;

/// Default frame capacity in bytes.
///
/// Fits one uplink without fragmentation at conservative spreading factors.
pub const DEFAULT_CAPACITY: usize = 11;

/// Uplink path used by the packer.
pub trait Uplink {
    /// Whether frames can be sent now (enabled, module present, connected).
    fn is_ready(&self) -> bool;

    /// Send one frame.
    fn send_frame(&mut self, frame: &[u8]) -> Result<(), SendError>;
}

impl<M, S, E, C> Uplink for ConnectionManager<M, S, E, C>
where
    M: RadioModule,
    S: Scheduler,
    E: EventSink,
    C: ConfigStore,
{
    fn is_ready(&self) -> bool {
        self.is_connected()
    }

    fn send_frame(&mut self, frame: &[u8]) -> Result<(), SendError> {
        self.send_payload(frame).map(|_| ())
    }
}

/// Packer refusal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackError {
    /// Link not ready (disabled, no module or not connected).
    NotReady,
    /// Zero bytes requested.
    ZeroLength,
    /// Record larger than the whole frame.
    RecordTooLarge { len: usize, capacity: usize },
    /// Zero capacity requested.
    InvalidCapacity,
}

impl fmt::Display for PackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotReady => write!(f, "uplink not ready"),
            Self::ZeroLength => write!(f, "zero-length record"),
            Self::RecordTooLarge { len, capacity } => write!(
                f,
                "record of {} bytes exceeds frame capacity {}",
                len, capacity
            ),
            Self::InvalidCapacity => write!(f, "frame capacity must be non-zero"),
        }
    }
}

impl std::error::Error for PackError {}

/// Fixed-capacity frame buffer with tag-prefixed encoders.
#[derive(Debug, Clone)]
pub struct UplinkPacker {
    buffer: Vec<u8>,
    capacity: usize,
    frames_sent: u32,
    frames_dropped: u32,
}

impl Default for UplinkPacker {
    fn default() -> Self {
        Self {
            buffer: Vec::with_capacity(DEFAULT_CAPACITY),
            capacity: DEFAULT_CAPACITY,
            frames_sent: 0,
            frames_dropped: 0,
        }
    }
}

impl UplinkPacker {
    /// Create a packer with a custom frame capacity.
    pub fn with_capacity(capacity: usize) -> Result<Self, PackError> {
        if capacity == 0 {
            return Err(PackError::InvalidCapacity);
        }
        Ok(Self {
            buffer: Vec::with_capacity(capacity),
            capacity,
            ..Default::default()
        })
    }

    /// Frame capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes buffered and not yet sent.
    pub fn offset(&self) -> usize {
        self.buffer.len()
    }

    /// Pending bytes.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Space left in the current frame.
    pub fn remaining(&self) -> usize {
        self.capacity - self.buffer.len()
    }

    /// Frames handed to the link.
    pub fn frames_sent(&self) -> u32 {
        self.frames_sent
    }

    /// Frames the link refused; their records are lost.
    pub fn frames_dropped(&self) -> u32 {
        self.frames_dropped
    }

    /// Make room for `n` more bytes, sending the pending frame if needed.
    ///
    /// A failed send is logged and the buffer is cleared anyway.
    pub fn ensure_room<U: Uplink + ?Sized>(
        &mut self,
        link: &mut U,
        n: usize,
    ) -> Result<(), PackError> {
        if n == 0 {
            return Err(PackError::ZeroLength);
        }
        if n > self.capacity {
            return Err(PackError::RecordTooLarge {
                len: n,
                capacity: self.capacity,
            });
        }
        if !link.is_ready() {
            return Err(PackError::NotReady);
        }

        if self.buffer.len() + n > self.capacity {
            self.send_pending(link);
        }
        Ok(())
    }

    fn send_pending<U: Uplink + ?Sized>(&mut self, link: &mut U) {
        if !self.buffer.is_empty() {
            match link.send_frame(&self.buffer) {
                Ok(()) => self.frames_sent += 1,
                Err(e) => {
                    self.frames_dropped += 1;
                    error!("Failed to send {} byte uplink: {}", self.buffer.len(), e);
                }
            }
        }
        self.buffer.clear();
    }

    /// Append one record, sending the pending frame first if it does not fit.
    pub fn encode<U: Uplink + ?Sized>(
        &mut self,
        link: &mut U,
        tag: u8,
        value: impl Into<Value>,
    ) -> Result<(), PackError> {
        let record = Record::new(tag, value);
        self.ensure_room(link, record.encoded_len())?;

        debug!(
            "Packing tag {} ({}) at offset {}",
            record.tag,
            record.value.kind(),
            self.buffer.len()
        );
        record.write_to(&mut self.buffer);
        Ok(())
    }

    /// Send whatever is pending. An empty buffer sends nothing.
    pub fn flush<U: Uplink + ?Sized>(&mut self, link: &mut U) -> Result<(), PackError> {
        self.ensure_room(link, self.capacity)
    }

    /// Drop pending bytes without sending.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
