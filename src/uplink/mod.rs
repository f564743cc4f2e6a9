//! Uplink payload packing.
//!
//! - [`record`]: Tag-prefixed big-endian record format and frame decoding
//! - [`packer`]: Fixed-capacity frame buffer with automatic flush

mod packer;
mod record;

pub use packer::{PackError, Uplink, UplinkPacker, DEFAULT_CAPACITY};
pub use record::{decode_frame, DecodeError, Record, Value, ValueKind, TAG_LEN};
