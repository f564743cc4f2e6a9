//! Tag-prefixed uplink records.
//!
//! # Record Format
//!
//! ```text
//! [tag: 1 byte][value: 1/2/4/8 bytes big-endian]
//! ```
//!
//! Integers are written in network byte order regardless of host endianness.
//! Floats are written as the big-endian bit pattern of their `f32`
//! representation. A float pair (geolocation) is two floats back to back and
//! counts as one record.
//!
//! The tag identifies the semantic type of the value for the receiving
//! application. Decoding a captured frame needs the same tag to kind map:
//!
//! ```
//! use iot_node_lorawan::uplink::{decode_frame, Value, ValueKind};
//!
//! let frame = [5, 200, 6, 0x03, 0xE8];
//! let records = decode_frame(&frame, |tag| match tag {
//!     5 => Some(ValueKind::U8),
//!     6 => Some(ValueKind::U16),
//!     _ => None,
//! })
//! .unwrap();
//! assert_eq!(records[0].value, Value::U8(200));
//! assert_eq!(records[1].value, Value::U16(1000));
//! ```

use std::fmt;

/// Width of the tag byte.
pub const TAG_LEN: usize = 1;

/// Scalar kind of an encoded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Bool,
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    F32,
    /// Two `f32` values (latitude, longitude).
    F32Pair,
}

impl ValueKind {
    /// Encoded width of the value, without the tag.
    pub const fn width(self) -> usize {
        match self {
            Self::Bool | Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 | Self::F32 => 4,
            Self::F32Pair => 8,
        }
    }

    /// Short name used in logs.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::U8 => "u8",
            Self::I8 => "i8",
            Self::U16 => "u16",
            Self::I16 => "i16",
            Self::U32 => "u32",
            Self::I32 => "i32",
            Self::F32 => "f32",
            Self::F32Pair => "f32 pair",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A scalar value ready for encoding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Bool(bool),
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    F32(f32),
    F32Pair(f32, f32),
}

impl Value {
    /// Kind of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Bool(_) => ValueKind::Bool,
            Self::U8(_) => ValueKind::U8,
            Self::I8(_) => ValueKind::I8,
            Self::U16(_) => ValueKind::U16,
            Self::I16(_) => ValueKind::I16,
            Self::U32(_) => ValueKind::U32,
            Self::I32(_) => ValueKind::I32,
            Self::F32(_) => ValueKind::F32,
            Self::F32Pair(..) => ValueKind::F32Pair,
        }
    }

    /// Append the big-endian encoding to `out`.
    pub fn write_be(&self, out: &mut Vec<u8>) {
        match *self {
            Self::Bool(v) => out.push(u8::from(v)),
            Self::U8(v) => out.push(v),
            Self::I8(v) => out.extend_from_slice(&v.to_be_bytes()),
            Self::U16(v) => out.extend_from_slice(&v.to_be_bytes()),
            Self::I16(v) => out.extend_from_slice(&v.to_be_bytes()),
            Self::U32(v) => out.extend_from_slice(&v.to_be_bytes()),
            Self::I32(v) => out.extend_from_slice(&v.to_be_bytes()),
            Self::F32(v) => out.extend_from_slice(&v.to_bits().to_be_bytes()),
            Self::F32Pair(a, b) => {
                out.extend_from_slice(&a.to_bits().to_be_bytes());
                out.extend_from_slice(&b.to_bits().to_be_bytes());
            }
        }
    }

    /// Decode a value of `kind` from exactly `kind.width()` bytes.
    fn read_be(kind: ValueKind, bytes: &[u8]) -> Option<Self> {
        let value = match kind {
            ValueKind::Bool => Self::Bool(*bytes.first()? != 0),
            ValueKind::U8 => Self::U8(*bytes.first()?),
            ValueKind::I8 => Self::I8(i8::from_be_bytes(bytes.try_into().ok()?)),
            ValueKind::U16 => Self::U16(u16::from_be_bytes(bytes.try_into().ok()?)),
            ValueKind::I16 => Self::I16(i16::from_be_bytes(bytes.try_into().ok()?)),
            ValueKind::U32 => Self::U32(u32::from_be_bytes(bytes.try_into().ok()?)),
            ValueKind::I32 => Self::I32(i32::from_be_bytes(bytes.try_into().ok()?)),
            ValueKind::F32 => {
                Self::F32(f32::from_bits(u32::from_be_bytes(bytes.try_into().ok()?)))
            }
            ValueKind::F32Pair => {
                let (a, b) = bytes.split_at(4);
                Self::F32Pair(
                    f32::from_bits(u32::from_be_bytes(a.try_into().ok()?)),
                    f32::from_bits(u32::from_be_bytes(b.try_into().ok()?)),
                )
            }
        };
        Some(value)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Self::U8(v)
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Self::I8(v)
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Self::U16(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Self::I16(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::U32(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::I32(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::F32(v)
    }
}

impl From<(f32, f32)> for Value {
    fn from((a, b): (f32, f32)) -> Self {
        Self::F32Pair(a, b)
    }
}

impl From<[f32; 2]> for Value {
    fn from([a, b]: [f32; 2]) -> Self {
        Self::F32Pair(a, b)
    }
}

/// One tag-value record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Record {
    /// Semantic type tag.
    pub tag: u8,
    /// Value.
    pub value: Value,
}

impl Record {
    /// Create a record.
    pub fn new(tag: u8, value: impl Into<Value>) -> Self {
        Self {
            tag,
            value: value.into(),
        }
    }

    /// Encoded length including the tag.
    pub fn encoded_len(&self) -> usize {
        TAG_LEN + self.value.kind().width()
    }

    /// Append the encoded record to `out`.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.push(self.tag);
        self.value.write_be(out);
    }
}

/// Errors decoding a captured uplink frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Tag not present in the tag to kind map.
    UnknownTag { tag: u8, offset: usize },
    /// Frame ended in the middle of a value.
    Truncated {
        tag: u8,
        needed: usize,
        available: usize,
    },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownTag { tag, offset } => {
                write!(f, "unknown tag {} at offset {}", tag, offset)
            }
            Self::Truncated {
                tag,
                needed,
                available,
            } => write!(
                f,
                "truncated value for tag {}: need {} bytes, have {}",
                tag, needed, available
            ),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Parse a frame into records using the tag to kind map.
pub fn decode_frame(
    frame: &[u8],
    kind_for_tag: impl Fn(u8) -> Option<ValueKind>,
) -> Result<Vec<Record>, DecodeError> {
    let mut records = Vec::new();
    let mut offset = 0;

    while offset < frame.len() {
        let tag = frame[offset];
        let kind = kind_for_tag(tag).ok_or(DecodeError::UnknownTag { tag, offset })?;
        let start = offset + TAG_LEN;
        let end = start + kind.width();
        let available = frame.len() - start;
        let bytes = frame.get(start..end).ok_or(DecodeError::Truncated {
            tag,
            needed: kind.width(),
            available,
        })?;
        // Width is checked above, so this cannot fail
        let value = Value::read_be(kind, bytes).ok_or(DecodeError::Truncated {
            tag,
            needed: kind.width(),
            available,
        })?;
        records.push(Record { tag, value });
        offset = end;
    }

    Ok(records)
}
