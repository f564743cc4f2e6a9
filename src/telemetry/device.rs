//! Sensor devices as seen by the dispatcher.
//!
//! Device discovery and parameter registration live elsewhere; the dispatcher
//! only needs a name, an on-demand refresh and a list of typed readings.

use crate::uplink::Value;

/// A source of readings.
pub trait TelemetryDevice {
    /// Device name, unique within a dispatcher.
    fn name(&self) -> &str;

    /// Take a fresh measurement before outputs are read.
    fn refresh(&mut self) {}

    /// Current output readings in parameter order.
    fn outputs(&self) -> Vec<Reading>;
}

/// Value of one output parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadingValue {
    Bool(bool),
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    F32(f32),
    /// Sent as `f32`.
    F64(f64),
    /// Geolocation, sent as a float pair in its own frame.
    Coordinates { lat: f32, lon: f32 },
    /// Not sent.
    Array(Vec<f32>),
    /// Not sent.
    Text(String),
}

impl ReadingValue {
    /// Wire value for scalar readings, `None` for everything else.
    pub fn scalar(&self) -> Option<Value> {
        let value = match *self {
            Self::Bool(v) => Value::Bool(v),
            Self::U8(v) => Value::U8(v),
            Self::I8(v) => Value::I8(v),
            Self::U16(v) => Value::U16(v),
            Self::I16(v) => Value::I16(v),
            Self::U32(v) => Value::U32(v),
            Self::I32(v) => Value::I32(v),
            Self::F32(v) => Value::F32(v),
            Self::F64(v) => Value::F32(v as f32),
            Self::Coordinates { .. } | Self::Array(_) | Self::Text(_) => return None,
        };
        Some(value)
    }

    /// Type name used in logs.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::U8(_) => "uint8",
            Self::I8(_) => "int8",
            Self::U16(_) => "uint16",
            Self::I16(_) => "int16",
            Self::U32(_) => "uint32",
            Self::I32(_) => "int32",
            Self::F32(_) => "float",
            Self::F64(_) => "double",
            Self::Coordinates { .. } => "coordinates",
            Self::Array(_) => "array",
            Self::Text(_) => "string",
        }
    }
}

/// One output parameter of a device.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    /// Parameter name.
    pub name: String,
    /// Disabled readings are skipped.
    pub enabled: bool,
    /// Wire tag; untyped readings (`None`) are skipped.
    pub tag: Option<u8>,
    /// Current value.
    pub value: ReadingValue,
}

impl Reading {
    /// An enabled, tagged reading.
    pub fn new(name: impl Into<String>, tag: u8, value: ReadingValue) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            tag: Some(tag),
            value,
        }
    }

    /// An enabled reading without a wire tag.
    pub fn untyped(name: impl Into<String>, value: ReadingValue) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            tag: None,
            value,
        }
    }

    /// Same reading, disabled.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}
