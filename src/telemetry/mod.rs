//! Telemetry dispatch.
//!
//! - [`device`]: Device trait and typed readings
//! - [`dispatcher`]: Walks devices and packs readings into uplink frames

mod device;
mod dispatcher;

pub use device::{Reading, ReadingValue, TelemetryDevice};
pub use dispatcher::{DispatchReport, TelemetryDispatcher};
