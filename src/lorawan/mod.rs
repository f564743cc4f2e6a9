//! LoRaWAN link support.
//!
//! This module contains:
//! - [`module`]: Radio module adapter boundary and packet types
//! - [`connection`]: Connection manager (bring-up, join, health poll, reconnect)
//! - [`backoff`]: Reconnect backoff policy
//! - [`scheduler`]: Periodic job scheduling seam
//! - [`events`]: Notifications for the application
//! - [`downlink`]: Downlink control message decoding
//! - [`sim`]: Simulated radio module for host runs and tests

mod backoff;
mod connection;
mod downlink;
mod events;
mod module;
mod scheduler;
mod sim;

pub use backoff::ReconnectBackoff;
pub use connection::{ConnectError, ConnectionManager, LinkState, SendError};
pub use downlink::{DownlinkError, DownlinkMessage, MAX_DOWNLINK_LEN};
pub use events::{EventSink, LinkEvent};
pub use module::{
    DeviceEui, DownlinkPacket, ModuleError, ModuleEvent, ModuleFactory, RadioModule, SendStatus,
    UplinkPacket, API_OPTIONS, APP_PORT,
};
pub use scheduler::{Job, JobQueue, Scheduler};
pub use sim::{SimCounters, SimSettings, SimulatedModule};
