//! LoRaWAN connectivity and telemetry dispatch for IoT sensor nodes.
//!
//! This library contains the platform-independent core: it manages the
//! connection lifecycle of a LoRaWAN radio module, packs typed sensor readings
//! into compact uplink frames and relays downlink control messages. The radio
//! module, the job scheduler and configuration storage are reached through
//! traits, so everything here can be tested on the host.

pub mod config;
pub mod lorawan;
pub mod telemetry;
pub mod uplink;

// Re-export commonly used items
pub use config::{ConfigError, ConfigStore, LinkConfig, LinkTiming, StartupMode};
pub use lorawan::{ConnectError, ConnectionManager, JobQueue, LinkEvent, LinkState, RadioModule};
pub use telemetry::{Reading, ReadingValue, TelemetryDevice, TelemetryDispatcher};
pub use uplink::{PackError, Uplink, UplinkPacker};
