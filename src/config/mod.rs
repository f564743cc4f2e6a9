//! Link configuration management.
//!
//! This module provides the persisted LoRaWAN link configuration and the
//! storage seam used to load and save it.
//!
//! # Components
//!
//! - [`link`] - Credentials, class, region and timing (host-testable)
//! - [`store`] - `ConfigStore` trait with file and in-memory backends

mod link;
mod store;

pub use link::{
    AppEui, ConfigError, DeviceClass, LinkConfig, LinkTiming, Region, SecretKey, StartupMode,
    APP_EUI_HEX_LEN, DEVELOPMENT_APP_EUI, KEY_HEX_LEN, MAX_BACKOFF_CEILING,
};
pub use store::{default_config_path, ConfigStore, FileStore, MemoryStore, StoreError};
