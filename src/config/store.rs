//! Link configuration persistence.
//!
//! The connection manager only needs "persist configuration" and "read
//! configuration"; [`ConfigStore`] is that seam. [`FileStore`] keeps the
//! configuration as JSON under `~/.iot-node-lorawan/lorawan.json` by default,
//! [`MemoryStore`] keeps it in memory for tests and demos.
//!
//! # Usage
//!
//! ```ignore
//! use iot_node_lorawan::config::{ConfigStore, FileStore};
//!
//! let store = FileStore::at_default_path()?;
//! let config = store.load()?.unwrap_or_default();
//! log::info!("LoRaWAN region: {}", config.region);
//! ```

use super::LinkConfig;
use log::{debug, info};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Get the default configuration file path.
///
/// Returns `~/.iot-node-lorawan/lorawan.json`
pub fn default_config_path() -> io::Result<PathBuf> {
    let home = std::env::var("HOME")
        .map_err(|_| io::Error::new(io::ErrorKind::NotFound, "HOME not set"))?;
    Ok(PathBuf::from(home)
        .join(".iot-node-lorawan")
        .join("lorawan.json"))
}

/// Storage backend for [`LinkConfig`].
pub trait ConfigStore {
    /// Load the stored configuration, `None` if nothing has been saved yet.
    fn load(&self) -> Result<Option<LinkConfig>, StoreError>;

    /// Persist the configuration.
    fn save(&mut self, config: &LinkConfig) -> Result<(), StoreError>;
}

/// Errors that can occur while loading or saving configuration.
#[derive(Debug)]
pub enum StoreError {
    /// Filesystem error.
    Io(io::Error),
    /// Stored data is not a valid configuration.
    Json(serde_json::Error),
    /// Read-back after a write did not match what was written.
    VerifyFailed { wrote: usize, read: usize },
    /// Backend refused the write.
    Unavailable,
}

impl From<io::Error> for StoreError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "config I/O error: {}", e),
            Self::Json(e) => write!(f, "config format error: {}", e),
            Self::VerifyFailed { wrote, read } => write!(
                f,
                "config verification failed: wrote {} bytes, read {} bytes",
                wrote, read
            ),
            Self::Unavailable => write!(f, "config storage unavailable"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Json(e) => Some(e),
            _ => None,
        }
    }
}

/// JSON file backed configuration store.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Store configuration at a specific path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store configuration at [`default_config_path`].
    pub fn at_default_path() -> io::Result<Self> {
        Ok(Self::new(default_config_path()?))
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for FileStore {
    fn load(&self) -> Result<Option<LinkConfig>, StoreError> {
        let json = match fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No config file found at {:?}", self.path);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&json)?))
    }

    fn save(&mut self, config: &LinkConfig) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(config)?;
        fs::write(&self.path, &json)?;

        // Read back to catch silent write failures
        let read_back = fs::read_to_string(&self.path)?;
        if read_back != json {
            return Err(StoreError::VerifyFailed {
                wrote: json.len(),
                read: read_back.len(),
            });
        }

        info!("Config saved to {:?}", self.path);
        Ok(())
    }
}

/// In-memory configuration store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    config: Option<LinkConfig>,
    saves: usize,
    fail_saves: bool,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already holds a configuration.
    pub fn with_config(config: LinkConfig) -> Self {
        Self {
            config: Some(config),
            ..Self::default()
        }
    }

    /// Make subsequent saves fail with [`StoreError::Unavailable`].
    pub fn set_fail_saves(&mut self, fail: bool) {
        self.fail_saves = fail;
    }

    /// Number of successful saves.
    pub fn saves(&self) -> usize {
        self.saves
    }

    /// Last saved configuration.
    pub fn stored(&self) -> Option<&LinkConfig> {
        self.config.as_ref()
    }
}

impl ConfigStore for MemoryStore {
    fn load(&self) -> Result<Option<LinkConfig>, StoreError> {
        Ok(self.config.clone())
    }

    fn save(&mut self, config: &LinkConfig) -> Result<(), StoreError> {
        if self.fail_saves {
            return Err(StoreError::Unavailable);
        }
        self.config = Some(config.clone());
        self.saves += 1;
        Ok(())
    }
}
