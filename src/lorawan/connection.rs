//! LoRaWAN connection management.
//!
//! [`ConnectionManager`] owns the radio module, the enable/disable intent and
//! three periodic jobs:
//!
//! - a connection health poll that refreshes the cached connection flag,
//! - a receive pump that drains downlinks and send-complete reports,
//! - a reconnect job with exponential backoff while the link is down.
//!
//! # Lifecycle
//!
//! ```text
//! Disabled -> (enable) -> connect() -> Connected
//!                            |             |
//!                         failure     poll sees loss
//!                            v             v
//!                      Reconnecting(backoff doubles, capped)
//!                            |
//!                     connect() succeeds -> Connected
//! ```
//!
//! Bring-up (module creation, EUI read, one-time configuration) happens lazily
//! inside the first `connect()`. It blocks the caller for up to about a second
//! in the worst case; the steady-state send path never blocks on the module.
//!
//! # Example
//!
//! ```
//! use iot_node_lorawan::config::{LinkConfig, LinkTiming, MemoryStore, SecretKey};
//! use iot_node_lorawan::lorawan::{ConnectionManager, JobQueue, LinkEvent, SimulatedModule};
//!
//! let mut config = LinkConfig::default();
//! config.app_key = Some(SecretKey::new("CD32AAB41C54175E9060D86F3A8B7F48").unwrap());
//! config.network_key = Some(SecretKey::new("CD32AAB41C54175E9060D86F3A8B7F48").unwrap());
//!
//! let mut manager = ConnectionManager::new(
//!     config,
//!     LinkTiming::default(),
//!     Box::new(|| Ok(SimulatedModule::new([0x00, 0x13, 0xA2, 0x00, 0x42, 0x01, 0xAB, 0xCD]))),
//!     JobQueue::default(),
//!     Vec::<LinkEvent>::new(),
//!     MemoryStore::new(),
//! )
//! .unwrap();
//!
//! manager.connect().unwrap();
//! assert!(manager.is_connected());
//! assert_eq!(manager.events(), &[LinkEvent::ConnectionChanged(true)]);
//! ```

use super::backoff::ReconnectBackoff;
use super::downlink::DownlinkMessage;
use super::events::{EventSink, LinkEvent};
use super::module::{
    DeviceEui, DownlinkPacket, ModuleError, ModuleEvent, ModuleFactory, RadioModule, SendStatus,
    UplinkPacket, API_OPTIONS, APP_PORT,
};
use super::scheduler::{Job, JobQueue, Scheduler};
use crate::config::{
    AppEui, ConfigError, ConfigStore, DeviceClass, LinkConfig, LinkTiming, Region, SecretKey,
    StartupMode,
};
use log::{debug, error, info, warn};
use std::fmt;
use std::time::{Duration, Instant};

/// Observable link state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Link disabled by configuration.
    Disabled,
    /// Enabled, not connected, no reconnect pending.
    Disconnected,
    /// Enabled and waiting for the next reconnect attempt.
    Reconnecting {
        /// Current backoff period.
        period: Duration,
    },
    /// Joined (as of the last health poll).
    Connected,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "disabled"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Reconnecting { period } => {
                write!(f, "reconnecting (every {}s)", period.as_secs())
            }
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Why a `connect()` attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// The link is disabled.
    Disabled,
    /// The module handle could not be created. Not retried.
    ModuleUnavailable(ModuleError),
    /// The module did not initialize.
    Bringup(ModuleError),
    /// The device EUI could not be read within the retry budget.
    EuiUnavailable { attempts: u8 },
    /// A credential needed for first-time configuration is missing.
    MissingCredential(&'static str),
    /// The network join did not succeed within the retry budget.
    JoinFailed { attempts: u8 },
}

impl ConnectError {
    /// Failures that retrying cannot fix.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ModuleUnavailable(_))
    }
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "LoRaWAN link is disabled"),
            Self::ModuleUnavailable(e) => write!(f, "radio module unavailable: {}", e),
            Self::Bringup(e) => write!(f, "radio module failed to initialize: {}", e),
            Self::EuiUnavailable { attempts } => {
                write!(f, "device EUI not readable after {} attempts", attempts)
            }
            Self::MissingCredential(what) => write!(f, "no {} provided", what),
            Self::JoinFailed { attempts } => {
                write!(f, "network join failed after {} attempts", attempts)
            }
        }
    }
}

impl std::error::Error for ConnectError {}

/// Why an uplink was not handed to the module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// The link is disabled.
    Disabled,
    /// No module has been brought up.
    NoModule,
    /// Not connected (cached state).
    NotConnected,
    /// Zero-length payload.
    EmptyPayload,
    /// The module refused the frame.
    Module(ModuleError),
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "link disabled"),
            Self::NoModule => write!(f, "no radio module"),
            Self::NotConnected => write!(f, "not connected"),
            Self::EmptyPayload => write!(f, "empty payload"),
            Self::Module(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SendError {}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

/// Owns the radio module and keeps the LoRaWAN link up.
pub struct ConnectionManager<M, S, E, C> {
    config: LinkConfig,
    timing: LinkTiming,
    factory: ModuleFactory<M>,
    module: Option<M>,
    module_initialized: bool,
    connected: bool,
    device_eui: Option<DeviceEui>,
    backoff: ReconnectBackoff,
    scheduler: S,
    events: E,
    store: C,
}

impl<M, S, E, C> ConnectionManager<M, S, E, C>
where
    M: RadioModule,
    S: Scheduler,
    E: EventSink,
    C: ConfigStore,
{
    /// Create a manager. No module I/O happens until the first `connect()`.
    pub fn new(
        config: LinkConfig,
        timing: LinkTiming,
        factory: ModuleFactory<M>,
        scheduler: S,
        events: E,
        store: C,
    ) -> Result<Self, ConfigError> {
        timing.validate()?;
        Ok(Self {
            config,
            timing,
            factory,
            module: None,
            module_initialized: false,
            connected: false,
            device_eui: None,
            backoff: ReconnectBackoff::new(timing.initial_backoff, timing.max_backoff),
            scheduler,
            events,
            store,
        })
    }

    /// Start the link according to `mode`.
    ///
    /// With [`StartupMode::Immediate`] an enabled link connects now and falls
    /// back to reconnect mode on a retryable failure.
    pub fn initialize(&mut self, mode: StartupMode) -> Result<(), ConnectError> {
        info!(
            "LoRaWAN link: region {}, class {}, app EUI {}",
            self.config.region, self.config.class, self.config.app_eui
        );
        if mode == StartupMode::Delayed || !self.config.enabled {
            return Ok(());
        }
        self.connect_or_reconnect()
    }

    // ==================== Enable / Connect ====================

    /// Change the enabled intent. No-op when unchanged.
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.config.enabled == enabled {
            return;
        }
        self.config.enabled = enabled;
        self.persist();

        if enabled {
            info!("LoRaWAN enabled");
            let _ = self.connect_or_reconnect();
        } else {
            info!("LoRaWAN disabled");
            self.disconnect();
            self.scheduler.cancel(Job::Reconnect);
            self.backoff.reset();
        }
    }

    /// Whether the link is enabled.
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn connect_or_reconnect(&mut self) -> Result<(), ConnectError> {
        let result = self.connect();
        if let Err(e) = &result {
            if e.is_fatal() {
                error!("LoRaWAN: {}", e);
            } else {
                warn!("LoRaWAN connect failed: {}", e);
                self.start_reconnect_mode();
            }
        }
        result
    }

    /// Join the network, bringing the module up first if needed.
    ///
    /// On success the health poll and receive pump are armed. On failure no
    /// job is armed; the caller decides whether to enter backoff.
    pub fn connect(&mut self) -> Result<(), ConnectError> {
        if !self.config.enabled {
            return Err(ConnectError::Disabled);
        }
        if self.is_connected() {
            return Ok(());
        }

        info!("Connecting to the LoRaWAN network");

        if !self.module_initialized {
            self.setup_module()?;
        }

        let attempts = self.timing.connect_attempts;
        let retry_delay = self.timing.connect_retry_delay;
        let class = self.config.class;
        let module = self
            .module
            .as_mut()
            .ok_or_else(|| ConnectError::Bringup(ModuleError::Io("no module".into())))?;

        let mut joined = false;
        for attempt in 1..=attempts {
            match module.connect() {
                Ok(()) => {
                    joined = true;
                    break;
                }
                Err(e) => debug!("Join attempt {}/{} failed: {}", attempt, attempts, e),
            }
            if attempt < attempts {
                module.pause(retry_delay);
            }
        }

        if !joined {
            warn!("LoRaWAN connect failed");
            return Err(ConnectError::JoinFailed { attempts });
        }

        if let Err(e) = module.set_class(class) {
            warn!("Failed to set LoRaWAN class {}: {}", class, e);
        }

        info!("LoRaWAN connected");
        self.connected = true;
        self.events.notify(LinkEvent::ConnectionChanged(true));

        self.scheduler
            .schedule(Job::HealthPoll, self.timing.health_poll);
        self.scheduler
            .schedule(Job::ReceivePump, self.timing.receive_pump);
        Ok(())
    }

    /// Leave the network and stop the connected-state jobs.
    pub fn disconnect(&mut self) {
        if let Some(module) = self.module.as_mut() {
            if let Err(e) = module.disconnect() {
                error!("LoRaWAN disconnect error: {}", e);
            }
        }

        if self.connected {
            self.events.notify(LinkEvent::ConnectionChanged(false));
        }
        self.connected = false;

        self.scheduler.cancel(Job::HealthPoll);
        self.scheduler.cancel(Job::ReceivePump);
    }

    /// Cached connection state, refreshed by the health poll.
    ///
    /// May be stale by up to one poll period. Never touches the module.
    pub fn is_connected(&self) -> bool {
        self.config.enabled && self.module.is_some() && self.connected
    }

    /// Arm the reconnect job at the initial backoff period (enabled links only).
    pub fn start_reconnect_mode(&mut self) {
        if !self.config.enabled {
            return;
        }
        let period = self.backoff.reset();
        info!("LoRaWAN reconnect in {}s", period.as_secs());
        self.scheduler.schedule(Job::Reconnect, period);
    }

    // ==================== Bring-up ====================

    fn setup_module(&mut self) -> Result<(), ConnectError> {
        match self.module.as_mut() {
            Some(module) => {
                if let Err(e) = module.reset() {
                    warn!("LoRaWAN module reset failed: {}", e);
                }
            }
            None => {
                let module = (self.factory)().map_err(|e| {
                    error!("Failed to create the LoRaWAN module: {}", e);
                    ConnectError::ModuleUnavailable(e)
                })?;
                self.module = Some(module);
            }
        }

        let attempts = self.timing.eui_read_attempts;
        let retry_delay = self.timing.eui_retry_delay;
        let Some(module) = self.module.as_mut() else {
            return Err(ConnectError::ModuleUnavailable(ModuleError::CreateFailed(
                "module missing after creation".into(),
            )));
        };

        module.begin().map_err(|e| {
            error!("Failed to initialize the LoRaWAN module: {}", e);
            ConnectError::Bringup(e)
        })?;

        // The module may need a few tries before it answers
        let mut eui = None;
        for attempt in 1..=attempts {
            match module.read_device_eui() {
                Ok(value) => {
                    eui = Some(value);
                    break;
                }
                Err(e) => debug!("EUI read {}/{} failed: {}", attempt, attempts, e),
            }
            if attempt < attempts {
                module.pause(retry_delay);
            }
        }
        let Some(eui) = eui else {
            error!("The LoRaWAN module failed to initialize");
            return Err(ConnectError::EuiUnavailable { attempts });
        };
        info!("LoRaWAN device EUI: {}", eui);
        self.device_eui = Some(eui);

        if !self.config.module_configured {
            configure_module(module, &self.config)?;
            self.config.module_configured = true;
            self.persist();
        }

        self.module_initialized = true;
        Ok(())
    }

    /// Force reconfiguration: clear the configured flag, bring the module up
    /// again and reconnect if enabled. A retryable bring-up failure on an
    /// enabled link arms the reconnect job.
    pub fn reset_module(&mut self) -> Result<(), ConnectError> {
        info!("Resetting the LoRaWAN module");

        self.config.module_configured = false;
        self.persist();

        self.disconnect();
        self.module_initialized = false;

        if let Err(e) = self.setup_module() {
            error!("LoRaWAN module reset failed: {}", e);
            if !e.is_fatal() {
                self.start_reconnect_mode();
            }
            return Err(e);
        }
        info!("LoRaWAN module reset succeeded");

        if self.config.enabled {
            self.connect_or_reconnect()?;
        }
        Ok(())
    }

    // ==================== Scheduled jobs ====================

    /// Run a scheduled job.
    pub fn run_job(&mut self, job: Job) {
        match job {
            Job::HealthPoll => self.connection_health_poll(),
            Job::ReceivePump => self.pump(),
            Job::Reconnect => self.reconnect_job(),
        }
    }

    /// Query the live connection flag and react to a lost link.
    pub fn connection_health_poll(&mut self) {
        if !self.config.enabled {
            return;
        }
        let Some(module) = self.module.as_mut() else {
            return;
        };

        let live = module.is_connected();
        if live != self.connected {
            self.connected = live;
            self.events.notify(LinkEvent::ConnectionChanged(live));
        }

        if !self.connected {
            warn!("LoRaWAN connection lost");
            self.start_reconnect_mode();
            // Re-armed by the next successful connect
            self.scheduler.cancel(Job::HealthPoll);
            self.scheduler.cancel(Job::ReceivePump);
        }
    }

    /// One reconnect attempt; doubles the backoff period on failure.
    pub fn reconnect_job(&mut self) {
        if !self.config.enabled {
            self.scheduler.cancel(Job::Reconnect);
            return;
        }
        if self.is_connected() {
            self.scheduler.cancel(Job::Reconnect);
            self.backoff.reset();
            return;
        }

        match self.connect() {
            Ok(()) => {
                self.scheduler.cancel(Job::Reconnect);
                self.backoff.reset();
            }
            Err(e) if e.is_fatal() => {
                error!("LoRaWAN reconnect abandoned: {}", e);
                self.scheduler.cancel(Job::Reconnect);
            }
            Err(e) => {
                let period = self.backoff.record_failure();
                warn!(
                    "LoRaWAN reconnect failed ({}), next attempt in {}s",
                    e,
                    period.as_secs()
                );
                self.scheduler.schedule(Job::Reconnect, period);
            }
        }
    }

    /// Drive module processing and translate its output into events.
    pub fn pump(&mut self) {
        let Some(module) = self.module.as_mut() else {
            return;
        };
        for event in module.process() {
            match event {
                ModuleEvent::Received(packet) => self.on_receive(packet),
                ModuleEvent::SendComplete { frame_id, status } => {
                    self.on_send_complete(frame_id, status)
                }
            }
        }
    }

    fn on_receive(&mut self, packet: DownlinkPacket) {
        debug!(
            "LoRaWAN downlink: port {} payload 0x{} ack {} RSSI {} SNR {} counter {}",
            packet.port,
            hex(&packet.payload),
            packet.ack,
            packet.rssi,
            packet.snr,
            packet.counter
        );
        match DownlinkMessage::from_packet(&packet) {
            Ok(msg) => self.events.notify(LinkEvent::MessageReceived(msg.value())),
            Err(e) => warn!("Dropping LoRaWAN downlink: {}", e),
        }
    }

    fn on_send_complete(&mut self, frame_id: u8, status: SendStatus) {
        self.events.notify(LinkEvent::SendComplete(status.is_ok()));
        if !status.is_ok() {
            warn!(
                "LoRaWAN data send failed. Frame ID: {:#04X} Reason: {}",
                frame_id, status
            );
        }
    }

    // ==================== Uplink ====================

    /// Hand `payload` to the module on the application port, unconfirmed.
    ///
    /// Fails fast without module I/O when disabled or not connected.
    /// Completion is reported later as [`LinkEvent::SendComplete`].
    pub fn send_payload(&mut self, payload: &[u8]) -> Result<u8, SendError> {
        if !self.config.enabled {
            return Err(SendError::Disabled);
        }
        if !self.connected {
            return Err(SendError::NotConnected);
        }
        if payload.is_empty() {
            return Err(SendError::EmptyPayload);
        }
        let module = self.module.as_mut().ok_or(SendError::NoModule)?;

        info!("Sending packet: 0x{}", hex(payload));
        let packet = UplinkPacket {
            port: APP_PORT,
            ack: false,
            payload: payload.to_vec(),
        };
        module.send(&packet).map_err(SendError::Module)
    }

    // ==================== Configuration ====================

    /// Change the application EUI (takes effect after restart).
    pub fn set_app_eui(&mut self, eui: AppEui) {
        if self.config.app_eui == eui {
            return;
        }
        self.config.app_eui = eui;
        self.mark_config_stale("application EUI");
    }

    /// Change the application key (takes effect after restart).
    pub fn set_app_key(&mut self, key: SecretKey) {
        if self.config.app_key.as_ref() == Some(&key) {
            return;
        }
        self.config.app_key = Some(key);
        self.mark_config_stale("application key");
    }

    /// Change the network key (takes effect after restart).
    pub fn set_network_key(&mut self, key: SecretKey) {
        if self.config.network_key.as_ref() == Some(&key) {
            return;
        }
        self.config.network_key = Some(key);
        self.mark_config_stale("network key");
    }

    /// Change the region (takes effect after restart).
    pub fn set_region(&mut self, region: Region) {
        if self.config.region == region {
            return;
        }
        self.config.region = region;
        self.mark_config_stale("region");
    }

    /// Change the operating class; pushed to a live module immediately.
    pub fn set_class(&mut self, class: DeviceClass) {
        if self.config.class == class {
            return;
        }
        self.config.class = class;
        self.persist();

        if let Some(module) = self.module.as_mut() {
            match module.set_class(class) {
                Ok(()) => info!("LoRaWAN class set to {}", class),
                Err(e) => warn!("Failed to set LoRaWAN class {}: {}", class, e),
            }
        }
    }

    fn mark_config_stale(&mut self, what: &str) {
        info!("LoRaWAN {} changed; restart required", what);
        self.config.module_configured = false;
        self.persist();
        self.events.notify(LinkEvent::RestartRequired);
    }

    fn persist(&mut self) {
        if let Err(e) = self.store.save(&self.config) {
            error!("Failed to persist LoRaWAN configuration: {}", e);
        }
    }

    // ==================== Status ====================

    /// Derived link state.
    pub fn state(&self) -> LinkState {
        if !self.config.enabled {
            LinkState::Disabled
        } else if self.is_connected() {
            LinkState::Connected
        } else if let Some(period) = self.scheduler.period(Job::Reconnect) {
            LinkState::Reconnecting { period }
        } else {
            LinkState::Disconnected
        }
    }

    /// Device EUI, once read during bring-up.
    pub fn device_eui(&self) -> Option<DeviceEui> {
        self.device_eui
    }

    /// Display name of the configured region.
    pub fn region_name(&self) -> &'static str {
        self.config.region.name()
    }

    /// Current reconnect period.
    pub fn reconnect_period(&self) -> Duration {
        self.backoff.period()
    }

    /// Whether one-time bring-up has completed.
    pub fn is_module_initialized(&self) -> bool {
        self.module_initialized
    }

    /// Current configuration.
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Timing parameters.
    pub fn timing(&self) -> &LinkTiming {
        &self.timing
    }

    /// The module, once created.
    pub fn module(&self) -> Option<&M> {
        self.module.as_ref()
    }

    /// Mutable access to the module, once created.
    pub fn module_mut(&mut self) -> Option<&mut M> {
        self.module.as_mut()
    }

    /// The scheduler.
    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    /// The event sink.
    pub fn events(&self) -> &E {
        &self.events
    }

    /// Mutable access to the event sink.
    pub fn events_mut(&mut self) -> &mut E {
        &mut self.events
    }

    /// The configuration store.
    pub fn store(&self) -> &C {
        &self.store
    }
}

impl<M, E, C> ConnectionManager<M, JobQueue, E, C>
where
    M: RadioModule,
    E: EventSink,
    C: ConfigStore,
{
    /// Run every job due at `now`. Returns the number of jobs run.
    pub fn tick(&mut self, now: Instant) -> usize {
        let mut ran = 0;
        for job in self.scheduler.due(now) {
            // An earlier job in this tick may have cancelled it
            if !self.scheduler.is_scheduled(job) {
                continue;
            }
            debug!("Running job: {}", job.name());
            self.run_job(job);
            ran += 1;
        }
        ran
    }
}

/// Write credentials and operating parameters into the module.
///
/// Missing credentials abort; individual write failures are logged and the
/// sequence continues.
fn configure_module<M: RadioModule>(
    module: &mut M,
    config: &LinkConfig,
) -> Result<(), ConnectError> {
    info!("Configuring the LoRaWAN module");

    let app_key = config
        .app_key
        .as_ref()
        .ok_or(ConnectError::MissingCredential("application key"))?;
    let network_key = config
        .network_key
        .as_ref()
        .ok_or(ConnectError::MissingCredential("network key"))?;

    info!("Setting App EUI: {}", config.app_eui);
    if let Err(e) = module.set_app_eui(&config.app_eui) {
        error!("Failed to set the App EUI: {}", e);
    }
    info!("Setting App Key: {}", app_key);
    if let Err(e) = module.set_app_key(app_key) {
        error!("Failed to set the App Key: {}", e);
    }
    info!("Setting Network Key: {}", network_key);
    if let Err(e) = module.set_network_key(network_key) {
        error!("Failed to set the Network Key: {}", e);
    }
    if let Err(e) = module.set_class(config.class) {
        debug!("Failed to set the LoRaWAN class: {}", e);
    }
    if let Err(e) = module.set_region(config.region) {
        warn!("Failed to set the LoRaWAN region: {}", e);
    }
    if let Err(e) = module.set_api_options(API_OPTIONS) {
        warn!("Failed to set the API options: {}", e);
    }
    if let Err(e) = module.write_config() {
        error!("Failed to write the module configuration: {}", e);
    }
    if let Err(e) = module.apply_changes() {
        error!("Failed to apply the module configuration: {}", e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryStore;
    use crate::lorawan::SimulatedModule;

    const EUI: [u8; 8] = [0x00, 0x13, 0xA2, 0x00, 0x42, 0x01, 0xAB, 0xCD];
    const KEY: &str = "CD32AAB41C54175E9060D86F3A8B7F48";

    type TestManager = ConnectionManager<SimulatedModule, JobQueue, Vec<LinkEvent>, MemoryStore>;

    fn provisioned() -> LinkConfig {
        let mut config = LinkConfig::default();
        config.app_key = Some(SecretKey::new(KEY).unwrap());
        config.network_key = Some(SecretKey::new(KEY).unwrap());
        config
    }

    fn manager_with(
        config: LinkConfig,
        setup: impl Fn(&mut SimulatedModule) + 'static,
    ) -> TestManager {
        ConnectionManager::new(
            config,
            LinkTiming::default(),
            Box::new(move || {
                let mut module = SimulatedModule::new(EUI);
                setup(&mut module);
                Ok(module)
            }),
            JobQueue::default(),
            Vec::new(),
            MemoryStore::new(),
        )
        .unwrap()
    }

    fn manager() -> TestManager {
        manager_with(provisioned(), |_| {})
    }

    // ==================== Connect ====================

    #[test]
    fn test_connect_brings_module_up_and_arms_jobs() {
        let mut m = manager();
        m.connect().unwrap();

        assert!(m.is_connected());
        assert!(m.is_module_initialized());
        assert_eq!(m.device_eui(), Some(DeviceEui(EUI)));
        assert_eq!(m.events(), &[LinkEvent::ConnectionChanged(true)]);
        assert_eq!(
            m.scheduler().period(Job::HealthPoll),
            Some(Duration::from_secs(15))
        );
        assert_eq!(
            m.scheduler().period(Job::ReceivePump),
            Some(Duration::from_secs(5))
        );
        assert_eq!(m.state(), LinkState::Connected);
    }

    #[test]
    fn test_first_connect_configures_and_persists() {
        let mut m = manager();
        m.connect().unwrap();

        let settings = m.module().unwrap().settings().clone();
        assert_eq!(settings.app_eui.as_deref(), Some("37D56A3F6CDCF0A5"));
        assert_eq!(settings.app_key.as_deref(), Some(KEY));
        assert_eq!(settings.network_key.as_deref(), Some(KEY));
        assert_eq!(settings.region, Some(Region::default()));
        assert_eq!(settings.api_options, Some(API_OPTIONS));
        assert!(settings.written && settings.applied);

        assert!(m.config().module_configured);
        assert!(m.store().stored().unwrap().module_configured);
    }

    #[test]
    fn test_configured_module_skips_configuration() {
        let mut config = provisioned();
        config.module_configured = true;
        let mut m = manager_with(config, |_| {});
        m.connect().unwrap();

        assert_eq!(m.module().unwrap().settings().app_key, None);
        assert_eq!(m.store().saves(), 0);
    }

    #[test]
    fn test_connect_when_connected_is_noop() {
        let mut m = manager();
        m.connect().unwrap();
        m.connect().unwrap();
        assert_eq!(m.module().unwrap().counters().joins, 1);
        assert_eq!(m.events().len(), 1);
    }

    #[test]
    fn test_connect_disabled() {
        let mut config = provisioned();
        config.enabled = false;
        let mut m = manager_with(config, |_| {});
        assert_eq!(m.connect(), Err(ConnectError::Disabled));
        assert!(m.module().is_none());
    }

    #[test]
    fn test_eui_read_failure_fails_connect() {
        let mut m = manager_with(provisioned(), |module| module.fail_eui_reads(3));
        assert_eq!(
            m.connect(),
            Err(ConnectError::EuiUnavailable { attempts: 3 })
        );
        assert!(!m.is_connected());
        assert!(m.scheduler().is_empty());
        assert_eq!(m.module().unwrap().counters().eui_reads, 3);
        // Two pauses between three reads
        assert_eq!(m.module().unwrap().paused(), Duration::from_millis(200));
    }

    #[test]
    fn test_eui_read_recovers_within_retries() {
        let mut m = manager_with(provisioned(), |module| module.fail_eui_reads(2));
        m.connect().unwrap();
        assert_eq!(m.module().unwrap().counters().eui_reads, 3);
    }

    #[test]
    fn test_join_retries_then_fails() {
        let mut m = manager_with(provisioned(), |module| module.fail_joins(u32::MAX));
        assert_eq!(m.connect(), Err(ConnectError::JoinFailed { attempts: 3 }));
        assert_eq!(m.module().unwrap().counters().joins, 3);
        assert!(m.events().is_empty());
        assert!(m.scheduler().is_empty());
    }

    #[test]
    fn test_missing_key_aborts_bringup() {
        let mut config = provisioned();
        config.network_key = None;
        let mut m = manager_with(config, |_| {});
        assert_eq!(
            m.connect(),
            Err(ConnectError::MissingCredential("network key"))
        );
        assert!(!m.config().module_configured);
    }

    #[test]
    fn test_rejected_writes_are_best_effort() {
        let mut m = manager_with(provisioned(), |module| module.reject_settings(true));
        m.connect().unwrap();
        assert!(m.is_connected());
        assert!(m.config().module_configured);
    }

    #[test]
    fn test_module_creation_failure_is_fatal() {
        let mut m: TestManager = ConnectionManager::new(
            provisioned(),
            LinkTiming::default(),
            Box::new(|| Err(ModuleError::CreateFailed("out of memory".into()))),
            JobQueue::default(),
            Vec::new(),
            MemoryStore::new(),
        )
        .unwrap();

        m.set_enabled(false);
        m.set_enabled(true);
        assert!(matches!(
            m.connect(),
            Err(ConnectError::ModuleUnavailable(_))
        ));
        // Fatal: no reconnect armed by enable
        assert!(!m.scheduler().is_scheduled(Job::Reconnect));
    }

    #[test]
    fn test_invalid_timing_rejected() {
        let timing = LinkTiming {
            connect_attempts: 0,
            ..Default::default()
        };
        let result: Result<TestManager, _> = ConnectionManager::new(
            provisioned(),
            timing,
            Box::new(|| Ok(SimulatedModule::new(EUI))),
            JobQueue::default(),
            Vec::new(),
            MemoryStore::new(),
        );
        assert!(matches!(result, Err(ConfigError::InvalidTiming(_))));
    }

    // ==================== Disconnect ====================

    #[test]
    fn test_double_disconnect_notifies_once() {
        let mut m = manager();
        m.connect().unwrap();
        m.disconnect();
        m.disconnect();

        assert_eq!(
            m.events(),
            &[
                LinkEvent::ConnectionChanged(true),
                LinkEvent::ConnectionChanged(false)
            ]
        );
        assert!(!m.scheduler().is_scheduled(Job::HealthPoll));
        assert!(!m.scheduler().is_scheduled(Job::ReceivePump));
    }

    #[test]
    fn test_disconnect_without_module() {
        let mut m = manager();
        m.disconnect();
        assert!(m.events().is_empty());
    }

    // ==================== Enable ====================

    #[test]
    fn test_set_enabled_unchanged_is_noop() {
        let mut m = manager();
        m.set_enabled(true);
        assert!(m.module().is_none());
        assert_eq!(m.store().saves(), 0);
    }

    #[test]
    fn test_disable_cancels_everything() {
        let mut m = manager();
        m.connect().unwrap();
        m.start_reconnect_mode();

        m.set_enabled(false);
        assert!(!m.is_connected());
        assert!(m.scheduler().is_empty());
        assert_eq!(m.state(), LinkState::Disabled);
        assert!(!m.store().stored().unwrap().enabled);
    }

    #[test]
    fn test_enable_failure_starts_reconnect() {
        let mut config = provisioned();
        config.enabled = false;
        let mut m = manager_with(config, |module| module.fail_joins(u32::MAX));

        m.set_enabled(true);
        assert_eq!(
            m.scheduler().period(Job::Reconnect),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            m.state(),
            LinkState::Reconnecting {
                period: Duration::from_secs(30)
            }
        );
    }

    #[test]
    fn test_enable_toggle_resets_backoff() {
        let mut m = manager_with(provisioned(), |module| module.fail_joins(u32::MAX));
        m.start_reconnect_mode();
        m.run_job(Job::Reconnect);
        m.run_job(Job::Reconnect);
        assert_eq!(m.reconnect_period(), Duration::from_secs(120));

        m.set_enabled(false);
        m.set_enabled(true);
        assert_eq!(m.reconnect_period(), Duration::from_secs(30));
        assert_eq!(
            m.scheduler().period(Job::Reconnect),
            Some(Duration::from_secs(30))
        );
    }

    // ==================== Health poll ====================

    #[test]
    fn test_health_poll_detects_loss() {
        let mut m = manager();
        m.connect().unwrap();
        m.module_mut().unwrap().drop_link();

        m.run_job(Job::HealthPoll);

        assert!(!m.is_connected());
        assert_eq!(
            m.events().last(),
            Some(&LinkEvent::ConnectionChanged(false))
        );
        assert!(!m.scheduler().is_scheduled(Job::HealthPoll));
        assert!(!m.scheduler().is_scheduled(Job::ReceivePump));
        assert_eq!(
            m.scheduler().period(Job::Reconnect),
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn test_health_poll_steady_state() {
        let mut m = manager();
        m.connect().unwrap();
        m.run_job(Job::HealthPoll);
        assert!(m.is_connected());
        assert_eq!(m.events().len(), 1);
        assert!(!m.scheduler().is_scheduled(Job::Reconnect));
    }

    #[test]
    fn test_is_connected_never_touches_module() {
        let mut m = manager();
        m.connect().unwrap();
        let checks = m.module().unwrap().counters().live_checks;
        for _ in 0..10 {
            assert!(m.is_connected());
        }
        assert_eq!(m.module().unwrap().counters().live_checks, checks);
    }

    // ==================== Reconnect ====================

    #[test]
    fn test_reconnect_backoff_doubles_and_caps() {
        let mut m = manager_with(provisioned(), |module| module.fail_joins(u32::MAX));
        m.start_reconnect_mode();
        assert_eq!(m.reconnect_period(), Duration::from_millis(30_000));

        m.run_job(Job::Reconnect);
        m.run_job(Job::Reconnect);
        assert_eq!(m.reconnect_period(), Duration::from_millis(120_000));
        assert_eq!(
            m.scheduler().period(Job::Reconnect),
            Some(Duration::from_millis(120_000))
        );

        for _ in 0..10 {
            m.run_job(Job::Reconnect);
        }
        assert_eq!(m.reconnect_period(), Duration::from_millis(3_600_000));
    }

    #[test]
    fn test_reconnect_success_cancels_itself() {
        let mut m = manager_with(provisioned(), |module| module.fail_joins(3));
        assert!(m.connect().is_err());
        m.start_reconnect_mode();

        m.run_job(Job::Reconnect);
        assert!(m.is_connected());
        assert!(!m.scheduler().is_scheduled(Job::Reconnect));
        assert_eq!(m.reconnect_period(), Duration::from_secs(30));
        assert!(m.scheduler().is_scheduled(Job::HealthPoll));
    }

    #[test]
    fn test_reconnect_when_already_connected() {
        let mut m = manager();
        m.connect().unwrap();
        m.start_reconnect_mode();
        m.run_job(Job::Reconnect);
        assert!(!m.scheduler().is_scheduled(Job::Reconnect));
        assert_eq!(m.module().unwrap().counters().joins, 1);
    }

    #[test]
    fn test_fresh_disconnect_resets_backoff() {
        let mut m = manager_with(provisioned(), |module| module.fail_joins(3 * 2));
        m.start_reconnect_mode();
        m.run_job(Job::Reconnect);
        m.run_job(Job::Reconnect);
        assert_eq!(m.reconnect_period(), Duration::from_secs(120));

        m.run_job(Job::Reconnect);
        assert!(m.is_connected());

        m.module_mut().unwrap().drop_link();
        m.run_job(Job::HealthPoll);
        assert_eq!(m.reconnect_period(), Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_at_ceiling_keeps_rescheduling() {
        let timing = LinkTiming {
            max_backoff: crate::config::MAX_BACKOFF_CEILING,
            ..Default::default()
        };
        let mut m: TestManager = ConnectionManager::new(
            provisioned(),
            timing,
            Box::new(|| {
                let mut module = SimulatedModule::new(EUI);
                module.fail_joins(u32::MAX);
                Ok(module)
            }),
            JobQueue::default(),
            Vec::new(),
            MemoryStore::new(),
        )
        .unwrap();

        m.start_reconnect_mode();
        for _ in 0..100 {
            m.run_job(Job::Reconnect);
        }
        assert_eq!(m.reconnect_period(), crate::config::MAX_BACKOFF_CEILING);
        assert_eq!(
            m.scheduler().period(Job::Reconnect),
            Some(crate::config::MAX_BACKOFF_CEILING)
        );
    }

    #[test]
    fn test_unbounded_backoff_rejected() {
        let timing = LinkTiming {
            max_backoff: Duration::MAX,
            ..Default::default()
        };
        let result: Result<TestManager, _> = ConnectionManager::new(
            provisioned(),
            timing,
            Box::new(|| Ok(SimulatedModule::new(EUI))),
            JobQueue::default(),
            Vec::new(),
            MemoryStore::new(),
        );
        assert!(matches!(result, Err(ConfigError::InvalidTiming(_))));
    }

    #[test]
    fn test_start_reconnect_mode_requires_enabled() {
        let mut config = provisioned();
        config.enabled = false;
        let mut m = manager_with(config, |_| {});
        m.start_reconnect_mode();
        assert!(m.scheduler().is_empty());
    }

    // ==================== Pump ====================

    #[test]
    fn test_pump_relays_downlink() {
        let mut m = manager();
        m.connect().unwrap();
        m.module_mut()
            .unwrap()
            .push_downlink(DownlinkPacket::new(APP_PORT, vec![0x01, 0xFF, 0x00, 0x00]));

        m.run_job(Job::ReceivePump);
        assert_eq!(
            m.events().last(),
            Some(&LinkEvent::MessageReceived(0x01FF_0000))
        );
    }

    #[test]
    fn test_pump_drops_invalid_downlinks() {
        let mut m = manager();
        m.connect().unwrap();
        let module = m.module_mut().unwrap();
        module.push_downlink(DownlinkPacket::new(APP_PORT, vec![1, 2, 3, 4, 5]));
        module.push_downlink(DownlinkPacket::new(7, vec![1]));

        m.pump();
        assert_eq!(m.events(), &[LinkEvent::ConnectionChanged(true)]);
    }

    #[test]
    fn test_pump_reports_send_status() {
        let mut m = manager();
        m.connect().unwrap();
        m.send_payload(&[5, 200]).unwrap();
        m.module_mut()
            .unwrap()
            .set_send_status(SendStatus::NotConnected);
        m.send_payload(&[6, 1]).unwrap();

        m.pump();
        assert_eq!(
            &m.events()[1..],
            &[LinkEvent::SendComplete(true), LinkEvent::SendComplete(false)]
        );
    }

    // ==================== Send ====================

    #[test]
    fn test_send_payload_fails_fast() {
        let mut m = manager();
        assert_eq!(m.send_payload(&[1, 2]), Err(SendError::NotConnected));

        m.connect().unwrap();
        assert_eq!(m.send_payload(&[]), Err(SendError::EmptyPayload));

        m.set_enabled(false);
        assert_eq!(m.send_payload(&[1, 2]), Err(SendError::Disabled));
    }

    #[test]
    fn test_send_payload_uses_app_port_unconfirmed() {
        let mut m = manager();
        m.connect().unwrap();
        m.send_payload(&[5, 200, 6]).unwrap();

        let sent = m.module().unwrap().sent();
        assert_eq!(
            sent,
            &[UplinkPacket {
                port: APP_PORT,
                ack: false,
                payload: vec![5, 200, 6]
            }]
        );
    }

    // ==================== Configuration ====================

    #[test]
    fn test_key_change_requires_restart() {
        let mut config = provisioned();
        config.module_configured = true;
        let mut m = manager_with(config, |_| {});

        m.set_app_key(SecretKey::new("00112233445566778899AABBCCDDEEFF").unwrap());
        assert!(!m.config().module_configured);
        assert_eq!(m.events(), &[LinkEvent::RestartRequired]);
        assert_eq!(m.store().saves(), 1);
    }

    #[test]
    fn test_unchanged_setting_is_noop() {
        let mut m = manager();
        m.set_app_eui(AppEui::default());
        m.set_region(Region::default());
        m.set_network_key(SecretKey::new(KEY).unwrap());
        assert!(m.events().is_empty());
        assert_eq!(m.store().saves(), 0);
    }

    #[test]
    fn test_region_change_requires_restart() {
        let mut m = manager();
        let other = match Region::default() {
            Region::Us915 => Region::Eu868,
            Region::Eu868 => Region::Us915,
        };
        m.set_region(other);
        assert_eq!(m.region_name(), other.name());
        assert_eq!(m.events(), &[LinkEvent::RestartRequired]);
    }

    #[test]
    fn test_class_change_is_live() {
        let mut m = manager();
        m.connect().unwrap();
        m.set_class(DeviceClass::A);

        assert_eq!(m.module().unwrap().settings().class, Some(DeviceClass::A));
        assert!(!m.events().contains(&LinkEvent::RestartRequired));
        assert!(m.config().module_configured);
    }

    #[test]
    fn test_persist_failure_is_not_fatal() {
        let mut store = MemoryStore::new();
        store.set_fail_saves(true);
        let mut m: TestManager = ConnectionManager::new(
            provisioned(),
            LinkTiming::default(),
            Box::new(|| Ok(SimulatedModule::new(EUI))),
            JobQueue::default(),
            Vec::new(),
            store,
        )
        .unwrap();
        m.connect().unwrap();
        assert!(m.is_connected());
    }

    // ==================== Reset ====================

    #[test]
    fn test_reset_module_reconfigures_and_reconnects() {
        let mut config = provisioned();
        config.module_configured = true;
        let mut m = manager_with(config, |_| {});
        m.connect().unwrap();

        m.reset_module().unwrap();

        let module = m.module().unwrap();
        assert_eq!(module.counters().resets, 1);
        assert_eq!(module.settings().app_key.as_deref(), Some(KEY));
        assert!(m.is_connected());
        assert!(m.config().module_configured);
        assert_eq!(
            m.events(),
            &[
                LinkEvent::ConnectionChanged(true),
                LinkEvent::ConnectionChanged(false),
                LinkEvent::ConnectionChanged(true)
            ]
        );
    }

    #[test]
    fn test_reset_module_failure_enters_reconnect() {
        let mut m = manager();
        m.connect().unwrap();
        m.module_mut().unwrap().fail_eui_reads(3);

        assert_eq!(
            m.reset_module(),
            Err(ConnectError::EuiUnavailable { attempts: 3 })
        );
        assert!(m.config().enabled);
        assert!(!m.scheduler().is_scheduled(Job::HealthPoll));
        assert_eq!(
            m.scheduler().period(Job::Reconnect),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            m.state(),
            LinkState::Reconnecting {
                period: Duration::from_secs(30)
            }
        );

        // EUI reads work again: the reconnect job brings the link back
        m.run_job(Job::Reconnect);
        assert!(m.is_connected());
        assert!(!m.scheduler().is_scheduled(Job::Reconnect));
    }

    #[test]
    fn test_reset_module_failure_while_disabled_stays_idle() {
        let mut m = manager();
        m.connect().unwrap();
        m.set_enabled(false);
        m.module_mut().unwrap().fail_begin(true);

        assert!(m.reset_module().is_err());
        assert!(m.scheduler().is_empty());
    }

    // ==================== Startup ====================

    #[test]
    fn test_delayed_startup_does_not_connect() {
        let mut m = manager();
        m.initialize(StartupMode::Delayed).unwrap();
        assert!(m.module().is_none());
        assert_eq!(m.state(), LinkState::Disconnected);
    }

    #[test]
    fn test_immediate_startup_connects() {
        let mut m = manager();
        m.initialize(StartupMode::Immediate).unwrap();
        assert!(m.is_connected());
    }

    #[test]
    fn test_immediate_startup_failure_enters_reconnect() {
        let mut m = manager_with(provisioned(), |module| module.fail_joins(u32::MAX));
        assert!(m.initialize(StartupMode::Immediate).is_err());
        assert!(m.scheduler().is_scheduled(Job::Reconnect));
    }

    // ==================== Tick ====================

    #[test]
    fn test_tick_runs_due_jobs() {
        let start = Instant::now();
        let mut m: TestManager = ConnectionManager::new(
            provisioned(),
            LinkTiming::default(),
            Box::new(|| Ok(SimulatedModule::new(EUI))),
            JobQueue::new(start),
            Vec::new(),
            MemoryStore::new(),
        )
        .unwrap();
        m.connect().unwrap();
        m.module_mut().unwrap().drop_link();

        assert_eq!(m.tick(start + Duration::from_secs(5)), 1);
        // Pump (due at 10s) runs before the health poll that notices the loss
        assert_eq!(m.tick(start + Duration::from_secs(15)), 2);
        assert!(!m.is_connected());
        assert!(m.scheduler().is_scheduled(Job::Reconnect));

        // Reconnect 30s after the loss succeeds
        assert_eq!(m.tick(start + Duration::from_secs(45)), 1);
        assert!(m.is_connected());
    }
}
