//! Host-based LoRaWAN sensor node for development and testing.
//!
//! Runs the connection manager and telemetry dispatcher against a simulated
//! radio module:
//! - Configuration is loaded from `~/.iot-node-lorawan/lorawan.json`
//! - A synthetic sensor is sampled every observation interval
//! - Link events are logged as they happen
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin host-node
//! ```
//!
//! Keys can be supplied with `LORAWAN_APP_KEY` and `LORAWAN_NETWORK_KEY`
//! (32 hex digits each). `RUST_LOG=debug` shows the packed records.

use iot_node_lorawan::config::{
    ConfigStore, FileStore, LinkConfig, LinkTiming, SecretKey, StartupMode,
};
use iot_node_lorawan::lorawan::{
    ConnectionManager, DownlinkPacket, JobQueue, LinkEvent, SimulatedModule, APP_PORT,
};
use iot_node_lorawan::telemetry::{Reading, ReadingValue, TelemetryDevice, TelemetryDispatcher};
use log::{error, info, warn};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Device EUI reported by the simulated module.
const DEVICE_EUI: [u8; 8] = [0x00, 0x13, 0xA2, 0x00, 0x42, 0x01, 0xAB, 0xCD];

/// Key used when none is configured. Only meaningful for the simulated module.
const DEMO_KEY: &str = "CD32AAB41C54175E9060D86F3A8B7F48";

/// How often due jobs are run.
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// How often an observation is logged.
const OBSERVATION_INTERVAL: Duration = Duration::from_secs(60);

/// Every Nth observation the simulated network answers with a downlink.
const DOWNLINK_EVERY: u32 = 5;

/// Synthetic environmental sensor with a GNSS fix.
struct SyntheticSensor {
    samples: u32,
}

impl TelemetryDevice for SyntheticSensor {
    fn name(&self) -> &str {
        "Synthetic Sensor"
    }

    fn refresh(&mut self) {
        self.samples = self.samples.wrapping_add(1);
    }

    fn outputs(&self) -> Vec<Reading> {
        let step = (self.samples % 20) as f64;
        vec![
            Reading::new("Temperature", 0x01, ReadingValue::F64(20.0 + step * 0.25)),
            Reading::new("Humidity", 0x02, ReadingValue::U8(40 + (self.samples % 10) as u8)),
            Reading::new("Battery", 0x03, ReadingValue::U16(3700)),
            Reading::new("Samples", 0x04, ReadingValue::U32(self.samples)),
            Reading::new(
                "Location",
                0x05,
                ReadingValue::Coordinates {
                    lat: 47.6062,
                    lon: -122.3321,
                },
            ),
        ]
    }
}

fn key_from_env(var: &str) -> Option<SecretKey> {
    let value = std::env::var(var).ok()?;
    match SecretKey::new(&value) {
        Ok(key) => Some(key),
        Err(e) => {
            warn!("Ignoring {}: {}", var, e);
            None
        }
    }
}

fn load_config(store: &FileStore) -> LinkConfig {
    let mut config = match store.load() {
        Ok(Some(config)) => {
            info!("Loaded configuration from {}", store.path().display());
            config
        }
        Ok(None) => {
            info!("No stored configuration, using defaults");
            LinkConfig::default()
        }
        Err(e) => {
            warn!("Failed to load configuration: {}", e);
            LinkConfig::default()
        }
    };

    if let Some(key) = key_from_env("LORAWAN_APP_KEY") {
        config.app_key = Some(key);
        config.module_configured = false;
    }
    if let Some(key) = key_from_env("LORAWAN_NETWORK_KEY") {
        config.network_key = Some(key);
        config.module_configured = false;
    }
    if !config.has_credentials() {
        warn!("No LoRaWAN keys configured, using the demo key");
        if let Ok(key) = SecretKey::new(DEMO_KEY) {
            config.app_key.get_or_insert_with(|| key.clone());
            config.network_key.get_or_insert(key);
        }
    }
    config
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("=== IoT Node LoRaWAN host node starting ===");

    let store = match FileStore::at_default_path() {
        Ok(store) => store,
        Err(e) => {
            error!("Cannot locate the configuration file: {}", e);
            std::process::exit(1);
        }
    };
    let config = load_config(&store);

    let (event_tx, mut event_rx) = broadcast::channel(32);

    let mut manager = match ConnectionManager::new(
        config,
        LinkTiming::default(),
        Box::new(|| Ok(SimulatedModule::new(DEVICE_EUI))),
        JobQueue::default(),
        event_tx,
        store,
    ) {
        Ok(manager) => manager,
        Err(e) => {
            error!("Invalid link configuration: {}", e);
            std::process::exit(1);
        }
    };

    let mut dispatcher = TelemetryDispatcher::default();
    dispatcher.register_device(Box::new(SyntheticSensor { samples: 0 }));

    let cancel = CancellationToken::new();

    // Log link events
    let event_cancel = cancel.clone();
    let event_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = event_cancel.cancelled() => break,
                result = event_rx.recv() => match result {
                    Ok(LinkEvent::ConnectionChanged(true)) => info!("Event: connected"),
                    Ok(LinkEvent::ConnectionChanged(false)) => warn!("Event: disconnected"),
                    Ok(LinkEvent::SendComplete(ok)) => {
                        info!("Event: send {}", if ok { "complete" } else { "failed" })
                    }
                    Ok(LinkEvent::MessageReceived(value)) => {
                        info!("Event: downlink 0x{:08X}", value)
                    }
                    Ok(LinkEvent::RestartRequired) => warn!("Event: restart required"),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Event log lagged, {} events dropped", n)
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    });

    // Ctrl+C stops the main loop
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down...");
            signal_cancel.cancel();
        }
    });

    if let Err(e) = manager.initialize(StartupMode::Immediate) {
        warn!("Initial connect failed: {}", e);
    }
    if let Some(eui) = manager.device_eui() {
        info!("Device EUI: {}", eui);
    }
    info!(
        "Region: {}, state: {}",
        manager.region_name(),
        manager.state()
    );

    let mut tick = tokio::time::interval(TICK_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut observe = tokio::time::interval(OBSERVATION_INTERVAL);
    observe.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    observe.tick().await; // Skip first

    let mut observations = 0u32;

    info!("Entering main loop (Ctrl+C to exit)...");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            _ = tick.tick() => {
                manager.tick(Instant::now());
            }

            _ = observe.tick() => {
                let report = dispatcher.log_observation(&mut manager);
                info!(
                    "Observation: {} packed, {} skipped, {} failed ({})",
                    report.packed,
                    report.skipped,
                    report.failed,
                    manager.state()
                );

                observations += 1;
                if observations % DOWNLINK_EVERY == 0 {
                    if let Some(module) = manager.module_mut() {
                        module.push_downlink(DownlinkPacket::new(
                            APP_PORT,
                            vec![0x01, 0xFF, 0x00, 0x80],
                        ));
                    }
                }
            }
        }
    }

    manager.disconnect();
    if let Err(e) = event_task.await {
        error!("Event task error: {}", e);
    }

    info!("Shutdown complete");
}
