//! Simulated radio module.
//!
//! Behaves like a cooperative module that joins instantly. Failures are
//! scripted per operation so bring-up, join and send paths can be exercised
//! on the host without hardware. Pauses are recorded, not slept.
//!
//! # Example
//!
//! ```
//! use iot_node_lorawan::lorawan::{RadioModule, SimulatedModule};
//!
//! let mut module = SimulatedModule::new([0x00, 0x13, 0xA2, 0x00, 0x42, 0x01, 0xAB, 0xCD]);
//! module.fail_joins(2);
//! assert!(module.connect().is_err());
//! assert!(module.connect().is_err());
//! assert!(module.connect().is_ok());
//! assert!(module.is_connected());
//! ```

use super::module::{
    DeviceEui, DownlinkPacket, ModuleError, ModuleEvent, RadioModule, SendStatus, UplinkPacket,
};
use crate::config::{AppEui, DeviceClass, Region, SecretKey};
use std::collections::VecDeque;
use std::time::Duration;

/// Settings as written into the simulated module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimSettings {
    /// Application EUI.
    pub app_eui: Option<String>,
    /// Application key.
    pub app_key: Option<String>,
    /// Network key.
    pub network_key: Option<String>,
    /// Operating class.
    pub class: Option<DeviceClass>,
    /// Operating region.
    pub region: Option<Region>,
    /// API options.
    pub api_options: Option<u8>,
    /// `write_config` succeeded.
    pub written: bool,
    /// `apply_changes` succeeded.
    pub applied: bool,
}

/// Call counters for assertions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimCounters {
    /// `begin` calls.
    pub begins: u32,
    /// `reset` calls.
    pub resets: u32,
    /// `read_device_eui` calls.
    pub eui_reads: u32,
    /// `connect` calls.
    pub joins: u32,
    /// `disconnect` calls.
    pub disconnects: u32,
    /// `is_connected` calls.
    pub live_checks: u32,
}

/// Scriptable in-process radio module.
#[derive(Debug)]
pub struct SimulatedModule {
    eui: DeviceEui,
    linked: bool,
    fail_begin: bool,
    eui_failures: u32,
    join_failures: u32,
    reject_settings: bool,
    send_status: SendStatus,
    settings: SimSettings,
    counters: SimCounters,
    sent: Vec<UplinkPacket>,
    pending: VecDeque<ModuleEvent>,
    next_frame_id: u8,
    paused: Duration,
}

impl SimulatedModule {
    /// Create a module reporting `eui`.
    pub fn new(eui: [u8; 8]) -> Self {
        Self {
            eui: DeviceEui(eui),
            linked: false,
            fail_begin: false,
            eui_failures: 0,
            join_failures: 0,
            reject_settings: false,
            send_status: SendStatus::Delivered,
            settings: SimSettings::default(),
            counters: SimCounters::default(),
            sent: Vec::new(),
            pending: VecDeque::new(),
            next_frame_id: 1,
            paused: Duration::ZERO,
        }
    }

    /// Make `begin` fail.
    pub fn fail_begin(&mut self, fail: bool) {
        self.fail_begin = fail;
    }

    /// Fail the next `n` EUI reads.
    pub fn fail_eui_reads(&mut self, n: u32) {
        self.eui_failures = n;
    }

    /// Fail the next `n` joins (`u32::MAX` for always).
    pub fn fail_joins(&mut self, n: u32) {
        self.join_failures = n;
    }

    /// Reject every setting write.
    pub fn reject_settings(&mut self, reject: bool) {
        self.reject_settings = reject;
    }

    /// Status reported for subsequent sends.
    pub fn set_send_status(&mut self, status: SendStatus) {
        self.send_status = status;
    }

    /// Simulate the network dropping the device.
    pub fn drop_link(&mut self) {
        self.linked = false;
    }

    /// Queue a downlink for the next `process` call.
    pub fn push_downlink(&mut self, packet: DownlinkPacket) {
        self.pending.push_back(ModuleEvent::Received(packet));
    }

    /// Uplinks queued so far.
    pub fn sent(&self) -> &[UplinkPacket] {
        &self.sent
    }

    /// Take the queued uplinks.
    pub fn take_sent(&mut self) -> Vec<UplinkPacket> {
        std::mem::take(&mut self.sent)
    }

    /// Settings written so far.
    pub fn settings(&self) -> &SimSettings {
        &self.settings
    }

    /// Call counters.
    pub fn counters(&self) -> SimCounters {
        self.counters
    }

    /// Total time spent in `pause`.
    pub fn paused(&self) -> Duration {
        self.paused
    }

    fn write<T>(
        &mut self,
        what: &'static str,
        apply: impl FnOnce(&mut SimSettings) -> T,
    ) -> Result<T, ModuleError> {
        if self.reject_settings {
            return Err(ModuleError::Rejected(what));
        }
        Ok(apply(&mut self.settings))
    }
}

impl RadioModule for SimulatedModule {
    fn begin(&mut self) -> Result<(), ModuleError> {
        self.counters.begins += 1;
        if self.fail_begin {
            return Err(ModuleError::Timeout);
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<(), ModuleError> {
        self.counters.resets += 1;
        self.linked = false;
        Ok(())
    }

    fn read_device_eui(&mut self) -> Result<DeviceEui, ModuleError> {
        self.counters.eui_reads += 1;
        if self.eui_failures > 0 {
            self.eui_failures -= 1;
            return Err(ModuleError::Busy);
        }
        Ok(self.eui)
    }

    fn set_app_eui(&mut self, eui: &AppEui) -> Result<(), ModuleError> {
        let value = eui.as_str().to_string();
        self.write("app EUI", |s| s.app_eui = Some(value))
    }

    fn set_app_key(&mut self, key: &SecretKey) -> Result<(), ModuleError> {
        let value = key.expose().to_string();
        self.write("app key", |s| s.app_key = Some(value))
    }

    fn set_network_key(&mut self, key: &SecretKey) -> Result<(), ModuleError> {
        let value = key.expose().to_string();
        self.write("network key", |s| s.network_key = Some(value))
    }

    fn set_class(&mut self, class: DeviceClass) -> Result<(), ModuleError> {
        self.write("class", |s| s.class = Some(class))
    }

    fn set_region(&mut self, region: Region) -> Result<(), ModuleError> {
        self.write("region", |s| s.region = Some(region))
    }

    fn set_api_options(&mut self, options: u8) -> Result<(), ModuleError> {
        self.write("API options", |s| s.api_options = Some(options))
    }

    fn write_config(&mut self) -> Result<(), ModuleError> {
        self.write("config write", |s| s.written = true)
    }

    fn apply_changes(&mut self) -> Result<(), ModuleError> {
        self.write("apply changes", |s| s.applied = true)
    }

    fn connect(&mut self) -> Result<(), ModuleError> {
        self.counters.joins += 1;
        if self.join_failures > 0 {
            if self.join_failures != u32::MAX {
                self.join_failures -= 1;
            }
            return Err(ModuleError::JoinFailed);
        }
        self.linked = true;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), ModuleError> {
        self.counters.disconnects += 1;
        self.linked = false;
        Ok(())
    }

    fn is_connected(&mut self) -> bool {
        self.counters.live_checks += 1;
        self.linked
    }

    fn send(&mut self, packet: &UplinkPacket) -> Result<u8, ModuleError> {
        if !self.linked {
            return Err(ModuleError::Rejected("send while not joined"));
        }
        let frame_id = self.next_frame_id;
        self.next_frame_id = self.next_frame_id.wrapping_add(1).max(1);
        self.sent.push(packet.clone());
        self.pending.push_back(ModuleEvent::SendComplete {
            frame_id,
            status: self.send_status,
        });
        Ok(frame_id)
    }

    fn process(&mut self) -> Vec<ModuleEvent> {
        self.pending.drain(..).collect()
    }

    fn pause(&mut self, duration: Duration) {
        self.paused += duration;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lorawan::APP_PORT;

    const EUI: [u8; 8] = [1, 2, 3, 4, 5, 6, 7, 8];

    #[test]
    fn test_eui_failures_then_success() {
        let mut module = SimulatedModule::new(EUI);
        module.fail_eui_reads(2);
        assert_eq!(module.read_device_eui(), Err(ModuleError::Busy));
        assert_eq!(module.read_device_eui(), Err(ModuleError::Busy));
        assert_eq!(module.read_device_eui(), Ok(DeviceEui(EUI)));
        assert_eq!(module.counters().eui_reads, 3);
    }

    #[test]
    fn test_join_always_fails() {
        let mut module = SimulatedModule::new(EUI);
        module.fail_joins(u32::MAX);
        for _ in 0..10 {
            assert_eq!(module.connect(), Err(ModuleError::JoinFailed));
        }
        assert!(!module.is_connected());
    }

    #[test]
    fn test_send_queues_completion() {
        let mut module = SimulatedModule::new(EUI);
        module.connect().unwrap();
        let packet = UplinkPacket {
            port: APP_PORT,
            ack: false,
            payload: vec![5, 200],
        };
        let id = module.send(&packet).unwrap();
        assert_eq!(module.sent(), &[packet]);
        assert_eq!(
            module.process(),
            vec![ModuleEvent::SendComplete {
                frame_id: id,
                status: SendStatus::Delivered
            }]
        );
        assert!(module.process().is_empty());
    }

    #[test]
    fn test_send_requires_link() {
        let mut module = SimulatedModule::new(EUI);
        assert!(module.send(&UplinkPacket {
            port: APP_PORT,
            ack: false,
            payload: vec![1],
        })
        .is_err());
    }

    #[test]
    fn test_rejected_settings() {
        let mut module = SimulatedModule::new(EUI);
        module.reject_settings(true);
        assert!(matches!(
            module.set_class(DeviceClass::A),
            Err(ModuleError::Rejected(_))
        ));
        assert_eq!(module.settings().class, None);
    }

    #[test]
    fn test_pause_is_recorded() {
        let mut module = SimulatedModule::new(EUI);
        module.pause(Duration::from_millis(100));
        module.pause(Duration::from_millis(200));
        assert_eq!(module.paused(), Duration::from_millis(300));
    }
}
