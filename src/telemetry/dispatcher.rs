//! Observation dispatch.
//!
//! On each log trigger the dispatcher walks the registered devices in
//! registration order, refreshes them and packs their enabled, tagged scalar
//! readings into uplink frames. Geolocation pairs go out aligned to the start
//! of a frame. Individual failures are logged and skipped; the pass always
//! ends with a flush.

use super::device::{ReadingValue, TelemetryDevice};
use crate::uplink::{PackError, Uplink, UplinkPacker, Value};
use log::{debug, warn};

/// Outcome of one observation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Readings handed to the packer.
    pub packed: usize,
    /// Readings skipped (disabled, untyped or non-scalar).
    pub skipped: usize,
    /// Readings the packer refused.
    pub failed: usize,
}

/// Routes device readings through an [`UplinkPacker`].
pub struct TelemetryDispatcher {
    devices: Vec<Box<dyn TelemetryDevice>>,
    packer: UplinkPacker,
}

impl Default for TelemetryDispatcher {
    fn default() -> Self {
        Self::new(UplinkPacker::default())
    }
}

impl TelemetryDispatcher {
    /// Create a dispatcher around `packer`.
    pub fn new(packer: UplinkPacker) -> Self {
        Self {
            devices: Vec::new(),
            packer,
        }
    }

    /// Add a device. A device whose name is already registered is ignored.
    ///
    /// Returns whether the device was added.
    pub fn register_device(&mut self, device: Box<dyn TelemetryDevice>) -> bool {
        if self.devices.iter().any(|d| d.name() == device.name()) {
            debug!("Device {} already registered", device.name());
            return false;
        }
        self.devices.push(device);
        true
    }

    /// Remove a device by name, returning it if it was registered.
    pub fn unregister_device(&mut self, name: &str) -> Option<Box<dyn TelemetryDevice>> {
        let index = self.devices.iter().position(|d| d.name() == name)?;
        Some(self.devices.remove(index))
    }

    /// Registered device names in registration order.
    pub fn device_names(&self) -> Vec<&str> {
        self.devices.iter().map(|d| d.name()).collect()
    }

    /// The packer.
    pub fn packer(&self) -> &UplinkPacker {
        &self.packer
    }

    /// Pack and send one observation from every device.
    ///
    /// Does nothing when the link is not ready.
    pub fn log_observation<U: Uplink + ?Sized>(&mut self, link: &mut U) -> DispatchReport {
        let mut report = DispatchReport::default();
        if !link.is_ready() {
            debug!("Uplink not ready; observation skipped");
            return report;
        }

        for device in self.devices.iter_mut() {
            device.refresh();

            for reading in device.outputs() {
                let Some(tag) = reading.tag.filter(|_| reading.enabled) else {
                    report.skipped += 1;
                    continue;
                };

                debug!(
                    "LoRa packing [{}::{}] type {} tag {:#04X}",
                    device.name(),
                    reading.name,
                    reading.value.type_name(),
                    tag
                );

                let result = match &reading.value {
                    ReadingValue::Coordinates { lat, lon } => {
                        pack_coordinates(&mut self.packer, link, tag, *lat, *lon)
                    }
                    value => match value.scalar() {
                        Some(scalar) => self.packer.encode(link, tag, scalar),
                        None => {
                            report.skipped += 1;
                            continue;
                        }
                    },
                };

                match result {
                    Ok(()) => report.packed += 1,
                    Err(e) => {
                        report.failed += 1;
                        warn!("LoRaWAN send failed for parameter {}: {}", reading.name, e);
                    }
                }
            }
        }

        if let Err(e) = self.packer.flush(link) {
            warn!("LoRaWAN flush failed: {}", e);
        }
        report
    }
}

/// Flush, then pack the pair so it starts a fresh frame.
fn pack_coordinates<U: Uplink + ?Sized>(
    packer: &mut UplinkPacker,
    link: &mut U,
    tag: u8,
    lat: f32,
    lon: f32,
) -> Result<(), PackError> {
    packer.flush(link)?;
    packer.encode(link, tag, Value::F32Pair(lat, lon))
}
