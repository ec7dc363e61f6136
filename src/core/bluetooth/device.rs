//! Discovered devices: one entry per advertising peripheral that passed the
//! scan filter, owning the peripheral wrapper once connected.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::bluetooth::error::DeviceSummary;
use crate::core::bluetooth::peripheral::Peripheral;
use crate::core::bluetooth::types::AdvertisementData;

/// An observed peripheral
#[derive(Debug)]
pub struct DiscoveryData {
    /// Platform-specific unique identifier for the device
    identifier: String,
    /// The most recent advertisement
    advertisement: AdvertisementData,
    /// The signal strength (RSSI) of the most recent sighting, in dBm
    rssi: i32,
    /// When the device was last seen advertising
    last_seen: DateTime<Utc>,
    /// Set between a connect request and its outcome
    connection_pending: bool,
    /// The connected peripheral, if any
    peripheral: Option<Peripheral>,
}

/// Serializable listing entry for a discovered device
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSnapshot {
    pub id: String,
    pub name: Option<String>,
    pub rssi: i32,
    pub is_connectable: bool,
    pub is_connected: bool,
    pub last_seen: DateTime<Utc>,
}

impl DiscoveryData {
    pub fn new(identifier: &str, advertisement: AdvertisementData, rssi: i32) -> Self {
        let last_seen = advertisement.timestamp.unwrap_or_else(Utc::now);
        Self {
            identifier: identifier.to_string(),
            advertisement,
            rssi,
            last_seen,
            connection_pending: false,
            peripheral: None,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn advertisement(&self) -> &AdvertisementData {
        &self.advertisement
    }

    pub fn name(&self) -> Option<&str> {
        self.advertisement.name()
    }

    pub fn rssi(&self) -> i32 {
        self.rssi
    }

    pub fn last_seen(&self) -> DateTime<Utc> {
        self.last_seen
    }

    pub fn is_connectable(&self) -> bool {
        self.advertisement.is_connectable
    }

    pub fn is_connected(&self) -> bool {
        self.peripheral.is_some()
    }

    pub fn connection_pending(&self) -> bool {
        self.connection_pending
    }

    pub(crate) fn set_connection_pending(&mut self, pending: bool) {
        self.connection_pending = pending;
    }

    /// Refreshes the advertisement and signal strength of a repeat sighting.
    pub(crate) fn update(&mut self, advertisement: AdvertisementData, rssi: i32) {
        self.last_seen = advertisement.timestamp.unwrap_or_else(Utc::now);
        self.advertisement = advertisement;
        self.rssi = rssi;
    }

    pub(crate) fn set_rssi(&mut self, rssi: i32) {
        self.rssi = rssi;
        if let Some(peripheral) = self.peripheral.as_mut() {
            peripheral.set_rssi(rssi);
        }
    }

    pub(crate) fn set_name(&mut self, name: Option<String>) {
        self.advertisement.local_name = name.clone();
        if let Some(peripheral) = self.peripheral.as_mut() {
            peripheral.set_name(name);
        }
    }

    pub fn peripheral(&self) -> Option<&Peripheral> {
        self.peripheral.as_ref()
    }

    pub(crate) fn peripheral_mut(&mut self) -> Option<&mut Peripheral> {
        self.peripheral.as_mut()
    }

    pub(crate) fn attach(&mut self, peripheral: Peripheral) {
        self.connection_pending = false;
        self.peripheral = Some(peripheral);
    }

    pub(crate) fn detach(&mut self) -> Option<Peripheral> {
        self.peripheral.take()
    }

    /// Identity snapshot carried by connection-timeout errors.
    pub fn summary(&self) -> DeviceSummary {
        DeviceSummary {
            identifier: self.identifier.clone(),
            name: self.name().map(str::to_string),
            rssi: self.rssi,
        }
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            id: self.identifier.clone(),
            name: self.name().map(str::to_string),
            rssi: self.rssi,
            is_connectable: self.is_connectable(),
            is_connected: self.is_connected(),
            last_seen: self.last_seen,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_refreshes_in_place() {
        let mut device = DiscoveryData::new("AA:BB", AdvertisementData::named("Thermo1", true), -55);
        device.update(AdvertisementData::named("Thermo2", false), -50);

        assert_eq!(device.identifier(), "AA:BB");
        assert_eq!(device.rssi(), -50);
        assert_eq!(device.name(), Some("Thermo2"));
        assert!(!device.is_connectable());
    }

    #[test]
    fn summary_carries_name_and_rssi() {
        let device = DiscoveryData::new("AA:BB", AdvertisementData::named("Thermo1", true), -55);
        assert_eq!(
            device.summary(),
            DeviceSummary {
                identifier: "AA:BB".into(),
                name: Some("Thermo1".into()),
                rssi: -55,
            }
        );
        assert_eq!(device.summary().to_string(), "AA:BB (Thermo1)");
    }

    #[test]
    fn attaching_a_peripheral_clears_the_pending_flag() {
        let mut device = DiscoveryData::new("AA:BB", AdvertisementData::default(), -55);
        device.set_connection_pending(true);
        device.attach(Peripheral::new("AA:BB", None, -55, Vec::new()));
        assert!(device.is_connected());
        assert!(!device.connection_pending());
        assert!(device.detach().is_some());
        assert!(!device.is_connected());
    }
}
