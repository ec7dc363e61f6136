//! Central manager: the root of the GATT tree
//!
//! Owns the staged devices (every advertiser that passed the scan filter,
//! each owning its peripheral wrapper once connected) and the committed
//! collection (identifiers of connected peripherals whose whole tree has
//! resolved at least once). Hardware results enter through
//! [`CentralManager::handle_event`]; requests leave through the
//! [`CentralBackend`]; everything the application needs to know leaves
//! through the [`CentralDelegate`].
//!
//! Discovery at each level stages all children before cascading into any of
//! them, and a parent is promoted only when its last staged child is added.
//! This relies on events being handled one at a time, in hardware order.

use chrono::Utc;
use log::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::config::ScanConfig;
use crate::core::bluetooth::characteristic::Characteristic;
use crate::core::bluetooth::commands::CentralBackend;
use crate::core::bluetooth::descriptor::Descriptor;
use crate::core::bluetooth::device::{DeviceSnapshot, DiscoveryData};
use crate::core::bluetooth::error::GattError;
use crate::core::bluetooth::events::{CentralEvent, PlatformResult};
use crate::core::bluetooth::notification::CentralDelegate;
use crate::core::bluetooth::peripheral::{Peripheral, PeripheralSnapshot};
use crate::core::bluetooth::registry::Registry;
use crate::core::bluetooth::scanner::ScanFilter;
use crate::core::bluetooth::service::Service;
use crate::core::bluetooth::types::{
    AdapterState, AdvertisementData, AttributeHandle, RawCharacteristic, RawDescriptor, RawService,
    WriteType,
};

/// What a service promotion means for the rest of the tree.
struct Promotion {
    service_changed: bool,
    peripheral_resolved: bool,
}

pub struct CentralManager<B: CentralBackend> {
    backend: B,
    registry: Registry,
    config: ScanConfig,
    delegate: Option<Box<dyn CentralDelegate>>,
    stage: Vec<DiscoveryData>,
    peripherals: Vec<String>,
    ignored: Vec<String>,
    adapter_state: AdapterState,
    scan_requested: bool,
    scanning: bool,
}

impl<B: CentralBackend> CentralManager<B> {
    pub fn new(backend: B, registry: Registry, config: ScanConfig) -> Self {
        Self {
            backend,
            registry,
            config,
            delegate: None,
            stage: Vec::new(),
            peripherals: Vec::new(),
            ignored: Vec::new(),
            adapter_state: AdapterState::Unknown,
            scan_requested: false,
            scanning: false,
        }
    }

    pub fn with_delegate(mut self, delegate: impl CentralDelegate + 'static) -> Self {
        self.delegate = Some(Box::new(delegate));
        self
    }

    pub fn set_delegate(&mut self, delegate: Option<Box<dyn CentralDelegate>>) {
        self.delegate = delegate;
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Registers additional profiles. Affects elements discovered afterwards.
    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Replaces the scan configuration, restarting an active scan so the new
    /// service filter applies.
    pub fn set_config(&mut self, config: ScanConfig) {
        self.config = config;
        if self.scanning {
            self.halt_scan();
            if let Err(e) = self.begin_scan() {
                self.report_error(e, None);
            }
        }
    }

    pub fn adapter_state(&self) -> AdapterState {
        self.adapter_state
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    /// Every staged device, in order of first sighting.
    pub fn devices(&self) -> &[DiscoveryData] {
        &self.stage
    }

    pub fn device(&self, identifier: &str) -> Option<&DiscoveryData> {
        self.stage.iter().find(|d| d.identifier() == identifier)
    }

    /// Committed peripherals, in the order they resolved.
    pub fn peripherals(&self) -> impl Iterator<Item = &Peripheral> {
        self.peripherals.iter().filter_map(|id| self.connected_peripheral(id))
    }

    /// A committed peripheral.
    pub fn peripheral(&self, identifier: &str) -> Option<&Peripheral> {
        if self.peripherals.iter().any(|id| id == identifier) {
            self.connected_peripheral(identifier)
        } else {
            None
        }
    }

    /// A connected peripheral, whether or not its tree has resolved.
    pub fn connected_peripheral(&self, identifier: &str) -> Option<&Peripheral> {
        self.device(identifier).and_then(DiscoveryData::peripheral)
    }

    pub fn ignored(&self) -> &[String] {
        &self.ignored
    }

    pub fn device_snapshots(&self) -> Vec<DeviceSnapshot> {
        self.stage.iter().map(DiscoveryData::snapshot).collect()
    }

    pub fn snapshot(&self, identifier: &str) -> Option<PeripheralSnapshot> {
        self.peripheral(identifier).map(Peripheral::snapshot)
    }

    pub fn snapshots(&self) -> Vec<PeripheralSnapshot> {
        self.peripherals().map(Peripheral::snapshot).collect()
    }

    /// Starts scanning with the configured service filter. While the adapter
    /// is not powered on the request is remembered and honoured once it is.
    pub fn start_scanning(&mut self) -> Result<(), GattError> {
        self.scan_requested = true;
        if self.scanning {
            debug!("Already scanning");
            return Ok(());
        }
        if self.adapter_state != AdapterState::PoweredOn {
            info!("Adapter is {:?}, scan will start once powered on", self.adapter_state);
            return Ok(());
        }
        self.begin_scan()
    }

    pub fn stop_scanning(&mut self) {
        self.scan_requested = false;
        self.halt_scan();
    }

    fn begin_scan(&mut self) -> Result<(), GattError> {
        let services = self.config.service_filter();
        self.backend.start_scan(&services)?;
        self.scanning = true;
        info!("Scanning started (services: {:?})", services);
        Ok(())
    }

    fn halt_scan(&mut self) {
        if !self.scanning {
            return;
        }
        self.scanning = false;
        info!("Scanning stopped");
        if let Err(e) = self.backend.stop_scan() {
            self.report_error(e.into(), None);
        }
    }

    pub fn connect(&mut self, identifier: &str) -> Result<(), GattError> {
        let Some(device) = self.stage.iter_mut().find(|d| d.identifier() == identifier) else {
            return Err(unknown_peripheral(identifier));
        };
        if device.is_connected() {
            debug!("{} is already connected", identifier);
            return Ok(());
        }
        info!("Connecting to {}", identifier);
        device.set_connection_pending(true);
        if let Err(e) = self.backend.connect(identifier) {
            device.set_connection_pending(false);
            return Err(GattError::peripheral(identifier, Some(e.into())));
        }
        Ok(())
    }

    /// Disconnects, or cancels a pending connection. The resulting
    /// disconnect is not reported as unexpected.
    pub fn disconnect(&mut self, identifier: &str) -> Result<(), GattError> {
        let Some(device) = self.stage.iter_mut().find(|d| d.identifier() == identifier) else {
            return Err(unknown_peripheral(identifier));
        };
        if let Some(peripheral) = device.peripheral_mut() {
            peripheral.request_disconnection();
        } else if device.connection_pending() {
            device.set_connection_pending(false);
        } else {
            debug!("{} is not connected", identifier);
            return Ok(());
        }
        info!("Disconnecting from {}", identifier);
        self.backend
            .disconnect(identifier)
            .map_err(|e| GattError::peripheral(identifier, Some(e.into())))
    }

    /// Abandons a pending connection on behalf of whoever timed it out, and
    /// reports a connection timeout carrying the device summary.
    pub fn report_connection_timeout(&mut self, identifier: &str) -> Result<(), GattError> {
        let Some(device) = self.stage.iter_mut().find(|d| d.identifier() == identifier) else {
            return Err(unknown_peripheral(identifier));
        };
        device.set_connection_pending(false);
        if let Some(peripheral) = device.peripheral_mut() {
            peripheral.request_disconnection();
        }
        let summary = device.summary();
        warn!("Connection to {} timed out", summary);
        self.cancel_connection(identifier);
        self.report_error(GattError::ConnectionTimeout(Box::new(summary)), Some(identifier));
        Ok(())
    }

    /// Hides a peripheral from future scans and drops its staged entry unless
    /// it is connected.
    pub fn ignore(&mut self, identifier: &str) {
        if !self.ignored.iter().any(|id| id == identifier) {
            info!("Ignoring {}", identifier);
            self.ignored.push(identifier.to_string());
        }
        if let Some(index) = self
            .stage
            .iter()
            .position(|d| d.identifier() == identifier && !d.is_connected())
        {
            let device = self.stage.remove(index);
            if device.connection_pending() {
                self.cancel_connection(identifier);
            }
        }
        self.notify(|d| d.updated());
    }

    pub fn clear_ignored(&mut self) {
        self.ignored.clear();
        self.notify(|d| d.updated());
    }

    /// Forgets every device, disconnecting the connected ones and cancelling
    /// pending connections.
    pub fn start_over(&mut self) {
        info!("Forgetting all {} devices", self.stage.len());
        let mut errors = Vec::new();
        for device in std::mem::take(&mut self.stage) {
            let identifier = device.identifier().to_string();
            if device.is_connected() {
                self.notify(|d| d.peripheral_will_disconnect(&identifier));
            } else if !device.connection_pending() {
                continue;
            }
            if let Err(e) = self.backend.disconnect(&identifier) {
                errors.push(GattError::peripheral(identifier.clone(), Some(e.into())));
            }
        }
        self.peripherals.clear();
        for error in errors {
            self.report_error(error, None);
        }
        self.notify(|d| d.updated());
    }

    /// Rediscovers the whole tree of a connected peripheral, restricted to
    /// `filter` if given, else to the configured service criteria.
    pub fn start_over_peripheral(&mut self, identifier: &str, filter: Option<Vec<Uuid>>) -> Result<(), GattError> {
        let filter = filter.unwrap_or_else(|| self.config.service_filter());
        let peripheral =
            find_peripheral_mut(&mut self.stage, identifier).ok_or_else(|| not_connected(identifier))?;
        peripheral.start_over(filter, &mut self.backend)?;
        self.notify(|d| d.updated());
        Ok(())
    }

    pub fn start_over_service(&mut self, identifier: &str, service: AttributeHandle) -> Result<(), GattError> {
        let peripheral =
            find_peripheral_mut(&mut self.stage, identifier).ok_or_else(|| not_connected(identifier))?;
        if !peripheral.restage_service(service) {
            return Err(unknown_attribute(identifier, service));
        }
        if let Some(service) = peripheral.service_mut(service) {
            service
                .start_over(&mut self.backend)
                .map_err(|e| GattError::peripheral(identifier, Some(e)))?;
        }
        self.notify(|d| d.updated());
        Ok(())
    }

    pub fn start_over_characteristic(
        &mut self,
        identifier: &str,
        characteristic: AttributeHandle,
    ) -> Result<(), GattError> {
        let peripheral =
            find_peripheral_mut(&mut self.stage, identifier).ok_or_else(|| not_connected(identifier))?;
        let owner = peripheral
            .characteristic_owner(characteristic)
            .ok_or_else(|| unknown_attribute(identifier, characteristic))?;
        peripheral.restage_service(owner);
        if let Some(service) = peripheral.service_mut(owner) {
            service.restage_characteristic(characteristic);
            let service_id = service.id();
            if let Some(target) = service.staged_characteristic_mut(characteristic) {
                target
                    .start_over(identifier, &mut self.backend)
                    .map_err(|e| {
                        GattError::peripheral(identifier, Some(GattError::service(service_id, Some(e))))
                    })?;
            }
        }
        self.notify(|d| d.updated());
        Ok(())
    }

    pub fn read_characteristic(&mut self, identifier: &str, characteristic: AttributeHandle) -> Result<(), GattError> {
        let (service, target) = locate_characteristic(&self.stage, identifier, characteristic)?;
        target
            .read_value(identifier, &mut self.backend)
            .map_err(|e| wrap_service(identifier, service, e))
    }

    pub fn write_characteristic(
        &mut self,
        identifier: &str,
        characteristic: AttributeHandle,
        data: &[u8],
        write_type: WriteType,
    ) -> Result<(), GattError> {
        let (service, target) = locate_characteristic(&self.stage, identifier, characteristic)?;
        target
            .write_value(identifier, data, write_type, &mut self.backend)
            .map_err(|e| wrap_service(identifier, service, e))
    }

    pub fn set_notify(&mut self, identifier: &str, characteristic: AttributeHandle, enabled: bool) -> Result<(), GattError> {
        let (service, target) = locate_characteristic(&self.stage, identifier, characteristic)?;
        target
            .set_notify(identifier, enabled, &mut self.backend)
            .map_err(|e| wrap_service(identifier, service, e))
    }

    pub fn read_descriptor(&mut self, identifier: &str, descriptor: AttributeHandle) -> Result<(), GattError> {
        let (service, characteristic, target) = locate_descriptor(&self.stage, identifier, descriptor)?;
        target
            .read_value(identifier, &mut self.backend)
            .map_err(|e| wrap_characteristic(identifier, service, characteristic, e))
    }

    pub fn write_descriptor(&mut self, identifier: &str, descriptor: AttributeHandle, data: &[u8]) -> Result<(), GattError> {
        let (service, characteristic, target) = locate_descriptor(&self.stage, identifier, descriptor)?;
        target
            .write_value(identifier, data, &mut self.backend)
            .map_err(|e| wrap_characteristic(identifier, service, characteristic, e))
    }

    pub fn read_rssi(&mut self, identifier: &str) -> Result<(), GattError> {
        if self.connected_peripheral(identifier).is_none() {
            return Err(not_connected(identifier));
        }
        self.backend
            .read_rssi(identifier)
            .map_err(|e| GattError::peripheral(identifier, Some(e.into())))
    }

    /// The single funnel every error passes through on its way to the
    /// delegate.
    pub fn report_error(&mut self, error: GattError, source: Option<&str>) {
        error!("{}", error.layered_description().join(" > "));
        self.notify(|d| d.handle_error(&error, source));
    }

    fn notify(&mut self, f: impl FnOnce(&mut dyn CentralDelegate)) {
        if let Some(delegate) = self.delegate.as_mut() {
            f(delegate.as_mut());
        }
    }

    /// Applies one hardware event. Must be called serially, in the order the
    /// hardware produced the events.
    pub fn handle_event(&mut self, event: CentralEvent) {
        trace!("Event: {:?}", event);
        match event {
            CentralEvent::AdapterStateChanged(state) => self.on_adapter_state(state),
            CentralEvent::PeripheralDiscovered {
                identifier,
                advertisement,
                rssi,
            } => self.on_discovered(identifier, advertisement, rssi),
            CentralEvent::PeripheralConnected { identifier } => self.on_connected(identifier),
            CentralEvent::PeripheralConnectFailed { identifier, error } => {
                self.on_connect_failed(identifier, error)
            }
            CentralEvent::PeripheralDisconnected { identifier, error } => {
                self.on_disconnected(identifier, error)
            }
            CentralEvent::ServicesDiscovered {
                identifier,
                services,
            } => self.on_services_discovered(identifier, services),
            CentralEvent::CharacteristicsDiscovered {
                identifier,
                service,
                characteristics,
            } => self.on_characteristics_discovered(identifier, service, characteristics),
            CentralEvent::DescriptorsDiscovered {
                identifier,
                characteristic,
                descriptors,
            } => self.on_descriptors_discovered(identifier, characteristic, descriptors),
            CentralEvent::CharacteristicValueUpdated {
                identifier,
                characteristic,
                value,
            } => self.on_characteristic_value(identifier, characteristic, value),
            CentralEvent::DescriptorValueUpdated {
                identifier,
                descriptor,
                value,
            } => self.on_descriptor_value(identifier, descriptor, value),
            CentralEvent::CharacteristicWritten {
                identifier,
                characteristic,
                result,
            } => match result {
                Ok(()) => self.notify(|d| d.characteristic_write_complete(&identifier, characteristic)),
                Err(text) => {
                    let error = self.characteristic_error(&identifier, characteristic, GattError::platform(text));
                    self.report_error(error, Some(&identifier));
                }
            },
            CentralEvent::DescriptorWritten {
                identifier,
                descriptor,
                result,
            } => match result {
                Ok(()) => self.notify(|d| d.descriptor_write_complete(&identifier, descriptor)),
                Err(text) => {
                    let error = self.descriptor_error(&identifier, descriptor, GattError::platform(text));
                    self.report_error(error, Some(&identifier));
                }
            },
            CentralEvent::NotificationStateChanged {
                identifier,
                characteristic,
                result,
            } => self.on_notification_state(identifier, characteristic, result),
            CentralEvent::RssiRead { identifier, rssi } => self.on_rssi(identifier, rssi),
            CentralEvent::ServicesInvalidated {
                identifier,
                services,
            } => self.on_services_invalidated(identifier, services),
            CentralEvent::ReadyToWriteWithoutResponse { identifier } => {
                self.notify(|d| d.peripheral_ready_for_write(&identifier))
            }
            CentralEvent::NameChanged { identifier, name } => {
                let Some(device) = self.stage.iter_mut().find(|d| d.identifier() == identifier) else {
                    debug!("Name change for unknown device {}", identifier);
                    return;
                };
                device.set_name(name);
                self.notify(|d| {
                    d.peripheral_info_changed(&identifier);
                    d.updated();
                });
            }
        }
    }

    fn on_adapter_state(&mut self, state: AdapterState) {
        info!("Adapter state changed to {:?}", state);
        self.adapter_state = state;
        match state {
            AdapterState::PoweredOn => {
                self.notify(|d| d.powered_on());
                if self.scan_requested && !self.scanning {
                    if let Err(e) = self.begin_scan() {
                        self.report_error(e, None);
                    }
                }
            }
            AdapterState::Unauthorized => {
                self.halt_scan();
                self.report_error(GattError::Unauthorized, None);
            }
            AdapterState::Unrecognized(code) => {
                self.halt_scan();
                let error = GattError::internal(
                    "adapter",
                    Some(GattError::platform(format!("unrecognized adapter state {}", code))),
                );
                self.report_error(error, None);
            }
            AdapterState::Unknown
            | AdapterState::Resetting
            | AdapterState::Unsupported
            | AdapterState::PoweredOff => self.halt_scan(),
        }
    }

    fn on_discovered(&mut self, identifier: String, mut advertisement: AdvertisementData, rssi: i32) {
        let filter = ScanFilter::new(&self.config, &self.ignored);
        if let Err(reason) = filter.check(&identifier, &advertisement, rssi) {
            debug!("Skipping {}: {}", identifier, reason);
            return;
        }
        if advertisement.timestamp.is_none() {
            advertisement.timestamp = Some(Utc::now());
        }

        match self.stage.iter_mut().find(|d| d.identifier() == identifier) {
            Some(device) => {
                trace!("Updating {} at {} dBm", identifier, rssi);
                device.update(advertisement, rssi);
            }
            None => {
                info!(
                    "Discovered {} ({}) at {} dBm",
                    identifier,
                    advertisement.name().unwrap_or("unnamed"),
                    rssi
                );
                self.stage.push(DiscoveryData::new(&identifier, advertisement, rssi));
            }
        }
        self.notify(|d| d.updated());
    }

    fn on_connected(&mut self, identifier: String) {
        let service_filter = self.config.service_filter();
        let characteristic_filter = self.config.characteristic_filter();
        let Some(device) = self.stage.iter_mut().find(|d| d.identifier() == identifier) else {
            warn!("Connected to forgotten device {}, disconnecting", identifier);
            self.cancel_connection(&identifier);
            return;
        };
        if device.is_connected() {
            debug!("{} is already connected, ignoring", identifier);
            return;
        }

        info!("Connected to {}", identifier);
        let name = device.name().map(str::to_string);
        let rssi = device.rssi();
        device.attach(Peripheral::new(&identifier, name, rssi, characteristic_filter));
        let result = match device.peripheral_mut() {
            Some(peripheral) => peripheral.start_over(service_filter, &mut self.backend),
            None => Ok(()),
        };
        if let Err(e) = result {
            self.report_error(e, Some(&identifier));
        }
        self.notify(|d| d.updated());
    }

    fn cancel_connection(&mut self, identifier: &str) {
        if let Err(e) = self.backend.disconnect(identifier) {
            debug!("Cancelling connection to {} failed: {}", identifier, e);
        }
    }

    fn on_connect_failed(&mut self, identifier: String, error: Option<String>) {
        if let Some(device) = self.stage.iter_mut().find(|d| d.identifier() == identifier) {
            device.set_connection_pending(false);
        }
        warn!("Connection to {} failed: {:?}", identifier, error);
        let error = GattError::peripheral(identifier.clone(), error.map(GattError::platform));
        self.report_error(error, Some(&identifier));
    }

    fn on_disconnected(&mut self, identifier: String, error: Option<String>) {
        let Some(device) = self.stage.iter_mut().find(|d| d.identifier() == identifier) else {
            debug!("Disconnect from forgotten device {}", identifier);
            return;
        };
        let was_pending = device.connection_pending();
        device.set_connection_pending(false);
        let Some(mut peripheral) = device.detach() else {
            if was_pending {
                let error = GattError::peripheral(identifier.clone(), error.map(GattError::platform));
                self.report_error(error, Some(&identifier));
            }
            return;
        };

        self.notify(|d| d.peripheral_will_disconnect(&identifier));
        peripheral.clear();
        self.peripherals.retain(|id| *id != identifier);

        if peripheral.disconnection_requested() {
            info!("Disconnected from {}", identifier);
        } else {
            warn!("{} disconnected unexpectedly: {:?}", identifier, error);
            self.report_error(GattError::UnexpectedDisconnection(identifier.clone()), Some(&identifier));
        }
        self.notify(|d| d.updated());
    }

    fn on_services_discovered(&mut self, identifier: String, services: PlatformResult<Vec<RawService>>) {
        let raws = match services {
            Ok(raws) => raws,
            Err(text) => {
                let error = GattError::peripheral(identifier.clone(), Some(GattError::platform(text)));
                self.report_error(error, Some(&identifier));
                return;
            }
        };
        let Some(peripheral) = find_peripheral_mut(&mut self.stage, &identifier) else {
            debug!("Services for disconnected {}, ignoring", identifier);
            return;
        };

        let handles = peripheral.stage_services(raws, &self.registry);
        let mut errors = Vec::new();
        for handle in &handles {
            if let Some(service) = peripheral.staged_service_mut(*handle) {
                if let Err(e) = service.start_over(&mut self.backend) {
                    errors.push(GattError::peripheral(identifier.clone(), Some(e)));
                }
            }
        }

        for error in errors {
            self.report_error(error, Some(&identifier));
        }
        if handles.is_empty() {
            self.commit_peripheral(&identifier);
        }
    }

    fn on_characteristics_discovered(
        &mut self,
        identifier: String,
        service: AttributeHandle,
        characteristics: PlatformResult<Vec<RawCharacteristic>>,
    ) {
        let raws = match characteristics {
            Ok(raws) => raws,
            Err(text) => {
                let error = self.service_error(&identifier, service, GattError::platform(text));
                self.report_error(error, Some(&identifier));
                return;
            }
        };
        let Some(peripheral) = find_peripheral_mut(&mut self.stage, &identifier) else {
            debug!("Characteristics for disconnected {}, ignoring", identifier);
            return;
        };
        let Some(target) = peripheral.staged_service_mut(service) else {
            debug!("Service {} of {} is not staged, ignoring", service, identifier);
            return;
        };

        let handles = target.stage_characteristics(raws, &self.registry);
        let mut errors = Vec::new();
        for handle in &handles {
            if let Some(characteristic) = target.staged_characteristic_mut(*handle) {
                if let Err(e) = characteristic.start_over(&identifier, &mut self.backend) {
                    errors.push(GattError::peripheral(
                        identifier.clone(),
                        Some(GattError::service(target.id(), Some(e))),
                    ));
                }
            }
        }
        let promotion = handles.is_empty().then(|| promote_service(peripheral, service));

        for error in errors {
            self.report_error(error, Some(&identifier));
        }
        if let Some(promotion) = promotion {
            self.announce(&identifier, service, promotion);
        }
    }

    fn on_descriptors_discovered(
        &mut self,
        identifier: String,
        characteristic: AttributeHandle,
        descriptors: PlatformResult<Vec<RawDescriptor>>,
    ) {
        let raws = match descriptors {
            Ok(raws) => raws,
            Err(text) => {
                let error = self.characteristic_error(&identifier, characteristic, GattError::platform(text));
                self.report_error(error, Some(&identifier));
                return;
            }
        };
        let Some(peripheral) = find_peripheral_mut(&mut self.stage, &identifier) else {
            debug!("Descriptors for disconnected {}, ignoring", identifier);
            return;
        };
        let Some(service) = peripheral.characteristic_owner(characteristic) else {
            debug!("Characteristic {} of {} is unknown, ignoring", characteristic, identifier);
            return;
        };
        let Some(owner) = peripheral.staged_service_mut(service) else {
            debug!("Service {} of {} is not staged, ignoring", service, identifier);
            return;
        };
        let Some(target) = owner.staged_characteristic_mut(characteristic) else {
            debug!("Characteristic {} of {} is not staged, ignoring", characteristic, identifier);
            return;
        };

        target.set_descriptors(raws, &self.registry);
        if !owner.add_characteristic(characteristic) {
            return;
        }
        let promotion = promote_service(peripheral, service);
        self.announce(&identifier, service, promotion);
    }

    fn announce(&mut self, identifier: &str, service: AttributeHandle, promotion: Promotion) {
        if promotion.service_changed {
            info!("Service {} of {} was rediscovered", service, identifier);
            self.notify(|d| d.service_changed(identifier, service));
        }
        if promotion.peripheral_resolved {
            self.commit_peripheral(identifier);
        }
    }

    /// Adds a resolved peripheral to the committed collection. Idempotent.
    fn commit_peripheral(&mut self, identifier: &str) {
        if self.peripherals.iter().any(|id| id == identifier) {
            debug!("{} resolved again", identifier);
            self.notify(|d| d.updated());
            return;
        }
        info!("Peripheral {} is ready", identifier);
        self.peripherals.push(identifier.to_string());
        self.notify(|d| {
            d.peripheral_connected(identifier);
            d.updated();
        });
    }

    fn on_characteristic_value(
        &mut self,
        identifier: String,
        characteristic: AttributeHandle,
        value: PlatformResult<Vec<u8>>,
    ) {
        match value {
            Ok(value) => {
                let Some(target) = find_characteristic_mut(&mut self.stage, &identifier, characteristic) else {
                    debug!("Value for unknown characteristic {} of {}", characteristic, identifier);
                    return;
                };
                target.set_value(value.clone());
                self.notify(|d| d.characteristic_value_changed(&identifier, characteristic, &value));
            }
            Err(text) => {
                let error = self.characteristic_error(&identifier, characteristic, GattError::platform(text));
                self.report_error(error, Some(&identifier));
            }
        }
    }

    fn on_descriptor_value(&mut self, identifier: String, descriptor: AttributeHandle, value: PlatformResult<Vec<u8>>) {
        match value {
            Ok(value) => {
                let Some(target) = find_descriptor_mut(&mut self.stage, &identifier, descriptor) else {
                    debug!("Value for unknown descriptor {} of {}", descriptor, identifier);
                    return;
                };
                target.set_value(value.clone());
                self.notify(|d| d.descriptor_value_changed(&identifier, descriptor, &value));
            }
            Err(text) => {
                let error = self.descriptor_error(&identifier, descriptor, GattError::platform(text));
                self.report_error(error, Some(&identifier));
            }
        }
    }

    fn on_notification_state(&mut self, identifier: String, characteristic: AttributeHandle, result: PlatformResult<bool>) {
        match result {
            Ok(notifying) => {
                let Some(target) = find_characteristic_mut(&mut self.stage, &identifier, characteristic) else {
                    debug!("Notify state for unknown characteristic {} of {}", characteristic, identifier);
                    return;
                };
                target.set_notifying(notifying);
                self.notify(|d| d.characteristic_notification_state_changed(&identifier, characteristic, notifying));
            }
            Err(text) => {
                let error = self.characteristic_error(&identifier, characteristic, GattError::platform(text));
                self.report_error(error, Some(&identifier));
            }
        }
    }

    fn on_rssi(&mut self, identifier: String, rssi: PlatformResult<i32>) {
        match rssi {
            Ok(rssi) => {
                let Some(device) = self.stage.iter_mut().find(|d| d.identifier() == identifier) else {
                    return;
                };
                device.set_rssi(rssi);
                self.notify(|d| d.peripheral_info_changed(&identifier));
            }
            Err(text) => {
                let error = GattError::peripheral(identifier.clone(), Some(GattError::platform(text)));
                self.report_error(error, Some(&identifier));
            }
        }
    }

    /// Rediscovers each invalidated service. An empty list means the set of
    /// services itself changed, so the whole tree is rediscovered.
    fn on_services_invalidated(&mut self, identifier: String, services: Vec<AttributeHandle>) {
        let Some(peripheral) = find_peripheral_mut(&mut self.stage, &identifier) else {
            debug!("Invalidation for disconnected {}, ignoring", identifier);
            return;
        };
        info!("{} invalidated {} services", identifier, services.len());

        let mut errors = Vec::new();
        if services.is_empty() {
            let filter = peripheral.service_filter().to_vec();
            if let Err(e) = peripheral.start_over(filter, &mut self.backend) {
                errors.push(e);
            }
        }
        for handle in services {
            if !peripheral.restage_service(handle) {
                debug!("Invalidated service {} of {} is unknown", handle, identifier);
                continue;
            }
            if let Some(service) = peripheral.service_mut(handle) {
                if let Err(e) = service.start_over(&mut self.backend) {
                    errors.push(GattError::peripheral(identifier.clone(), Some(e)));
                }
            }
        }

        for error in errors {
            self.report_error(error, Some(&identifier));
        }
        self.notify(|d| d.updated());
    }

    fn service_error(&self, identifier: &str, service: AttributeHandle, inner: GattError) -> GattError {
        let service = self
            .connected_peripheral(identifier)
            .and_then(|p| p.service(service));
        match service {
            Some(service) => wrap_service(identifier, service, inner),
            None => GattError::peripheral(identifier, Some(inner)),
        }
    }

    fn characteristic_error(&self, identifier: &str, characteristic: AttributeHandle, inner: GattError) -> GattError {
        match locate_characteristic(&self.stage, identifier, characteristic) {
            Ok((service, target)) => wrap_characteristic(identifier, service, target, inner),
            Err(_) => GattError::peripheral(
                identifier,
                Some(GattError::characteristic(characteristic.to_string(), Some(inner))),
            ),
        }
    }

    fn descriptor_error(&self, identifier: &str, descriptor: AttributeHandle, inner: GattError) -> GattError {
        match locate_descriptor(&self.stage, identifier, descriptor) {
            Ok((service, characteristic, target)) => wrap_characteristic(
                identifier,
                service,
                characteristic,
                GattError::descriptor(target.id(), Some(inner)),
            ),
            Err(_) => GattError::peripheral(
                identifier,
                Some(GattError::descriptor(descriptor.to_string(), Some(inner))),
            ),
        }
    }
}

fn promote_service(peripheral: &mut Peripheral, service: AttributeHandle) -> Promotion {
    let service_changed = peripheral.service(service).is_some_and(Service::resolved_once);
    let peripheral_resolved = peripheral.add_service(service);
    Promotion {
        service_changed,
        peripheral_resolved,
    }
}

fn unknown_peripheral(identifier: &str) -> GattError {
    GattError::peripheral(identifier, Some(GattError::platform("unknown peripheral")))
}

fn not_connected(identifier: &str) -> GattError {
    GattError::peripheral(identifier, Some(GattError::platform("not connected")))
}

fn unknown_attribute(identifier: &str, handle: AttributeHandle) -> GattError {
    GattError::peripheral(
        identifier,
        Some(GattError::internal(handle.to_string(), Some(GattError::platform("unknown attribute")))),
    )
}

fn wrap_service(identifier: &str, service: &Service, inner: GattError) -> GattError {
    GattError::peripheral(identifier, Some(GattError::service(service.id(), Some(inner))))
}

fn wrap_characteristic(
    identifier: &str,
    service: &Service,
    characteristic: &Characteristic,
    inner: GattError,
) -> GattError {
    wrap_service(
        identifier,
        service,
        GattError::characteristic(characteristic.id(), Some(inner)),
    )
}

fn find_peripheral_mut<'a>(stage: &'a mut [DiscoveryData], identifier: &str) -> Option<&'a mut Peripheral> {
    stage
        .iter_mut()
        .find(|d| d.identifier() == identifier)?
        .peripheral_mut()
}

fn find_characteristic_mut<'a>(
    stage: &'a mut [DiscoveryData],
    identifier: &str,
    handle: AttributeHandle,
) -> Option<&'a mut Characteristic> {
    let peripheral = find_peripheral_mut(stage, identifier)?;
    let service = peripheral.characteristic_owner(handle)?;
    peripheral.service_mut(service)?.characteristic_mut(handle)
}

fn find_descriptor_mut<'a>(
    stage: &'a mut [DiscoveryData],
    identifier: &str,
    handle: AttributeHandle,
) -> Option<&'a mut Descriptor> {
    let peripheral = find_peripheral_mut(stage, identifier)?;
    let (service, characteristic) = peripheral.descriptor_owner(handle)?;
    peripheral
        .service_mut(service)?
        .characteristic_mut(characteristic)?
        .descriptor_mut(handle)
}

fn locate_characteristic<'a>(
    stage: &'a [DiscoveryData],
    identifier: &str,
    handle: AttributeHandle,
) -> Result<(&'a Service, &'a Characteristic), GattError> {
    let peripheral = stage
        .iter()
        .find(|d| d.identifier() == identifier)
        .and_then(DiscoveryData::peripheral)
        .ok_or_else(|| not_connected(identifier))?;
    let service = peripheral
        .characteristic_owner(handle)
        .and_then(|s| peripheral.service(s))
        .ok_or_else(|| unknown_attribute(identifier, handle))?;
    let characteristic = service
        .characteristic(handle)
        .ok_or_else(|| unknown_attribute(identifier, handle))?;
    Ok((service, characteristic))
}

fn locate_descriptor<'a>(
    stage: &'a [DiscoveryData],
    identifier: &str,
    handle: AttributeHandle,
) -> Result<(&'a Service, &'a Characteristic, &'a Descriptor), GattError> {
    let peripheral = stage
        .iter()
        .find(|d| d.identifier() == identifier)
        .and_then(DiscoveryData::peripheral)
        .ok_or_else(|| not_connected(identifier))?;
    let (service, characteristic) = peripheral
        .descriptor_owner(handle)
        .ok_or_else(|| unknown_attribute(identifier, handle))?;
    let service = peripheral
        .service(service)
        .ok_or_else(|| unknown_attribute(identifier, handle))?;
    let characteristic = service
        .characteristic(characteristic)
        .ok_or_else(|| unknown_attribute(identifier, handle))?;
    let descriptor = characteristic
        .descriptor(handle)
        .ok_or_else(|| unknown_attribute(identifier, handle))?;
    Ok((service, characteristic, descriptor))
}
