//! Hardware backend built on bluest
//! Every request spawns a task on the runtime the backend was created in;
//! its outcome is posted to the event channel, which the application drains
//! into `CentralManager::handle_event`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bluest::{Adapter, AdapterEvent, Device};
use chrono::Utc;
use enumset::EnumSet;
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::bluetooth::commands::CentralBackend;
use crate::core::bluetooth::constants::UNKNOWN_RSSI;
use crate::core::bluetooth::error::BackendError;
use crate::core::bluetooth::events::CentralEvent;
use crate::core::bluetooth::types::{
    AdapterState, AdvertisementData, AttributeHandle, CharacteristicProperty, ManufacturerData,
    RawCharacteristic, RawDescriptor, RawService, WriteType,
};

/// How often a connected device is polled for disconnection.
const CONNECTION_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A GATT element and the device it belongs to.
type Attribute<T> = (String, T);

#[derive(Default)]
struct Attributes {
    services: HashMap<AttributeHandle, Attribute<bluest::Service>>,
    characteristics: HashMap<AttributeHandle, Attribute<bluest::Characteristic>>,
    descriptors: HashMap<AttributeHandle, Attribute<bluest::Descriptor>>,
}

impl Attributes {
    fn forget(&mut self, device: &str) {
        self.services.retain(|_, (id, _)| id != device);
        self.characteristics.retain(|_, (id, _)| id != device);
        self.descriptors.retain(|_, (id, _)| id != device);
    }
}

pub struct BluestBackend {
    adapter: Adapter,
    runtime: Handle,
    events: UnboundedSender<CentralEvent>,
    /// Map of device identifiers to devices
    devices: Arc<Mutex<HashMap<String, Device>>>,
    attributes: Arc<Mutex<Attributes>>,
    next_handle: Arc<AtomicU64>,
    scan_token: CancellationToken,
    notify_tokens: HashMap<AttributeHandle, CancellationToken>,
}

impl BluestBackend {
    /// Opens the default adapter and starts reporting its state. Must be
    /// called from within a tokio runtime.
    pub async fn new(events: UnboundedSender<CentralEvent>) -> Result<Self, BackendError> {
        let adapter = Adapter::default()
            .await
            .ok_or(BackendError::AdapterUnavailable)?;
        info!("Bluetooth adapter found.");

        let backend = Self {
            adapter,
            runtime: Handle::current(),
            events,
            devices: Arc::new(Mutex::new(HashMap::new())),
            attributes: Arc::new(Mutex::new(Attributes::default())),
            next_handle: Arc::new(AtomicU64::new(1)),
            scan_token: CancellationToken::new(),
            notify_tokens: HashMap::new(),
        };
        backend.watch_adapter();
        Ok(backend)
    }

    fn watch_adapter(&self) {
        let adapter = self.adapter.clone();
        let events = self.events.clone();
        self.runtime.spawn(async move {
            if let Err(e) = adapter.wait_available().await {
                error!("Bluetooth adapter never became available: {}", e);
                post(&events, CentralEvent::AdapterStateChanged(AdapterState::Unsupported));
                return;
            }
            info!("Bluetooth adapter is available.");
            post(&events, CentralEvent::AdapterStateChanged(AdapterState::PoweredOn));

            let mut stream = match adapter.events().await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Adapter state events unavailable: {}", e);
                    return;
                }
            };
            while let Some(event) = stream.next().await {
                let state = match event {
                    Ok(AdapterEvent::Available) => AdapterState::PoweredOn,
                    Ok(AdapterEvent::Unavailable) => AdapterState::PoweredOff,
                    Err(e) => {
                        error!("Adapter event error: {}", e);
                        AdapterState::Unknown
                    }
                };
                post(&events, CentralEvent::AdapterStateChanged(state));
            }
        });
    }

    fn device(&self, identifier: &str) -> Result<Device, BackendError> {
        lock(&self.devices)
            .get(identifier)
            .cloned()
            .ok_or_else(|| BackendError::UnknownPeripheral(identifier.to_string()))
    }

    fn service(&self, handle: AttributeHandle) -> Result<bluest::Service, BackendError> {
        lock(&self.attributes)
            .services
            .get(&handle)
            .map(|(_, service)| service.clone())
            .ok_or_else(|| BackendError::UnknownAttribute(handle.to_string()))
    }

    fn characteristic(&self, handle: AttributeHandle) -> Result<bluest::Characteristic, BackendError> {
        lock(&self.attributes)
            .characteristics
            .get(&handle)
            .map(|(_, characteristic)| characteristic.clone())
            .ok_or_else(|| BackendError::UnknownAttribute(handle.to_string()))
    }

    fn descriptor(&self, handle: AttributeHandle) -> Result<bluest::Descriptor, BackendError> {
        lock(&self.attributes)
            .descriptors
            .get(&handle)
            .map(|(_, descriptor)| descriptor.clone())
            .ok_or_else(|| BackendError::UnknownAttribute(handle.to_string()))
    }
}

impl CentralBackend for BluestBackend {
    fn start_scan(&mut self, services: &[Uuid]) -> Result<(), BackendError> {
        self.scan_token.cancel();
        self.scan_token = CancellationToken::new();
        let cancel_token = self.scan_token.clone();

        let adapter = self.adapter.clone();
        let devices = self.devices.clone();
        let events = self.events.clone();
        let services = services.to_vec();

        self.runtime.spawn(async move {
            info!("Starting bluetooth scan");
            let mut scan_stream = match adapter.scan(&services).await {
                Ok(stream) => stream,
                Err(e) => {
                    error!("Failed to start scan: {}", e);
                    return;
                }
            };

            loop {
                tokio::select! {
                    result = scan_stream.next() => {
                        match result {
                            Some(discovered) => {
                                let device = discovered.device;
                                let identifier = device.id().to_string();
                                debug!("Found device - Device: {:?}, RSSI: {:?}", device, discovered.rssi);

                                let advertisement = convert_advertisement(discovered.adv_data, &device);
                                lock(&devices).insert(identifier.clone(), device);
                                post(&events, CentralEvent::PeripheralDiscovered {
                                    identifier,
                                    advertisement,
                                    rssi: discovered.rssi.map(i32::from).unwrap_or(UNKNOWN_RSSI),
                                });
                            }
                            None => {
                                info!("Bluetooth scan stream has ended.");
                                break;
                            }
                        }
                    }
                    _ = cancel_token.cancelled() => {
                        info!("Bluetooth scan cancelled.");
                        break;
                    }
                }
            }
        });
        Ok(())
    }

    fn stop_scan(&mut self) -> Result<(), BackendError> {
        info!("Stopping Bluetooth scan.");
        self.scan_token.cancel();
        Ok(())
    }

    fn connect(&mut self, peripheral: &str) -> Result<(), BackendError> {
        let device = self.device(peripheral)?;
        let adapter = self.adapter.clone();
        let events = self.events.clone();
        let identifier = peripheral.to_string();
        let attributes = self.attributes.clone();

        self.runtime.spawn(async move {
            if !device.is_connected().await {
                info!("Initiating connection to {}...", identifier);
                if let Err(e) = adapter.connect_device(&device).await {
                    warn!("Connection to {} failed: {}", identifier, e);
                    post(&events, CentralEvent::PeripheralConnectFailed {
                        identifier,
                        error: Some(e.to_string()),
                    });
                    return;
                }
            }
            info!("Connected to {}", identifier);
            post(&events, CentralEvent::PeripheralConnected {
                identifier: identifier.clone(),
            });
            watch_connection(identifier, device, events, attributes).await;
        });
        Ok(())
    }

    fn disconnect(&mut self, peripheral: &str) -> Result<(), BackendError> {
        let device = self.device(peripheral)?;
        let adapter = self.adapter.clone();
        let identifier = peripheral.to_string();

        let attributes = lock(&self.attributes);
        let stale: Vec<_> = self
            .notify_tokens
            .keys()
            .filter(|handle| {
                attributes
                    .characteristics
                    .get(*handle)
                    .is_some_and(|(id, _)| *id == identifier)
            })
            .copied()
            .collect();
        drop(attributes);
        for handle in stale {
            if let Some(token) = self.notify_tokens.remove(&handle) {
                token.cancel();
            }
        }

        self.runtime.spawn(async move {
            info!("Disconnecting from device {}", identifier);
            if let Err(e) = adapter.disconnect_device(&device).await {
                error!("Failed to disconnect from {}: {}", identifier, e);
            }
        });
        Ok(())
    }

    fn discover_services(&mut self, peripheral: &str, filter: &[Uuid]) -> Result<(), BackendError> {
        let device = self.device(peripheral)?;
        let events = self.events.clone();
        let attributes = self.attributes.clone();
        let next_handle = self.next_handle.clone();
        let identifier = peripheral.to_string();
        let filter = filter.to_vec();

        self.runtime.spawn(async move {
            let discovered = if filter.is_empty() {
                device.discover_services().await
            } else {
                let mut all = Vec::new();
                let mut failure = None;
                for uuid in &filter {
                    match device.discover_services_with_uuid(*uuid).await {
                        Ok(mut services) => all.append(&mut services),
                        Err(e) => {
                            failure = Some(e);
                            break;
                        }
                    }
                }
                match failure {
                    Some(e) => Err(e),
                    None => Ok(all),
                }
            };

            let services = match discovered {
                Ok(services) => {
                    let mut raws = Vec::with_capacity(services.len());
                    for service in services {
                        let handle = AttributeHandle(next_handle.fetch_add(1, Ordering::Relaxed));
                        raws.push(RawService {
                            handle,
                            uuid: service.uuid(),
                            is_primary: service.is_primary().await.unwrap_or(true),
                        });
                        lock(&attributes).services.insert(handle, (identifier.clone(), service));
                    }
                    Ok(raws)
                }
                Err(e) => Err(e.to_string()),
            };
            post(&events, CentralEvent::ServicesDiscovered { identifier, services });
        });
        Ok(())
    }

    fn discover_characteristics(
        &mut self,
        peripheral: &str,
        service: AttributeHandle,
        filter: &[Uuid],
    ) -> Result<(), BackendError> {
        let target = self.service(service)?;
        let events = self.events.clone();
        let attributes = self.attributes.clone();
        let next_handle = self.next_handle.clone();
        let identifier = peripheral.to_string();
        let filter = filter.to_vec();

        self.runtime.spawn(async move {
            let discovered = match target.discover_characteristics().await {
                Ok(all) if !filter.is_empty() => {
                    Ok(all.into_iter().filter(|c| filter.contains(&c.uuid())).collect())
                }
                other => other,
            };

            let characteristics = match discovered {
                Ok(characteristics) => {
                    let mut raws = Vec::with_capacity(characteristics.len());
                    for characteristic in characteristics {
                        let handle = AttributeHandle(next_handle.fetch_add(1, Ordering::Relaxed));
                        let properties = match characteristic.properties().await {
                            Ok(properties) => convert_properties(properties),
                            Err(e) => {
                                warn!("Failed to read properties of {}: {}", characteristic.uuid(), e);
                                EnumSet::new()
                            }
                        };
                        raws.push(RawCharacteristic {
                            handle,
                            uuid: characteristic.uuid(),
                            properties,
                            value: None,
                            is_notifying: characteristic.is_notifying().await.unwrap_or(false),
                        });
                        lock(&attributes)
                            .characteristics
                            .insert(handle, (identifier.clone(), characteristic));
                    }
                    Ok(raws)
                }
                Err(e) => Err(e.to_string()),
            };
            post(&events, CentralEvent::CharacteristicsDiscovered {
                identifier,
                service,
                characteristics,
            });
        });
        Ok(())
    }

    fn discover_descriptors(&mut self, peripheral: &str, characteristic: AttributeHandle) -> Result<(), BackendError> {
        let target = self.characteristic(characteristic)?;
        let events = self.events.clone();
        let attributes = self.attributes.clone();
        let next_handle = self.next_handle.clone();
        let identifier = peripheral.to_string();

        self.runtime.spawn(async move {
            let descriptors = match target.discover_descriptors().await {
                Ok(descriptors) => {
                    let mut raws = Vec::with_capacity(descriptors.len());
                    for descriptor in descriptors {
                        let handle = AttributeHandle(next_handle.fetch_add(1, Ordering::Relaxed));
                        raws.push(RawDescriptor {
                            handle,
                            uuid: descriptor.uuid(),
                            value: None,
                        });
                        lock(&attributes)
                            .descriptors
                            .insert(handle, (identifier.clone(), descriptor));
                    }
                    Ok(raws)
                }
                Err(e) => Err(e.to_string()),
            };
            post(&events, CentralEvent::DescriptorsDiscovered {
                identifier,
                characteristic,
                descriptors,
            });
        });
        Ok(())
    }

    fn read_characteristic(&mut self, peripheral: &str, characteristic: AttributeHandle) -> Result<(), BackendError> {
        let target = self.characteristic(characteristic)?;
        let events = self.events.clone();
        let identifier = peripheral.to_string();

        self.runtime.spawn(async move {
            let value = target.read().await.map_err(|e| e.to_string());
            post(&events, CentralEvent::CharacteristicValueUpdated {
                identifier,
                characteristic,
                value,
            });
        });
        Ok(())
    }

    fn write_characteristic(
        &mut self,
        peripheral: &str,
        characteristic: AttributeHandle,
        data: &[u8],
        write_type: WriteType,
    ) -> Result<(), BackendError> {
        let target = self.characteristic(characteristic)?;
        let events = self.events.clone();
        let identifier = peripheral.to_string();
        let data = data.to_vec();

        self.runtime.spawn(async move {
            match write_type {
                WriteType::WithResponse => {
                    let result = target.write(&data).await.map_err(|e| e.to_string());
                    post(&events, CentralEvent::CharacteristicWritten {
                        identifier,
                        characteristic,
                        result,
                    });
                }
                WriteType::WithoutResponse => match target.write_without_response(&data).await {
                    Ok(()) => post(&events, CentralEvent::ReadyToWriteWithoutResponse { identifier }),
                    Err(e) => post(&events, CentralEvent::CharacteristicWritten {
                        identifier,
                        characteristic,
                        result: Err(e.to_string()),
                    }),
                },
            }
        });
        Ok(())
    }

    fn set_notify(&mut self, peripheral: &str, characteristic: AttributeHandle, enabled: bool) -> Result<(), BackendError> {
        let target = self.characteristic(characteristic)?;
        let events = self.events.clone();
        let identifier = peripheral.to_string();

        if !enabled {
            match self.notify_tokens.remove(&characteristic) {
                Some(token) => token.cancel(),
                None => post(&events, CentralEvent::NotificationStateChanged {
                    identifier,
                    characteristic,
                    result: Ok(false),
                }),
            }
            return Ok(());
        }
        if self.notify_tokens.contains_key(&characteristic) {
            debug!("Already subscribed to {}", characteristic);
            return Ok(());
        }

        let cancel_token = CancellationToken::new();
        self.notify_tokens.insert(characteristic, cancel_token.clone());

        self.runtime.spawn(async move {
            info!("Subscribing to notifications of {} on {}", characteristic, identifier);
            let mut notification_stream = match target.notify().await {
                Ok(stream) => stream,
                Err(e) => {
                    error!("Failed to subscribe to {}: {}", characteristic, e);
                    post(&events, CentralEvent::NotificationStateChanged {
                        identifier,
                        characteristic,
                        result: Err(e.to_string()),
                    });
                    return;
                }
            };
            post(&events, CentralEvent::NotificationStateChanged {
                identifier: identifier.clone(),
                characteristic,
                result: Ok(true),
            });

            loop {
                tokio::select! {
                    result = notification_stream.next() => {
                        match result {
                            Some(value) => post(&events, CentralEvent::CharacteristicValueUpdated {
                                identifier: identifier.clone(),
                                characteristic,
                                value: value.map_err(|e| e.to_string()),
                            }),
                            None => {
                                info!("Notification stream of {} ended", characteristic);
                                break;
                            }
                        }
                    }
                    _ = cancel_token.cancelled() => break,
                }
            }
            post(&events, CentralEvent::NotificationStateChanged {
                identifier,
                characteristic,
                result: Ok(false),
            });
        });
        Ok(())
    }

    fn read_descriptor(&mut self, peripheral: &str, descriptor: AttributeHandle) -> Result<(), BackendError> {
        let target = self.descriptor(descriptor)?;
        let events = self.events.clone();
        let identifier = peripheral.to_string();

        self.runtime.spawn(async move {
            let value = target.read().await.map_err(|e| e.to_string());
            post(&events, CentralEvent::DescriptorValueUpdated {
                identifier,
                descriptor,
                value,
            });
        });
        Ok(())
    }

    fn write_descriptor(&mut self, peripheral: &str, descriptor: AttributeHandle, data: &[u8]) -> Result<(), BackendError> {
        let target = self.descriptor(descriptor)?;
        let events = self.events.clone();
        let identifier = peripheral.to_string();
        let data = data.to_vec();

        self.runtime.spawn(async move {
            let result = target.write(&data).await.map_err(|e| e.to_string());
            post(&events, CentralEvent::DescriptorWritten {
                identifier,
                descriptor,
                result,
            });
        });
        Ok(())
    }

    fn read_rssi(&mut self, peripheral: &str) -> Result<(), BackendError> {
        let device = self.device(peripheral)?;
        let events = self.events.clone();
        let identifier = peripheral.to_string();

        self.runtime.spawn(async move {
            let rssi = device.rssi().await.map(i32::from).map_err(|e| e.to_string());
            post(&events, CentralEvent::RssiRead { identifier, rssi });
        });
        Ok(())
    }
}

impl Drop for BluestBackend {
    fn drop(&mut self) {
        self.scan_token.cancel();
        for token in self.notify_tokens.values() {
            token.cancel();
        }
    }
}

fn post(events: &UnboundedSender<CentralEvent>, event: CentralEvent) {
    if let Err(e) = events.send(event) {
        debug!("Event receiver is gone, dropping {:?}", e.0);
    }
}

/// Polls the device until it is no longer connected, then reports the
/// disconnection and forgets its attributes.
async fn watch_connection(
    identifier: String,
    device: Device,
    events: UnboundedSender<CentralEvent>,
    attributes: Arc<Mutex<Attributes>>,
) {
    let mut interval = tokio::time::interval(CONNECTION_POLL_INTERVAL);
    loop {
        interval.tick().await;
        if !device.is_connected().await {
            break;
        }
    }
    info!("Device {} is no longer connected", identifier);
    lock(&attributes).forget(&identifier);
    post(&events, CentralEvent::PeripheralDisconnected { identifier, error: None });
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn convert_advertisement(adv: bluest::AdvertisementData, device: &Device) -> AdvertisementData {
    AdvertisementData {
        local_name: adv.local_name.or_else(|| device.name().ok()),
        is_connectable: adv.is_connectable,
        manufacturer_data: adv.manufacturer_data.map(|m| ManufacturerData {
            company_id: m.company_id,
            data: m.data.to_vec(),
        }),
        service_uuids: adv.services,
        service_data: adv
            .service_data
            .into_iter()
            .map(|(uuid, data)| (uuid, data.to_vec()))
            .collect(),
        tx_power_level: adv.tx_power_level,
        timestamp: Some(Utc::now()),
    }
}

fn convert_properties(properties: bluest::CharacteristicProperties) -> EnumSet<CharacteristicProperty> {
    let flags = [
        (properties.broadcast, CharacteristicProperty::Broadcast),
        (properties.read, CharacteristicProperty::Read),
        (properties.write_without_response, CharacteristicProperty::WriteWithoutResponse),
        (properties.write, CharacteristicProperty::Write),
        (properties.notify, CharacteristicProperty::Notify),
        (properties.indicate, CharacteristicProperty::Indicate),
        (properties.authenticated_signed_writes, CharacteristicProperty::AuthenticatedSignedWrites),
        (properties.extended_properties, CharacteristicProperty::ExtendedProperties),
    ];
    flags
        .into_iter()
        .filter(|(set, _)| *set)
        .map(|(_, property)| property)
        .collect()
}
