//! Shared fixtures: a backend that records requests instead of talking to
//! hardware, and builders for the events it would have produced.

#![allow(dead_code)]

use enumset::EnumSet;
use gatt_central::core::bluetooth::constants::uuid_from_short;
use gatt_central::core::bluetooth::error::BackendError;
use gatt_central::core::bluetooth::types::{
    AdapterState, AdvertisementData, CharacteristicProperty, RawCharacteristic, RawDescriptor,
    RawService, WriteType,
};
use gatt_central::{AttributeHandle, CentralBackend, CentralEvent, CentralManager, CentralUpdate, Registry, ScanConfig};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use uuid::Uuid;

pub const DEVICE: &str = "AA:BB";

/// A request the manager sent to the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    StartScan(Vec<Uuid>),
    StopScan,
    Connect(String),
    Disconnect(String),
    DiscoverServices(String, Vec<Uuid>),
    DiscoverCharacteristics(String, AttributeHandle, Vec<Uuid>),
    DiscoverDescriptors(String, AttributeHandle),
    ReadCharacteristic(String, AttributeHandle),
    WriteCharacteristic(String, AttributeHandle, Vec<u8>, WriteType),
    SetNotify(String, AttributeHandle, bool),
    ReadDescriptor(String, AttributeHandle),
    WriteDescriptor(String, AttributeHandle, Vec<u8>),
    ReadRssi(String),
}

#[derive(Debug, Default)]
pub struct FakeBackend {
    pub requests: Vec<Request>,
    /// When set, every request is refused with this error.
    pub refuse: Option<BackendError>,
}

impl FakeBackend {
    fn record(&mut self, request: Request) -> Result<(), BackendError> {
        if let Some(error) = &self.refuse {
            return Err(error.clone());
        }
        self.requests.push(request);
        Ok(())
    }

    /// Drains the recorded requests.
    pub fn take(&mut self) -> Vec<Request> {
        std::mem::take(&mut self.requests)
    }
}

impl CentralBackend for FakeBackend {
    fn start_scan(&mut self, services: &[Uuid]) -> Result<(), BackendError> {
        self.record(Request::StartScan(services.to_vec()))
    }

    fn stop_scan(&mut self) -> Result<(), BackendError> {
        self.record(Request::StopScan)
    }

    fn connect(&mut self, peripheral: &str) -> Result<(), BackendError> {
        self.record(Request::Connect(peripheral.to_string()))
    }

    fn disconnect(&mut self, peripheral: &str) -> Result<(), BackendError> {
        self.record(Request::Disconnect(peripheral.to_string()))
    }

    fn discover_services(&mut self, peripheral: &str, filter: &[Uuid]) -> Result<(), BackendError> {
        self.record(Request::DiscoverServices(peripheral.to_string(), filter.to_vec()))
    }

    fn discover_characteristics(
        &mut self,
        peripheral: &str,
        service: AttributeHandle,
        filter: &[Uuid],
    ) -> Result<(), BackendError> {
        self.record(Request::DiscoverCharacteristics(
            peripheral.to_string(),
            service,
            filter.to_vec(),
        ))
    }

    fn discover_descriptors(&mut self, peripheral: &str, characteristic: AttributeHandle) -> Result<(), BackendError> {
        self.record(Request::DiscoverDescriptors(peripheral.to_string(), characteristic))
    }

    fn read_characteristic(&mut self, peripheral: &str, characteristic: AttributeHandle) -> Result<(), BackendError> {
        self.record(Request::ReadCharacteristic(peripheral.to_string(), characteristic))
    }

    fn write_characteristic(
        &mut self,
        peripheral: &str,
        characteristic: AttributeHandle,
        data: &[u8],
        write_type: WriteType,
    ) -> Result<(), BackendError> {
        self.record(Request::WriteCharacteristic(
            peripheral.to_string(),
            characteristic,
            data.to_vec(),
            write_type,
        ))
    }

    fn set_notify(&mut self, peripheral: &str, characteristic: AttributeHandle, enabled: bool) -> Result<(), BackendError> {
        self.record(Request::SetNotify(peripheral.to_string(), characteristic, enabled))
    }

    fn read_descriptor(&mut self, peripheral: &str, descriptor: AttributeHandle) -> Result<(), BackendError> {
        self.record(Request::ReadDescriptor(peripheral.to_string(), descriptor))
    }

    fn write_descriptor(&mut self, peripheral: &str, descriptor: AttributeHandle, data: &[u8]) -> Result<(), BackendError> {
        self.record(Request::WriteDescriptor(peripheral.to_string(), descriptor, data.to_vec()))
    }

    fn read_rssi(&mut self, peripheral: &str) -> Result<(), BackendError> {
        self.record(Request::ReadRssi(peripheral.to_string()))
    }
}

pub type Manager = CentralManager<FakeBackend>;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A powered-on manager with the given config, and the receiving end of its
/// delegate channel.
pub fn manager_with(config: ScanConfig) -> (Manager, UnboundedReceiver<CentralUpdate>) {
    init_logging();
    let (tx, mut rx) = unbounded_channel();
    let mut manager = CentralManager::new(FakeBackend::default(), Registry::default(), config).with_delegate(tx);
    manager.handle_event(CentralEvent::AdapterStateChanged(AdapterState::PoweredOn));
    drain(&mut rx);
    (manager, rx)
}

pub fn manager() -> (Manager, UnboundedReceiver<CentralUpdate>) {
    manager_with(ScanConfig::default())
}

pub fn drain(rx: &mut UnboundedReceiver<CentralUpdate>) -> Vec<CentralUpdate> {
    let mut updates = Vec::new();
    while let Ok(update) = rx.try_recv() {
        updates.push(update);
    }
    updates
}

pub fn h(handle: u64) -> AttributeHandle {
    AttributeHandle(handle)
}

pub fn uuid(short: u32) -> Uuid {
    uuid_from_short(short)
}

pub fn discovered(identifier: &str, name: &str, rssi: i32) -> CentralEvent {
    CentralEvent::PeripheralDiscovered {
        identifier: identifier.to_string(),
        advertisement: AdvertisementData::named(name, true),
        rssi,
    }
}

pub fn raw_service(handle: u64, short: u32) -> RawService {
    RawService {
        handle: h(handle),
        uuid: uuid(short),
        is_primary: true,
    }
}

pub fn raw_characteristic(
    handle: u64,
    short: u32,
    properties: EnumSet<CharacteristicProperty>,
) -> RawCharacteristic {
    RawCharacteristic {
        handle: h(handle),
        uuid: uuid(short),
        properties,
        value: None,
        is_notifying: false,
    }
}

pub fn raw_descriptor(handle: u64, short: u32) -> RawDescriptor {
    RawDescriptor {
        handle: h(handle),
        uuid: uuid(short),
        value: None,
    }
}

pub fn services(identifier: &str, raws: Vec<RawService>) -> CentralEvent {
    CentralEvent::ServicesDiscovered {
        identifier: identifier.to_string(),
        services: Ok(raws),
    }
}

pub fn characteristics(identifier: &str, service: u64, raws: Vec<RawCharacteristic>) -> CentralEvent {
    CentralEvent::CharacteristicsDiscovered {
        identifier: identifier.to_string(),
        service: h(service),
        characteristics: Ok(raws),
    }
}

pub fn descriptors(identifier: &str, characteristic: u64, raws: Vec<RawDescriptor>) -> CentralEvent {
    CentralEvent::DescriptorsDiscovered {
        identifier: identifier.to_string(),
        characteristic: h(characteristic),
        descriptors: Ok(raws),
    }
}

/// Battery service (#1) with Battery Level (#10, read + notify, CCCD #100),
/// and Device Information (#2) with Manufacturer Name (#20) and Model
/// Number (#21), neither of which has descriptors.
pub fn battery_tree(identifier: &str) -> Vec<CentralEvent> {
    use CharacteristicProperty::*;
    vec![
        services(identifier, vec![raw_service(1, 0x180F), raw_service(2, 0x180A)]),
        characteristics(identifier, 1, vec![raw_characteristic(10, 0x2A19, Read | Notify)]),
        characteristics(
            identifier,
            2,
            vec![
                raw_characteristic(20, 0x2A29, EnumSet::only(Read)),
                raw_characteristic(21, 0x2A24, EnumSet::only(Read)),
            ],
        ),
        descriptors(identifier, 10, vec![raw_descriptor(100, 0x2902)]),
        descriptors(identifier, 20, Vec::new()),
        descriptors(identifier, 21, Vec::new()),
    ]
}

/// Discovers, connects and fully resolves `identifier` with the battery tree.
pub fn connect_resolved(manager: &mut Manager, identifier: &str) {
    manager.handle_event(discovered(identifier, "Thermo1", -55));
    manager.connect(identifier).expect("connect request");
    manager.handle_event(CentralEvent::PeripheralConnected {
        identifier: identifier.to_string(),
    });
    for event in battery_tree(identifier) {
        manager.handle_event(event);
    }
    manager.backend_mut().take();
}
