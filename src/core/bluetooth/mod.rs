//! Bluetooth LE central engine
//! This module discovers peripherals, connects to them and walks their GATT
//! hierarchy into a typed tree of services, characteristics and descriptors.

pub mod characteristic;
pub mod commands;
pub mod constants;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod events;
pub mod manager;
pub mod notification;
pub mod peripheral;
pub mod profiles;
pub mod registry;
pub mod scanner;
pub mod service;
pub mod types;
pub mod value;

#[cfg(feature = "hardware")]
pub mod bluest_backend;

// Re-export types that should be publicly accessible
pub use characteristic::{Characteristic, CharacteristicSnapshot};
pub use commands::CentralBackend;
pub use descriptor::{Descriptor, DescriptorSnapshot};
pub use device::{DeviceSnapshot, DiscoveryData};
pub use error::{BackendError, DeviceSummary, GattError};
pub use events::CentralEvent;
pub use manager::CentralManager;
pub use notification::{CentralDelegate, CentralUpdate};
pub use peripheral::{Peripheral, PeripheralSnapshot};
pub use registry::{Factory, FactoryList, Registry};
pub use service::{Service, ServiceSnapshot};
pub use types::{
    AdapterState, AdvertisementData, AttributeHandle, CharacteristicProperty, ExtendedProperty,
    ManufacturerData, RawCharacteristic, RawDescriptor, RawService, WriteType,
};
pub use value::ValueView;

#[cfg(feature = "hardware")]
pub use bluest_backend::BluestBackend;
