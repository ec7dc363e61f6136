//! Events the Bluetooth hardware delivers to the engine.
//!
//! All events must be handed to one [`CentralManager`] from a single serial
//! context, in the order the hardware produced them. The staging invariants
//! of the GATT tree depend on that ordering.
//!
//! [`CentralManager`]: crate::core::bluetooth::CentralManager

use crate::core::bluetooth::types::{
    AdapterState, AdvertisementData, AttributeHandle, RawCharacteristic, RawDescriptor, RawService,
};

/// Platform error text accompanying a failed operation.
pub type PlatformResult<T> = Result<T, String>;

#[derive(Debug, Clone)]
pub enum CentralEvent {
    AdapterStateChanged(AdapterState),

    PeripheralDiscovered {
        identifier: String,
        advertisement: AdvertisementData,
        rssi: i32,
    },

    PeripheralConnected {
        identifier: String,
    },

    PeripheralConnectFailed {
        identifier: String,
        error: Option<String>,
    },

    PeripheralDisconnected {
        identifier: String,
        error: Option<String>,
    },

    ServicesDiscovered {
        identifier: String,
        services: PlatformResult<Vec<RawService>>,
    },

    CharacteristicsDiscovered {
        identifier: String,
        service: AttributeHandle,
        characteristics: PlatformResult<Vec<RawCharacteristic>>,
    },

    DescriptorsDiscovered {
        identifier: String,
        characteristic: AttributeHandle,
        descriptors: PlatformResult<Vec<RawDescriptor>>,
    },

    /// A read completed or a notification/indication arrived.
    CharacteristicValueUpdated {
        identifier: String,
        characteristic: AttributeHandle,
        value: PlatformResult<Vec<u8>>,
    },

    DescriptorValueUpdated {
        identifier: String,
        descriptor: AttributeHandle,
        value: PlatformResult<Vec<u8>>,
    },

    CharacteristicWritten {
        identifier: String,
        characteristic: AttributeHandle,
        result: PlatformResult<()>,
    },

    DescriptorWritten {
        identifier: String,
        descriptor: AttributeHandle,
        result: PlatformResult<()>,
    },

    /// The notify state of a characteristic changed; carries the new state.
    NotificationStateChanged {
        identifier: String,
        characteristic: AttributeHandle,
        result: PlatformResult<bool>,
    },

    RssiRead {
        identifier: String,
        rssi: PlatformResult<i32>,
    },

    /// The peripheral changed its GATT database; these services are stale.
    ServicesInvalidated {
        identifier: String,
        services: Vec<AttributeHandle>,
    },

    ReadyToWriteWithoutResponse {
        identifier: String,
    },

    NameChanged {
        identifier: String,
        name: Option<String>,
    },
}

impl CentralEvent {
    /// The peripheral the event concerns, if any.
    pub fn identifier(&self) -> Option<&str> {
        match self {
            Self::AdapterStateChanged(_) => None,
            Self::PeripheralDiscovered { identifier, .. }
            | Self::PeripheralConnected { identifier }
            | Self::PeripheralConnectFailed { identifier, .. }
            | Self::PeripheralDisconnected { identifier, .. }
            | Self::ServicesDiscovered { identifier, .. }
            | Self::CharacteristicsDiscovered { identifier, .. }
            | Self::DescriptorsDiscovered { identifier, .. }
            | Self::CharacteristicValueUpdated { identifier, .. }
            | Self::DescriptorValueUpdated { identifier, .. }
            | Self::CharacteristicWritten { identifier, .. }
            | Self::DescriptorWritten { identifier, .. }
            | Self::NotificationStateChanged { identifier, .. }
            | Self::RssiRead { identifier, .. }
            | Self::ServicesInvalidated { identifier, .. }
            | Self::ReadyToWriteWithoutResponse { identifier }
            | Self::NameChanged { identifier, .. } => Some(identifier),
        }
    }
}
