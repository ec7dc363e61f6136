//! Defines shared data structures for the Bluetooth module.
//! These are the raw shapes the hardware backend hands to the engine, before
//! the registry wraps them in their specialised profiles.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use enumset::{EnumSet, EnumSetType};
use serde::Serialize;
use uuid::Uuid;

/// Opaque identity of a service, characteristic or descriptor, issued by the
/// backend. Unique within one peripheral; this is how results are matched
/// back to the wrapper that requested them.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttributeHandle(pub u64);

impl Display for AttributeHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// State of the local Bluetooth adapter.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AdapterState {
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
    /// A state code the platform reported that this crate does not know.
    Unrecognized(i32),
}

/// Capability flags a characteristic declares.
#[derive(Debug, EnumSetType)]
pub enum CharacteristicProperty {
    Broadcast,
    Read,
    WriteWithoutResponse,
    Write,
    Notify,
    Indicate,
    AuthenticatedSignedWrites,
    ExtendedProperties,
    NotifyEncryptionRequired,
    IndicateEncryptionRequired,
}

impl CharacteristicProperty {
    /// Short label used in listings.
    pub fn label(self) -> &'static str {
        match self {
            Self::Broadcast => "broadcast",
            Self::Read => "read",
            Self::WriteWithoutResponse => "write-without-response",
            Self::Write => "write",
            Self::Notify => "notify",
            Self::Indicate => "indicate",
            Self::AuthenticatedSignedWrites => "authenticated-signed-writes",
            Self::ExtendedProperties => "extended-properties",
            Self::NotifyEncryptionRequired => "notify-encryption-required",
            Self::IndicateEncryptionRequired => "indicate-encryption-required",
        }
    }
}

/// Bits of the Characteristic Extended Properties descriptor (0x2900).
#[derive(Debug, EnumSetType)]
pub enum ExtendedProperty {
    ReliableWrite,
    WritableAuxiliaries,
}

impl ExtendedProperty {
    pub fn from_bits(bits: u16) -> EnumSet<ExtendedProperty> {
        let mut set = EnumSet::new();
        if bits & 0x0001 != 0 {
            set.insert(ExtendedProperty::ReliableWrite);
        }
        if bits & 0x0002 != 0 {
            set.insert(ExtendedProperty::WritableAuxiliaries);
        }
        set
    }
}

/// How a characteristic write is acknowledged.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WriteType {
    WithResponse,
    WithoutResponse,
}

/// Manufacturer-specific advertisement payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManufacturerData {
    pub company_id: u16,
    pub data: Vec<u8>,
}

/// Advertised fields of a peripheral.
#[derive(Debug, Clone, PartialEq)]
pub struct AdvertisementData {
    pub local_name: Option<String>,
    pub is_connectable: bool,
    pub manufacturer_data: Option<ManufacturerData>,
    pub service_uuids: Vec<Uuid>,
    pub service_data: HashMap<Uuid, Vec<u8>>,
    pub tx_power_level: Option<i16>,
    /// When the advertisement was received. Filled in by the manager when
    /// the backend leaves it empty.
    pub timestamp: Option<DateTime<Utc>>,
}

impl Default for AdvertisementData {
    fn default() -> Self {
        Self {
            local_name: None,
            is_connectable: true,
            manufacturer_data: None,
            service_uuids: Vec::new(),
            service_data: HashMap::new(),
            tx_power_level: None,
            timestamp: None,
        }
    }
}

impl AdvertisementData {
    /// Creates advertisement data carrying only a local name.
    pub fn named(name: &str, is_connectable: bool) -> Self {
        Self {
            local_name: Some(name.to_string()),
            is_connectable,
            ..Self::default()
        }
    }

    /// The advertised name, treating a blank name as absent.
    pub fn name(&self) -> Option<&str> {
        self.local_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

/// A service as the hardware reported it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawService {
    pub handle: AttributeHandle,
    pub uuid: Uuid,
    pub is_primary: bool,
}

/// A characteristic as the hardware reported it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCharacteristic {
    pub handle: AttributeHandle,
    pub uuid: Uuid,
    pub properties: EnumSet<CharacteristicProperty>,
    pub value: Option<Vec<u8>>,
    pub is_notifying: bool,
}

/// A descriptor as the hardware reported it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDescriptor {
    pub handle: AttributeHandle,
    pub uuid: Uuid,
    pub value: Option<Vec<u8>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_names_count_as_absent() {
        assert_eq!(AdvertisementData::named("Thermo1", true).name(), Some("Thermo1"));
        assert_eq!(AdvertisementData::named("   ", true).name(), None);
        assert_eq!(AdvertisementData::default().name(), None);
    }

    #[test]
    fn extended_property_bits_decode() {
        assert!(ExtendedProperty::from_bits(0).is_empty());
        assert_eq!(
            ExtendedProperty::from_bits(0x0003),
            ExtendedProperty::ReliableWrite | ExtendedProperty::WritableAuxiliaries
        );
        assert_eq!(
            ExtendedProperty::from_bits(0x0002),
            EnumSet::only(ExtendedProperty::WritableAuxiliaries)
        );
    }
}
