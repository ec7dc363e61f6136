//! Descriptor wrapper, the leaf of the GATT tree

use log::debug;
use serde::Serialize;
use uuid::Uuid;

use crate::core::bluetooth::commands::CentralBackend;
use crate::core::bluetooth::constants::display_uuid;
use crate::core::bluetooth::error::GattError;
use crate::core::bluetooth::profiles::{DescriptorProfile};
use crate::core::bluetooth::registry::Registry;
use crate::core::bluetooth::types::{AttributeHandle, RawDescriptor};
use crate::core::bluetooth::value::ValueView;

#[derive(Debug)]
pub struct Descriptor {
    handle: AttributeHandle,
    uuid: Uuid,
    /// Handle of the owning characteristic.
    characteristic: AttributeHandle,
    value: Option<Vec<u8>>,
    profile: Box<dyn DescriptorProfile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DescriptorSnapshot {
    pub uuid: String,
    pub name: String,
    pub value: Option<String>,
}

impl Descriptor {
    pub(crate) fn new(raw: RawDescriptor, characteristic: AttributeHandle, registry: &Registry) -> Self {
        let profile = registry.descriptor(&raw);
        Self {
            handle: raw.handle,
            uuid: raw.uuid,
            characteristic,
            value: raw.value,
            profile,
        }
    }

    pub fn handle(&self) -> AttributeHandle {
        self.handle
    }

    pub fn uuid(&self) -> &Uuid {
        &self.uuid
    }

    /// The id used in error breadcrumbs and listings.
    pub fn id(&self) -> String {
        display_uuid(&self.uuid)
    }

    pub fn characteristic_handle(&self) -> AttributeHandle {
        self.characteristic
    }

    pub fn profile_dyn(&self) -> &dyn DescriptorProfile {
        &*self.profile
    }

    /// The specialised profile, when this descriptor was built as `T`.
    pub fn profile<T: DescriptorProfile>(&self) -> Option<&T> {
        self.profile_dyn().as_any().downcast_ref::<T>()
    }

    /// Profile name, falling back to the UUID.
    pub fn name(&self) -> String {
        self.profile
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| self.id())
    }

    /// The value as the profile renders it, else as hex.
    pub fn display_value(&self) -> Option<String> {
        let value = self.value.as_deref()?;
        self.profile.display_value(value).or_else(|| self.hex_value())
    }

    pub(crate) fn set_value(&mut self, value: Vec<u8>) {
        self.value = Some(value);
    }

    pub(crate) fn read_value(
        &self,
        peripheral: &str,
        backend: &mut dyn CentralBackend,
    ) -> Result<(), GattError> {
        debug!("Reading descriptor {} of {}", self.id(), peripheral);
        backend
            .read_descriptor(peripheral, self.handle)
            .map_err(|e| GattError::descriptor(self.id(), Some(e.into())))
    }

    pub(crate) fn write_value(
        &self,
        peripheral: &str,
        data: &[u8],
        backend: &mut dyn CentralBackend,
    ) -> Result<(), GattError> {
        debug!("Writing {} bytes to descriptor {} of {}", data.len(), self.id(), peripheral);
        backend
            .write_descriptor(peripheral, self.handle, data)
            .map_err(|e| GattError::descriptor(self.id(), Some(e.into())))
    }

    pub fn snapshot(&self) -> DescriptorSnapshot {
        DescriptorSnapshot {
            uuid: self.id(),
            name: self.name(),
            value: self.display_value(),
        }
    }
}

impl ValueView for Descriptor {
    fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::constants::uuid_from_short;
    use crate::core::bluetooth::profiles::{ClientCharacteristicConfiguration, GenericDescriptor};

    fn descriptor(short: u32, value: Option<Vec<u8>>) -> Descriptor {
        let raw = RawDescriptor {
            handle: AttributeHandle(21),
            uuid: uuid_from_short(short),
            value,
        };
        Descriptor::new(raw, AttributeHandle(20), &Registry::default())
    }

    #[test]
    fn builds_the_registered_profile() {
        let cccd = descriptor(0x2902, Some(vec![0x01, 0x00]));
        assert_eq!(cccd.characteristic_handle(), AttributeHandle(20));
        assert_eq!(cccd.name(), "Client Characteristic Configuration");
        let profile = cccd.profile::<ClientCharacteristicConfiguration>();
        assert!(profile.is_some_and(|p| p.is_notifying(&[0x01, 0x00])));
        assert!(cccd.profile::<GenericDescriptor>().is_none());
    }

    #[test]
    fn unknown_descriptor_shows_hex() {
        let mut unknown = descriptor(0x29FF, None);
        assert_eq!(unknown.name(), "29FF");
        assert_eq!(unknown.display_value(), None);

        unknown.set_value(vec![0xBE, 0xEF]);
        assert_eq!(unknown.display_value().as_deref(), Some("BEEF"));
        assert_eq!(unknown.snapshot().value.as_deref(), Some("BEEF"));
    }
}
