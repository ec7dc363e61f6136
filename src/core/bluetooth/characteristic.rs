//! Characteristic wrapper
//! Owns its descriptors, caches the capability flags and the last value
//! read or notified, and drives descriptor discovery.

use enumset::EnumSet;
use log::{debug, trace};
use serde::Serialize;
use uuid::Uuid;

use crate::core::bluetooth::commands::CentralBackend;
use crate::core::bluetooth::constants::{display_uuid, uuid_from_str, UUID_EXTENDED_PROPERTIES};
use crate::core::bluetooth::descriptor::{Descriptor, DescriptorSnapshot};
use crate::core::bluetooth::error::GattError;
use crate::core::bluetooth::profiles::{CharacteristicProfile, ExtendedProperties};
use crate::core::bluetooth::registry::Registry;
use crate::core::bluetooth::types::{
    AttributeHandle, CharacteristicProperty, ExtendedProperty, RawCharacteristic, RawDescriptor,
    WriteType,
};
use crate::core::bluetooth::value::ValueView;

#[derive(Debug)]
pub struct Characteristic {
    handle: AttributeHandle,
    uuid: Uuid,
    /// Handle of the owning service.
    service: AttributeHandle,
    properties: EnumSet<CharacteristicProperty>,
    value: Option<Vec<u8>>,
    is_notifying: bool,
    descriptors: Vec<Descriptor>,
    profile: Box<dyn CharacteristicProfile>,
}

/// Serializable view of a characteristic and its descriptors.
#[derive(Debug, Clone, Serialize)]
pub struct CharacteristicSnapshot {
    pub uuid: String,
    pub name: String,
    pub properties: Vec<&'static str>,
    pub value: Option<String>,
    pub is_notifying: bool,
    pub descriptors: Vec<DescriptorSnapshot>,
}

impl Characteristic {
    pub(crate) fn new(raw: RawCharacteristic, service: AttributeHandle, registry: &Registry) -> Self {
        let profile = registry.characteristic(&raw);
        Self {
            handle: raw.handle,
            uuid: raw.uuid,
            service,
            properties: raw.properties,
            value: raw.value,
            is_notifying: raw.is_notifying,
            descriptors: Vec::new(),
            profile,
        }
    }

    pub fn handle(&self) -> AttributeHandle {
        self.handle
    }

    pub fn uuid(&self) -> &Uuid {
        &self.uuid
    }

    pub fn id(&self) -> String {
        display_uuid(&self.uuid)
    }

    pub fn service_handle(&self) -> AttributeHandle {
        self.service
    }

    pub fn properties(&self) -> EnumSet<CharacteristicProperty> {
        self.properties
    }

    pub fn has_property(&self, property: CharacteristicProperty) -> bool {
        self.properties.contains(property)
    }

    pub fn can_read(&self) -> bool {
        self.has_property(CharacteristicProperty::Read)
    }

    pub fn can_write(&self) -> bool {
        self.has_property(CharacteristicProperty::Write)
    }

    pub fn can_write_without_response(&self) -> bool {
        self.has_property(CharacteristicProperty::WriteWithoutResponse)
    }

    pub fn can_notify(&self) -> bool {
        self.has_property(CharacteristicProperty::Notify)
    }

    pub fn can_indicate(&self) -> bool {
        self.has_property(CharacteristicProperty::Indicate)
    }

    pub fn can_broadcast(&self) -> bool {
        self.has_property(CharacteristicProperty::Broadcast)
    }

    pub fn requires_authenticated_signed_writes(&self) -> bool {
        self.has_property(CharacteristicProperty::AuthenticatedSignedWrites)
    }

    pub fn requires_notify_encryption(&self) -> bool {
        self.has_property(CharacteristicProperty::NotifyEncryptionRequired)
    }

    pub fn requires_indicate_encryption(&self) -> bool {
        self.has_property(CharacteristicProperty::IndicateEncryptionRequired)
    }

    pub fn has_extended_properties(&self) -> bool {
        self.has_property(CharacteristicProperty::ExtendedProperties)
    }

    /// Extended properties decoded from the 0x2900 descriptor. Empty unless
    /// the characteristic declares extended-properties support and the
    /// descriptor has a value.
    pub fn extended_properties(&self) -> EnumSet<ExtendedProperty> {
        if !self.has_extended_properties() {
            return EnumSet::new();
        }
        let Some(target) = uuid_from_str(UUID_EXTENDED_PROPERTIES) else {
            return EnumSet::new();
        };
        self.descriptors
            .iter()
            .find(|descriptor| *descriptor.uuid() == target)
            .and_then(|descriptor| {
                let value = descriptor.value()?;
                descriptor.profile::<ExtendedProperties>()?.decode(value)
            })
            .unwrap_or_default()
    }

    pub fn can_reliable_write(&self) -> bool {
        self.extended_properties().contains(ExtendedProperty::ReliableWrite)
    }

    pub fn can_write_auxiliaries(&self) -> bool {
        self.extended_properties().contains(ExtendedProperty::WritableAuxiliaries)
    }

    pub fn is_notifying(&self) -> bool {
        self.is_notifying
    }

    pub fn descriptors(&self) -> &[Descriptor] {
        &self.descriptors
    }

    pub fn descriptor(&self, handle: AttributeHandle) -> Option<&Descriptor> {
        self.descriptors.iter().find(|d| d.handle() == handle)
    }

    pub(crate) fn descriptor_mut(&mut self, handle: AttributeHandle) -> Option<&mut Descriptor> {
        self.descriptors.iter_mut().find(|d| d.handle() == handle)
    }

    pub fn descriptor_by_uuid(&self, uuid: &Uuid) -> Option<&Descriptor> {
        self.descriptors.iter().find(|d| d.uuid() == uuid)
    }

    pub fn profile_dyn(&self) -> &dyn CharacteristicProfile {
        &*self.profile
    }

    /// The specialised profile, when this characteristic was built as `T`.
    pub fn profile<T: CharacteristicProfile>(&self) -> Option<&T> {
        self.profile_dyn().as_any().downcast_ref::<T>()
    }

    pub fn name(&self) -> String {
        self.profile
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| self.id())
    }

    pub fn display_value(&self) -> Option<String> {
        let value = self.value.as_deref()?;
        self.profile.display_value(value).or_else(|| self.hex_value())
    }

    pub(crate) fn set_value(&mut self, value: Vec<u8>) {
        trace!("Characteristic {} value: {:02X?}", self.id(), value);
        self.value = Some(value);
    }

    pub(crate) fn set_notifying(&mut self, notifying: bool) {
        self.is_notifying = notifying;
    }

    /// Replaces the descriptors with the complete set the hardware reported.
    /// After this the characteristic is resolved.
    pub(crate) fn set_descriptors(&mut self, raws: Vec<RawDescriptor>, registry: &Registry) {
        let handle = self.handle;
        self.descriptors = raws
            .into_iter()
            .map(|raw| Descriptor::new(raw, handle, registry))
            .collect();
        debug!(
            "Characteristic {} resolved with {} descriptors",
            self.id(),
            self.descriptors.len()
        );
    }

    /// Drops every descriptor. Does not notify anyone.
    pub(crate) fn clear(&mut self) {
        self.descriptors.clear();
    }

    /// Clears the descriptors and asks the hardware for them again.
    pub(crate) fn start_over(
        &mut self,
        peripheral: &str,
        backend: &mut dyn CentralBackend,
    ) -> Result<(), GattError> {
        self.clear();
        debug!("Discovering descriptors of {} on {}", self.id(), peripheral);
        backend
            .discover_descriptors(peripheral, self.handle)
            .map_err(|e| GattError::internal(self.id(), Some(e.into())))
    }

    pub(crate) fn read_value(
        &self,
        peripheral: &str,
        backend: &mut dyn CentralBackend,
    ) -> Result<(), GattError> {
        if !self.can_read() {
            return Err(self.unsupported("read"));
        }
        debug!("Reading characteristic {} of {}", self.id(), peripheral);
        backend
            .read_characteristic(peripheral, self.handle)
            .map_err(|e| GattError::characteristic(self.id(), Some(e.into())))
    }

    pub(crate) fn write_value(
        &self,
        peripheral: &str,
        data: &[u8],
        write_type: WriteType,
        backend: &mut dyn CentralBackend,
    ) -> Result<(), GattError> {
        let allowed = match write_type {
            WriteType::WithResponse => self.can_write(),
            WriteType::WithoutResponse => self.can_write_without_response(),
        };
        if !allowed {
            return Err(self.unsupported(match write_type {
                WriteType::WithResponse => "write",
                WriteType::WithoutResponse => "write without response",
            }));
        }
        debug!(
            "Writing {} bytes to characteristic {} of {} ({:?})",
            data.len(),
            self.id(),
            peripheral,
            write_type
        );
        backend
            .write_characteristic(peripheral, self.handle, data, write_type)
            .map_err(|e| GattError::characteristic(self.id(), Some(e.into())))
    }

    pub(crate) fn set_notify(
        &self,
        peripheral: &str,
        enabled: bool,
        backend: &mut dyn CentralBackend,
    ) -> Result<(), GattError> {
        if !self.can_notify() && !self.can_indicate() {
            return Err(self.unsupported("notify"));
        }
        debug!(
            "{} notifications for {} of {}",
            if enabled { "Enabling" } else { "Disabling" },
            self.id(),
            peripheral
        );
        backend
            .set_notify(peripheral, self.handle, enabled)
            .map_err(|e| GattError::characteristic(self.id(), Some(e.into())))
    }

    fn unsupported(&self, operation: &str) -> GattError {
        GattError::characteristic(
            self.id(),
            Some(GattError::platform(format!("{} is not supported", operation))),
        )
    }

    pub fn snapshot(&self) -> CharacteristicSnapshot {
        CharacteristicSnapshot {
            uuid: self.id(),
            name: self.name(),
            properties: self.properties.iter().map(CharacteristicProperty::label).collect(),
            value: self.display_value(),
            is_notifying: self.is_notifying,
            descriptors: self.descriptors.iter().map(Descriptor::snapshot).collect(),
        }
    }
}

impl ValueView for Characteristic {
    fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }
}
