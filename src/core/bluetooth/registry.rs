//! UUID-keyed factories that turn raw GATT elements into profiles.
//!
//! Each level (service, characteristic, descriptor) has an ordered list.
//! Entry zero is the generic fallback and is only used when no specialised
//! entry matches. Specialised entries are tried in registration order and
//! the first whose UUID matches wins.

use log::{debug, warn};
use uuid::Uuid;

use crate::core::bluetooth::constants::{self, uuid_from_str};
use crate::core::bluetooth::error::GattError;
use crate::core::bluetooth::profiles::{
    BatteryLevel, BatteryService, CharacteristicProfile, ClientCharacteristicConfiguration,
    CurrentTime, CurrentTimeService, DescriptorProfile, DeviceInformationService,
    DeviceInformationString, ExtendedProperties, GenericCharacteristic, GenericDescriptor,
    GenericService, LocalTimeInformation, PresentationFormat, ServerCharacteristicConfiguration,
    ServiceProfile, SystemId, UserDescription, ValidRange,
};
use crate::core::bluetooth::types::{RawCharacteristic, RawDescriptor, RawService};

/// One registered type: the UUID it handles and how to build it.
pub struct Factory<R, P: ?Sized> {
    pub uuid: &'static str,
    pub construct: fn(&R) -> Box<P>,
}

impl<R, P: ?Sized> Factory<R, P> {
    pub const fn new(uuid: &'static str, construct: fn(&R) -> Box<P>) -> Self {
        Self { uuid, construct }
    }
}

struct Entry<R, P: ?Sized> {
    uuid: Option<Uuid>,
    factory: Factory<R, P>,
}

/// Ordered factories for one GATT level.
pub struct FactoryList<R, P: ?Sized> {
    entries: Vec<Entry<R, P>>,
}

impl<R, P: ?Sized> FactoryList<R, P> {
    /// Creates a list holding only the generic fallback.
    pub fn new(fallback: fn(&R) -> Box<P>) -> Self {
        Self {
            entries: vec![Entry {
                uuid: None,
                factory: Factory::new("", fallback),
            }],
        }
    }

    /// Appends a specialised entry. Its UUID must be a non-empty, parseable
    /// UUID string, so it can never collide with the fallback.
    pub fn register(&mut self, factory: Factory<R, P>) -> Result<(), GattError> {
        let uuid = uuid_from_str(factory.uuid).ok_or_else(|| {
            GattError::internal(
                "registry",
                Some(GattError::platform(format!(
                    "invalid factory UUID {:?}",
                    factory.uuid
                ))),
            )
        })?;
        self.entries.push(Entry {
            uuid: Some(uuid),
            factory,
        });
        Ok(())
    }

    /// Builds the profile for `raw`: the first specialised match, else the
    /// fallback.
    pub fn resolve(&self, uuid: &Uuid, raw: &R) -> Box<P> {
        let entry = self
            .entries
            .iter()
            .skip(1)
            .find(|entry| entry.uuid.as_ref() == Some(uuid))
            .unwrap_or(&self.entries[0]);
        if entry.uuid.is_some() {
            debug!("Resolved {} to registered factory {}", uuid, entry.factory.uuid);
        }
        (entry.factory.construct)(raw)
    }

    /// Number of specialised entries.
    pub fn len(&self) -> usize {
        self.entries.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub type ServiceFactory = Factory<RawService, dyn ServiceProfile>;
pub type CharacteristicFactory = Factory<RawCharacteristic, dyn CharacteristicProfile>;
pub type DescriptorFactory = Factory<RawDescriptor, dyn DescriptorProfile>;

/// The three factory lists. Owned by the central manager.
pub struct Registry {
    pub services: FactoryList<RawService, dyn ServiceProfile>,
    pub characteristics: FactoryList<RawCharacteristic, dyn CharacteristicProfile>,
    pub descriptors: FactoryList<RawDescriptor, dyn DescriptorProfile>,
}

impl Registry {
    /// A registry that only knows the generic types.
    pub fn empty() -> Self {
        Self {
            services: FactoryList::new(GenericService::create),
            characteristics: FactoryList::new(GenericCharacteristic::create),
            descriptors: FactoryList::new(GenericDescriptor::create),
        }
    }

    pub fn service(&self, raw: &RawService) -> Box<dyn ServiceProfile> {
        self.services.resolve(&raw.uuid, raw)
    }

    pub fn characteristic(&self, raw: &RawCharacteristic) -> Box<dyn CharacteristicProfile> {
        self.characteristics.resolve(&raw.uuid, raw)
    }

    pub fn descriptor(&self, raw: &RawDescriptor) -> Box<dyn DescriptorProfile> {
        self.descriptors.resolve(&raw.uuid, raw)
    }
}

const BUILT_IN_SERVICES: &[ServiceFactory] = &[
    Factory::new(constants::UUID_BATTERY_SERVICE, BatteryService::create),
    Factory::new(constants::UUID_CURRENT_TIME_SERVICE, CurrentTimeService::create),
    Factory::new(constants::UUID_DEVICE_INFORMATION_SERVICE, DeviceInformationService::create),
];

const BUILT_IN_CHARACTERISTICS: &[CharacteristicFactory] = &[
    Factory::new(constants::UUID_BATTERY_LEVEL, BatteryLevel::create),
    Factory::new(constants::UUID_CURRENT_TIME, CurrentTime::create),
    Factory::new(constants::UUID_LOCAL_TIME_INFORMATION, LocalTimeInformation::create),
    Factory::new(constants::UUID_SYSTEM_ID, SystemId::create),
    Factory::new(constants::UUID_MANUFACTURER_NAME, DeviceInformationString::manufacturer_name),
    Factory::new(constants::UUID_MODEL_NUMBER, DeviceInformationString::model_number),
    Factory::new(constants::UUID_SERIAL_NUMBER, DeviceInformationString::serial_number),
    Factory::new(constants::UUID_HARDWARE_REVISION, DeviceInformationString::hardware_revision),
    Factory::new(constants::UUID_FIRMWARE_REVISION, DeviceInformationString::firmware_revision),
    Factory::new(constants::UUID_SOFTWARE_REVISION, DeviceInformationString::software_revision),
];

const BUILT_IN_DESCRIPTORS: &[DescriptorFactory] = &[
    Factory::new(constants::UUID_EXTENDED_PROPERTIES, ExtendedProperties::create),
    Factory::new(constants::UUID_USER_DESCRIPTION, UserDescription::create),
    Factory::new(
        constants::UUID_CLIENT_CHARACTERISTIC_CONFIGURATION,
        ClientCharacteristicConfiguration::create,
    ),
    Factory::new(
        constants::UUID_SERVER_CHARACTERISTIC_CONFIGURATION,
        ServerCharacteristicConfiguration::create,
    ),
    Factory::new(constants::UUID_PRESENTATION_FORMAT, PresentationFormat::create),
    Factory::new(constants::UUID_VALID_RANGE, ValidRange::create),
];

fn copy_factory<R, P: ?Sized>(factory: &Factory<R, P>) -> Factory<R, P> {
    Factory::new(factory.uuid, factory.construct)
}

/// The generic types plus every built-in SIG profile.
impl Default for Registry {
    fn default() -> Self {
        let mut registry = Self::empty();
        for factory in BUILT_IN_SERVICES {
            if let Err(e) = registry.services.register(copy_factory(factory)) {
                warn!("Built-in service profile {} dropped: {}", factory.uuid, e);
            }
        }
        for factory in BUILT_IN_CHARACTERISTICS {
            if let Err(e) = registry.characteristics.register(copy_factory(factory)) {
                warn!("Built-in characteristic profile {} dropped: {}", factory.uuid, e);
            }
        }
        for factory in BUILT_IN_DESCRIPTORS {
            if let Err(e) = registry.descriptors.register(copy_factory(factory)) {
                warn!("Built-in descriptor profile {} dropped: {}", factory.uuid, e);
            }
        }
        registry
    }
}
