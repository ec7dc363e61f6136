mod common;

use common::*;
use enumset::EnumSet;
use gatt_central::core::bluetooth::profiles::{CharacteristicProfile, GenericCharacteristic};
use gatt_central::core::bluetooth::registry::Factory;
use gatt_central::core::bluetooth::types::{CharacteristicProperty, RawCharacteristic};
use gatt_central::CentralEvent;

/// Vendor temperature characteristic, hundredths of a degree.
#[derive(Debug)]
struct Temperature;

impl CharacteristicProfile for Temperature {
    fn name(&self) -> Option<&'static str> {
        Some("Temperature")
    }

    fn display_value(&self, value: &[u8]) -> Option<String> {
        let raw = i16::from_le_bytes(value.get(..2)?.try_into().ok()?);
        Some(format!("{:.2} °C", f64::from(raw) / 100.0))
    }
}

fn temperature(_raw: &RawCharacteristic) -> Box<dyn CharacteristicProfile> {
    Box::new(Temperature)
}

#[test]
fn registered_profiles_are_used_for_discovered_characteristics() {
    let (mut manager, _rx) = manager();
    manager
        .registry_mut()
        .characteristics
        .register(Factory::new("FFF1", temperature))
        .unwrap();

    manager.handle_event(discovered(DEVICE, "Thermo1", -55));
    manager.connect(DEVICE).unwrap();
    manager.handle_event(CentralEvent::PeripheralConnected {
        identifier: DEVICE.to_string(),
    });
    let read = EnumSet::only(CharacteristicProperty::Read);
    manager.handle_event(services(DEVICE, vec![raw_service(1, 0xFFF0)]));
    manager.handle_event(characteristics(
        DEVICE,
        1,
        vec![raw_characteristic(10, 0xFFF1, read), raw_characteristic(11, 0xFFF2, read)],
    ));
    manager.handle_event(descriptors(DEVICE, 10, Vec::new()));
    manager.handle_event(descriptors(DEVICE, 11, Vec::new()));
    manager.handle_event(CentralEvent::CharacteristicValueUpdated {
        identifier: DEVICE.to_string(),
        characteristic: h(10),
        value: Ok(2150i16.to_le_bytes().to_vec()),
    });

    let service = manager.peripheral(DEVICE).unwrap().service(h(1)).unwrap();
    assert_eq!(service.name(), "FFF0");

    let custom = service.characteristic(h(10)).unwrap();
    assert!(custom.profile::<Temperature>().is_some());
    assert_eq!(custom.name(), "Temperature");
    assert_eq!(custom.display_value(), Some("21.50 °C".to_string()));

    let generic = service.characteristic(h(11)).unwrap();
    assert!(generic.profile::<GenericCharacteristic>().is_some());
    assert_eq!(generic.name(), "FFF2");
}

#[test]
fn empty_uuid_registration_is_rejected() {
    let (mut manager, _rx) = manager();
    let before = manager.registry().characteristics.len();
    assert!(manager
        .registry_mut()
        .characteristics
        .register(Factory::new("", temperature))
        .is_err());
    assert_eq!(manager.registry().characteristics.len(), before);
}
