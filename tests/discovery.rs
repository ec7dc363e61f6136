mod common;

use common::*;
use enumset::EnumSet;
use gatt_central::core::bluetooth::types::CharacteristicProperty;
use gatt_central::{CentralEvent, CentralUpdate, GattError, ScanConfig};
use pretty_assertions::assert_eq;

fn connected(manager: &mut Manager) {
    manager.handle_event(discovered(DEVICE, "Thermo1", -55));
    manager.connect(DEVICE).unwrap();
    manager.handle_event(CentralEvent::PeripheralConnected {
        identifier: DEVICE.to_string(),
    });
}

fn service_handles(manager: &Manager) -> (Vec<u64>, Vec<u64>) {
    let peripheral = manager.device(DEVICE).and_then(|d| d.peripheral()).unwrap();
    (
        peripheral.services().iter().map(|s| s.handle().0).collect(),
        peripheral.staged_services().iter().map(|s| s.handle().0).collect(),
    )
}

fn connected_count(updates: &[CentralUpdate]) -> usize {
    updates
        .iter()
        .filter(|u| matches!(u, CentralUpdate::PeripheralConnected(_)))
        .count()
}

#[test]
fn connection_starts_service_discovery() {
    let (mut manager, _rx) = manager();
    connected(&mut manager);

    assert_eq!(
        manager.backend_mut().take(),
        vec![
            Request::Connect(DEVICE.to_string()),
            Request::DiscoverServices(DEVICE.to_string(), Vec::new()),
        ]
    );
    assert!(manager.device(DEVICE).unwrap().is_connected());
    assert!(manager.peripheral(DEVICE).is_none());
}

#[test]
fn all_services_are_staged_before_any_cascade() {
    let (mut manager, _rx) = manager();
    connected(&mut manager);
    manager.backend_mut().take();

    manager.handle_event(services(DEVICE, vec![raw_service(1, 0x180F), raw_service(2, 0x180A)]));

    assert_eq!(
        manager.backend_mut().take(),
        vec![
            Request::DiscoverCharacteristics(DEVICE.to_string(), h(1), Vec::new()),
            Request::DiscoverCharacteristics(DEVICE.to_string(), h(2), Vec::new()),
        ]
    );
    assert_eq!(service_handles(&manager), (vec![], vec![1, 2]));
}

#[test]
fn services_commit_only_after_every_descriptor_arrives() {
    let (mut manager, mut rx) = manager();
    connected(&mut manager);
    let [svcs, chars1, chars2, desc10, desc20, desc21] = battery_tree(DEVICE).try_into().unwrap();

    manager.handle_event(svcs);
    manager.handle_event(chars1);
    manager.handle_event(chars2);
    assert_eq!(service_handles(&manager), (vec![], vec![1, 2]));

    // Device Information resolves first, out of order within the service.
    manager.handle_event(desc21);
    let peripheral = manager.device(DEVICE).and_then(|d| d.peripheral()).unwrap();
    let info = peripheral.service(h(2)).unwrap();
    assert_eq!(info.characteristics().len(), 1);
    assert_eq!(info.staged_characteristics().len(), 1);
    assert_eq!(service_handles(&manager), (vec![], vec![1, 2]));

    manager.handle_event(desc20);
    assert_eq!(service_handles(&manager), (vec![2], vec![1]));
    assert!(manager.peripheral(DEVICE).is_none());
    assert_eq!(connected_count(&drain(&mut rx)), 0);

    manager.handle_event(desc10);
    assert_eq!(service_handles(&manager), (vec![1, 2], vec![]));

    let peripheral = manager.peripheral(DEVICE).unwrap();
    let info = peripheral.service(h(2)).unwrap();
    let order: Vec<u64> = info.characteristics().iter().map(|c| c.handle().0).collect();
    assert_eq!(order, vec![20, 21]);
    assert_eq!(connected_count(&drain(&mut rx)), 1);
}

#[test]
fn empty_levels_promote_immediately() {
    let (mut manager, mut rx) = manager();
    connected(&mut manager);

    manager.handle_event(services(DEVICE, vec![raw_service(1, 0x1805)]));
    manager.handle_event(characteristics(DEVICE, 1, Vec::new()));

    let peripheral = manager.peripheral(DEVICE).unwrap();
    assert_eq!(peripheral.services().len(), 1);
    assert_eq!(connected_count(&drain(&mut rx)), 1);
}

#[test]
fn peripheral_without_services_is_committed() {
    let (mut manager, mut rx) = manager();
    connected(&mut manager);

    manager.handle_event(services(DEVICE, Vec::new()));

    assert!(manager.peripheral(DEVICE).is_some());
    assert!(drain(&mut rx).contains(&CentralUpdate::PeripheralConnected(DEVICE.to_string())));
}

#[test]
fn start_over_rebuilds_the_same_tree() {
    let (mut manager, mut rx) = manager();
    connect_resolved(&mut manager, DEVICE);
    let before = serde_json::to_value(manager.snapshot(DEVICE).unwrap()).unwrap();
    drain(&mut rx);

    manager.start_over_peripheral(DEVICE, None).unwrap();
    assert_eq!(
        manager.backend_mut().take(),
        vec![Request::DiscoverServices(DEVICE.to_string(), Vec::new())]
    );
    assert_eq!(service_handles(&manager), (vec![], vec![]));

    for event in battery_tree(DEVICE) {
        manager.handle_event(event);
    }
    let after = serde_json::to_value(manager.snapshot(DEVICE).unwrap()).unwrap();
    assert_eq!(before, after);
    assert_eq!(connected_count(&drain(&mut rx)), 0);
}

#[test]
fn start_over_service_reports_the_change() {
    let (mut manager, mut rx) = manager();
    connect_resolved(&mut manager, DEVICE);
    drain(&mut rx);

    manager.start_over_service(DEVICE, h(1)).unwrap();
    assert_eq!(
        manager.backend_mut().take(),
        vec![Request::DiscoverCharacteristics(DEVICE.to_string(), h(1), Vec::new())]
    );
    assert_eq!(service_handles(&manager), (vec![2], vec![1]));

    manager.handle_event(characteristics(
        DEVICE,
        1,
        vec![raw_characteristic(
            10,
            0x2A19,
            CharacteristicProperty::Read | CharacteristicProperty::Notify,
        )],
    ));
    manager.handle_event(descriptors(DEVICE, 10, vec![raw_descriptor(100, 0x2902)]));

    assert_eq!(service_handles(&manager), (vec![1, 2], vec![]));
    assert!(drain(&mut rx).contains(&CentralUpdate::ServiceChanged {
        peripheral: DEVICE.to_string(),
        service: h(1),
    }));
}

#[test]
fn start_over_characteristic_restages_its_service() {
    let (mut manager, mut rx) = manager();
    connect_resolved(&mut manager, DEVICE);
    drain(&mut rx);

    manager.start_over_characteristic(DEVICE, h(20)).unwrap();
    assert_eq!(
        manager.backend_mut().take(),
        vec![Request::DiscoverDescriptors(DEVICE.to_string(), h(20))]
    );
    assert_eq!(service_handles(&manager), (vec![1], vec![2]));

    manager.handle_event(descriptors(DEVICE, 20, Vec::new()));
    assert_eq!(service_handles(&manager), (vec![1, 2], vec![]));

    let order: Vec<u64> = manager
        .peripheral(DEVICE)
        .and_then(|p| p.service(h(2)))
        .unwrap()
        .characteristics()
        .iter()
        .map(|c| c.handle().0)
        .collect();
    assert_eq!(order, vec![20, 21]);
    assert!(drain(&mut rx).contains(&CentralUpdate::ServiceChanged {
        peripheral: DEVICE.to_string(),
        service: h(2),
    }));
}

#[test]
fn invalidated_services_are_rediscovered() {
    let (mut manager, mut rx) = manager();
    connect_resolved(&mut manager, DEVICE);
    drain(&mut rx);

    manager.handle_event(CentralEvent::ServicesInvalidated {
        identifier: DEVICE.to_string(),
        services: vec![h(2), h(99)],
    });
    assert_eq!(
        manager.backend_mut().take(),
        vec![Request::DiscoverCharacteristics(DEVICE.to_string(), h(2), Vec::new())]
    );

    manager.handle_event(characteristics(
        DEVICE,
        2,
        vec![raw_characteristic(22, 0x2A26, EnumSet::only(CharacteristicProperty::Read))],
    ));
    manager.handle_event(descriptors(DEVICE, 22, Vec::new()));

    let peripheral = manager.peripheral(DEVICE).unwrap();
    let info = peripheral.service(h(2)).unwrap();
    assert_eq!(info.characteristics().len(), 1);
    assert_eq!(info.characteristics()[0].handle(), h(22));
    assert!(drain(&mut rx).contains(&CentralUpdate::ServiceChanged {
        peripheral: DEVICE.to_string(),
        service: h(2),
    }));
}

#[test]
fn empty_invalidation_rediscovers_everything() {
    let (mut manager, _rx) = manager();
    connect_resolved(&mut manager, DEVICE);

    manager.handle_event(CentralEvent::ServicesInvalidated {
        identifier: DEVICE.to_string(),
        services: Vec::new(),
    });

    assert_eq!(
        manager.backend_mut().take(),
        vec![Request::DiscoverServices(DEVICE.to_string(), Vec::new())]
    );
}

#[test]
fn configured_filters_reach_the_backend() {
    let mut config = ScanConfig::default();
    config.criteria.services = vec!["180F".into()];
    config.criteria.characteristics = vec!["2A19".into()];
    let (mut manager, _rx) = manager_with(config);

    manager.start_scanning().unwrap();
    connected(&mut manager);
    manager.handle_event(services(DEVICE, vec![raw_service(1, 0x180F)]));

    assert_eq!(
        manager.backend_mut().take(),
        vec![
            Request::StartScan(vec![uuid(0x180F)]),
            Request::Connect(DEVICE.to_string()),
            Request::DiscoverServices(DEVICE.to_string(), vec![uuid(0x180F)]),
            Request::DiscoverCharacteristics(DEVICE.to_string(), h(1), vec![uuid(0x2A19)]),
        ]
    );
}

#[test]
fn stale_results_are_ignored() {
    let (mut manager, _rx) = manager();
    connect_resolved(&mut manager, DEVICE);
    let before = serde_json::to_value(manager.snapshot(DEVICE).unwrap()).unwrap();

    manager.handle_event(characteristics(DEVICE, 1, Vec::new()));
    manager.handle_event(descriptors(DEVICE, 10, Vec::new()));
    manager.handle_event(descriptors(DEVICE, 77, Vec::new()));

    let after = serde_json::to_value(manager.snapshot(DEVICE).unwrap()).unwrap();
    assert_eq!(before, after);
    assert!(manager.backend_mut().take().is_empty());
}

#[test]
fn discovery_failure_is_reported_with_its_breadcrumb() {
    let (mut manager, mut rx) = manager();
    connected(&mut manager);
    manager.handle_event(services(DEVICE, vec![raw_service(1, 0x180F)]));
    drain(&mut rx);

    manager.handle_event(CentralEvent::CharacteristicsDiscovered {
        identifier: DEVICE.to_string(),
        service: h(1),
        characteristics: Err("insufficient authentication".to_string()),
    });

    let errors: Vec<GattError> = drain(&mut rx)
        .into_iter()
        .filter_map(|u| match u {
            CentralUpdate::Error { error, .. } => Some(error),
            _ => None,
        })
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(
        errors[0].layered_description(),
        vec!["peripheral_error", DEVICE, "180F", "insufficient authentication"]
    );
    assert!(manager.peripheral(DEVICE).is_none());
    assert_eq!(service_handles(&manager), (vec![], vec![1]));
}

#[test]
fn refused_discovery_becomes_an_internal_error() {
    let (mut manager, mut rx) = manager();
    connected(&mut manager);
    drain(&mut rx);
    manager.backend_mut().refuse = Some(gatt_central::core::bluetooth::BackendError::Platform("busy".into()));

    manager.handle_event(services(DEVICE, vec![raw_service(1, 0x180F)]));

    let error = drain(&mut rx)
        .into_iter()
        .find_map(|u| match u {
            CentralUpdate::Error { error, .. } => Some(error),
            _ => None,
        })
        .unwrap();
    assert_eq!(error.slug(), "peripheral_error");
    assert_eq!(
        error.layered_description(),
        vec!["peripheral_error", DEVICE, "180F", "busy"]
    );
}
