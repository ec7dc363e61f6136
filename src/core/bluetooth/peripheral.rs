//! Peripheral wrapper
//! Created when a connection completes. Stages the services the hardware
//! reports and becomes visible to the application once all of them resolved.

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::Serialize;
use uuid::Uuid;

use crate::core::bluetooth::characteristic::Characteristic;
use crate::core::bluetooth::commands::CentralBackend;
use crate::core::bluetooth::descriptor::Descriptor;
use crate::core::bluetooth::error::GattError;
use crate::core::bluetooth::registry::Registry;
use crate::core::bluetooth::service::{Service, ServiceSnapshot};
use crate::core::bluetooth::types::{AttributeHandle, RawService};

#[derive(Debug)]
pub struct Peripheral {
    identifier: String,
    name: Option<String>,
    rssi: i32,
    connected_at: DateTime<Utc>,
    /// Service UUIDs to discover; empty means all.
    service_filter: Vec<Uuid>,
    /// Characteristic UUIDs handed to every service.
    characteristic_filter: Vec<Uuid>,
    services: Vec<Service>,
    staged: Vec<Service>,
    discovered: Vec<AttributeHandle>,
    disconnection_requested: bool,
}

/// Serializable view of a connected peripheral and its resolved tree.
#[derive(Debug, Clone, Serialize)]
pub struct PeripheralSnapshot {
    pub identifier: String,
    pub name: Option<String>,
    pub rssi: i32,
    pub connected_at: DateTime<Utc>,
    pub services: Vec<ServiceSnapshot>,
}

impl Peripheral {
    pub(crate) fn new(identifier: &str, name: Option<String>, rssi: i32, characteristic_filter: Vec<Uuid>) -> Self {
        Self {
            identifier: identifier.to_string(),
            name,
            rssi,
            connected_at: Utc::now(),
            service_filter: Vec::new(),
            characteristic_filter,
            services: Vec::new(),
            staged: Vec::new(),
            discovered: Vec::new(),
            disconnection_requested: false,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn set_name(&mut self, name: Option<String>) {
        self.name = name;
    }

    pub fn rssi(&self) -> i32 {
        self.rssi
    }

    pub(crate) fn set_rssi(&mut self, rssi: i32) {
        self.rssi = rssi;
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn service_filter(&self) -> &[Uuid] {
        &self.service_filter
    }

    /// Set when this side asked for the disconnect.
    pub fn disconnection_requested(&self) -> bool {
        self.disconnection_requested
    }

    pub(crate) fn request_disconnection(&mut self) {
        self.disconnection_requested = true;
    }

    /// Committed services, in discovery order.
    pub fn services(&self) -> &[Service] {
        &self.services
    }

    pub fn staged_services(&self) -> &[Service] {
        &self.staged
    }

    pub fn is_resolved(&self) -> bool {
        self.staged.is_empty()
    }

    pub fn service(&self, handle: AttributeHandle) -> Option<&Service> {
        self.services
            .iter()
            .chain(self.staged.iter())
            .find(|s| s.handle() == handle)
    }

    pub(crate) fn service_mut(&mut self, handle: AttributeHandle) -> Option<&mut Service> {
        self.services
            .iter_mut()
            .chain(self.staged.iter_mut())
            .find(|s| s.handle() == handle)
    }

    pub(crate) fn staged_service_mut(&mut self, handle: AttributeHandle) -> Option<&mut Service> {
        self.staged.iter_mut().find(|s| s.handle() == handle)
    }

    pub fn service_by_uuid(&self, uuid: &Uuid) -> Option<&Service> {
        self.services.iter().find(|s| s.uuid() == uuid)
    }

    /// Handle of the service owning `characteristic`.
    pub fn characteristic_owner(&self, characteristic: AttributeHandle) -> Option<AttributeHandle> {
        self.services
            .iter()
            .chain(self.staged.iter())
            .find(|s| s.characteristic(characteristic).is_some())
            .map(Service::handle)
    }

    /// Handles of the service and characteristic owning `descriptor`.
    pub fn descriptor_owner(&self, descriptor: AttributeHandle) -> Option<(AttributeHandle, AttributeHandle)> {
        self.services
            .iter()
            .chain(self.staged.iter())
            .find_map(|s| s.descriptor_owner(descriptor).map(|c| (s.handle(), c)))
    }

    pub fn characteristic(&self, handle: AttributeHandle) -> Option<&Characteristic> {
        let service = self.characteristic_owner(handle)?;
        self.service(service)?.characteristic(handle)
    }

    pub fn descriptor(&self, handle: AttributeHandle) -> Option<&Descriptor> {
        let (_, characteristic) = self.descriptor_owner(handle)?;
        self.characteristic(characteristic)?.descriptor(handle)
    }

    /// Stages every reported service and returns their handles. The caller
    /// cascades characteristic discovery only after all are staged.
    pub(crate) fn stage_services(&mut self, raws: Vec<RawService>, registry: &Registry) -> Vec<AttributeHandle> {
        self.clear();
        self.discovered = raws.iter().map(|raw| raw.handle).collect();
        let identifier = self.identifier.clone();
        let filter = self.characteristic_filter.clone();
        self.staged = raws
            .into_iter()
            .map(|raw| Service::new(raw, &identifier, filter.clone(), registry))
            .collect();
        debug!("Peripheral {} staged {} services", self.identifier, self.staged.len());
        self.discovered.clone()
    }

    /// Moves a staged service into the committed collection. Returns true
    /// when this emptied the staging collection, which is when the peripheral
    /// itself must be committed. Services that are not staged are ignored.
    pub(crate) fn add_service(&mut self, handle: AttributeHandle) -> bool {
        let Some(index) = self.staged.iter().position(|s| s.handle() == handle) else {
            debug!("Service {} is not staged in {}, ignoring", handle, self.identifier);
            return false;
        };
        let mut service = self.staged.remove(index);
        service.mark_resolved();
        let rank = self.rank(handle);
        let position = self
            .services
            .iter()
            .position(|s| self.rank(s.handle()) > rank)
            .unwrap_or(self.services.len());
        self.services.insert(position, service);

        if self.staged.is_empty() {
            info!(
                "Peripheral {} resolved with {} services",
                self.identifier,
                self.services.len()
            );
            true
        } else {
            false
        }
    }

    /// Moves a committed service back into staging ahead of rediscovery.
    pub(crate) fn restage_service(&mut self, handle: AttributeHandle) -> bool {
        match self.services.iter().position(|s| s.handle() == handle) {
            Some(index) => {
                let service = self.services.remove(index);
                self.staged.push(service);
                true
            }
            None => self.staged.iter().any(|s| s.handle() == handle),
        }
    }

    fn rank(&self, handle: AttributeHandle) -> usize {
        self.discovered
            .iter()
            .position(|h| *h == handle)
            .unwrap_or(usize::MAX)
    }

    /// Drops the whole subtree. Does not notify anyone.
    pub(crate) fn clear(&mut self) {
        for service in self.services.iter_mut().chain(self.staged.iter_mut()) {
            service.clear();
        }
        self.services.clear();
        self.staged.clear();
        self.discovered.clear();
    }

    /// Clears the subtree and asks the hardware for services again,
    /// restricted to `filter` when it is non-empty.
    pub(crate) fn start_over(
        &mut self,
        filter: Vec<Uuid>,
        backend: &mut dyn CentralBackend,
    ) -> Result<(), GattError> {
        self.clear();
        self.service_filter = filter;
        debug!(
            "Discovering services of {} (filter: {:?})",
            self.identifier, self.service_filter
        );
        backend
            .discover_services(&self.identifier, &self.service_filter)
            .map_err(|e| GattError::internal(self.identifier.clone(), Some(e.into())))
    }

    pub fn snapshot(&self) -> PeripheralSnapshot {
        PeripheralSnapshot {
            identifier: self.identifier.clone(),
            name: self.name.clone(),
            rssi: self.rssi,
            connected_at: self.connected_at,
            services: self.services.iter().map(Service::snapshot).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::constants::uuid_from_short;

    fn raw_service(handle: u64, short: u32) -> RawService {
        RawService {
            handle: AttributeHandle(handle),
            uuid: uuid_from_short(short),
            is_primary: true,
        }
    }

    #[test]
    fn resolves_when_every_service_is_added() {
        let mut peripheral = Peripheral::new("AA:BB", Some("Thermo1".into()), -55, Vec::new());
        let handles = peripheral.stage_services(
            vec![raw_service(1, 0x180F), raw_service(8, 0x180A)],
            &Registry::default(),
        );
        assert_eq!(handles.len(), 2);
        assert!(peripheral.services().is_empty());

        assert!(!peripheral.add_service(AttributeHandle(8)));
        assert!(peripheral.add_service(AttributeHandle(1)));
        let order: Vec<_> = peripheral.services().iter().map(Service::id).collect();
        assert_eq!(order, vec!["180F", "180A"]);
        assert!(peripheral.services().iter().all(Service::resolved_once));
    }

    #[test]
    fn restaged_service_leaves_the_committed_collection() {
        let mut peripheral = Peripheral::new("AA:BB", None, -55, Vec::new());
        peripheral.stage_services(vec![raw_service(1, 0x180F)], &Registry::default());
        assert!(peripheral.add_service(AttributeHandle(1)));

        assert!(peripheral.restage_service(AttributeHandle(1)));
        assert!(peripheral.services().is_empty());
        assert!(!peripheral.is_resolved());
        assert!(!peripheral.restage_service(AttributeHandle(42)));
    }

    #[test]
    fn clear_wipes_staged_and_committed() {
        let mut peripheral = Peripheral::new("AA:BB", None, -55, Vec::new());
        peripheral.stage_services(
            vec![raw_service(1, 0x180F), raw_service(8, 0x180A)],
            &Registry::default(),
        );
        peripheral.add_service(AttributeHandle(1));
        peripheral.clear();
        assert!(peripheral.services().is_empty());
        assert!(peripheral.staged_services().is_empty());
    }
}
