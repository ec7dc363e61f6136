//! Service wrapper
//! A service stages the characteristics the hardware reports, cascades
//! descriptor discovery into each of them, and is resolved once every staged
//! characteristic has been added back.

use log::{debug, info};
use serde::Serialize;
use uuid::Uuid;

use crate::core::bluetooth::characteristic::{Characteristic, CharacteristicSnapshot};
use crate::core::bluetooth::commands::CentralBackend;
use crate::core::bluetooth::constants::display_uuid;
use crate::core::bluetooth::error::GattError;
use crate::core::bluetooth::profiles::{ServiceProfile};
use crate::core::bluetooth::registry::Registry;
use crate::core::bluetooth::types::{AttributeHandle, RawCharacteristic, RawService};

#[derive(Debug)]
pub struct Service {
    handle: AttributeHandle,
    uuid: Uuid,
    is_primary: bool,
    /// Identifier of the owning peripheral.
    peripheral: String,
    /// Characteristic UUIDs to discover; empty means all.
    filter: Vec<Uuid>,
    characteristics: Vec<Characteristic>,
    staged: Vec<Characteristic>,
    /// Handles in the order the hardware reported them.
    discovered: Vec<AttributeHandle>,
    resolved_once: bool,
    profile: Box<dyn ServiceProfile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceSnapshot {
    pub uuid: String,
    pub name: String,
    pub is_primary: bool,
    pub characteristics: Vec<CharacteristicSnapshot>,
}

impl Service {
    pub(crate) fn new(raw: RawService, peripheral: &str, filter: Vec<Uuid>, registry: &Registry) -> Self {
        let profile = registry.service(&raw);
        Self {
            handle: raw.handle,
            uuid: raw.uuid,
            is_primary: raw.is_primary,
            peripheral: peripheral.to_string(),
            filter,
            characteristics: Vec::new(),
            staged: Vec::new(),
            discovered: Vec::new(),
            resolved_once: false,
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

    pub fn is_primary(&self) -> bool {
        self.is_primary
    }

    pub fn peripheral_identifier(&self) -> &str {
        &self.peripheral
    }

    pub fn filter(&self) -> &[Uuid] {
        &self.filter
    }

    /// Committed characteristics, in discovery order.
    pub fn characteristics(&self) -> &[Characteristic] {
        &self.characteristics
    }

    pub fn staged_characteristics(&self) -> &[Characteristic] {
        &self.staged
    }

    /// True once every staged characteristic has been added.
    pub fn is_resolved(&self) -> bool {
        self.staged.is_empty()
    }

    /// True when this service has been promoted to its peripheral before.
    pub fn resolved_once(&self) -> bool {
        self.resolved_once
    }

    pub(crate) fn mark_resolved(&mut self) {
        self.resolved_once = true;
    }

    /// A committed or staged characteristic.
    pub fn characteristic(&self, handle: AttributeHandle) -> Option<&Characteristic> {
        self.characteristics
            .iter()
            .chain(self.staged.iter())
            .find(|c| c.handle() == handle)
    }

    pub(crate) fn characteristic_mut(&mut self, handle: AttributeHandle) -> Option<&mut Characteristic> {
        self.characteristics
            .iter_mut()
            .chain(self.staged.iter_mut())
            .find(|c| c.handle() == handle)
    }

    pub(crate) fn staged_characteristic_mut(
        &mut self,
        handle: AttributeHandle,
    ) -> Option<&mut Characteristic> {
        self.staged.iter_mut().find(|c| c.handle() == handle)
    }

    pub fn characteristic_by_uuid(&self, uuid: &Uuid) -> Option<&Characteristic> {
        self.characteristics.iter().find(|c| c.uuid() == uuid)
    }

    /// Handle of the characteristic owning `descriptor`, committed or staged.
    pub fn descriptor_owner(&self, descriptor: AttributeHandle) -> Option<AttributeHandle> {
        self.characteristics
            .iter()
            .chain(self.staged.iter())
            .find(|c| c.descriptor(descriptor).is_some())
            .map(Characteristic::handle)
    }

    pub fn profile_dyn(&self) -> &dyn ServiceProfile {
        &*self.profile
    }

    pub fn profile<T: ServiceProfile>(&self) -> Option<&T> {
        self.profile_dyn().as_any().downcast_ref::<T>()
    }

    pub fn name(&self) -> String {
        self.profile
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| self.id())
    }

    /// Stages every reported characteristic and returns their handles. The
    /// caller cascades descriptor discovery only after all are staged.
    pub(crate) fn stage_characteristics(
        &mut self,
        raws: Vec<RawCharacteristic>,
        registry: &Registry,
    ) -> Vec<AttributeHandle> {
        self.clear();
        let handle = self.handle;
        self.discovered = raws.iter().map(|raw| raw.handle).collect();
        self.staged = raws
            .into_iter()
            .map(|raw| Characteristic::new(raw, handle, registry))
            .collect();
        debug!(
            "Service {} of {} staged {} characteristics",
            self.id(),
            self.peripheral,
            self.staged.len()
        );
        self.discovered.clone()
    }

    /// Moves a staged characteristic into the committed collection. Returns
    /// true when this emptied the staging collection. Unknown or already
    /// committed handles are ignored.
    pub(crate) fn add_characteristic(&mut self, handle: AttributeHandle) -> bool {
        let Some(index) = self.staged.iter().position(|c| c.handle() == handle) else {
            debug!("Characteristic {} is not staged in {}, ignoring", handle, self.id());
            return false;
        };
        let characteristic = self.staged.remove(index);
        let rank = self.rank(handle);
        let position = self
            .characteristics
            .iter()
            .position(|c| self.rank(c.handle()) > rank)
            .unwrap_or(self.characteristics.len());
        self.characteristics.insert(position, characteristic);

        if self.staged.is_empty() {
            info!(
                "Service {} of {} resolved with {} characteristics",
                self.id(),
                self.peripheral,
                self.characteristics.len()
            );
            true
        } else {
            false
        }
    }

    /// Moves a committed characteristic back into staging.
    pub(crate) fn restage_characteristic(&mut self, handle: AttributeHandle) -> bool {
        match self.characteristics.iter().position(|c| c.handle() == handle) {
            Some(index) => {
                let characteristic = self.characteristics.remove(index);
                self.staged.push(characteristic);
                true
            }
            None => self.staged.iter().any(|c| c.handle() == handle),
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
        for characteristic in self.characteristics.iter_mut().chain(self.staged.iter_mut()) {
            characteristic.clear();
        }
        self.characteristics.clear();
        self.staged.clear();
        self.discovered.clear();
    }

    /// Clears the subtree and asks the hardware for the characteristics again.
    pub(crate) fn start_over(&mut self, backend: &mut dyn CentralBackend) -> Result<(), GattError> {
        self.clear();
        debug!("Discovering characteristics of {} on {}", self.id(), self.peripheral);
        backend
            .discover_characteristics(&self.peripheral, self.handle, &self.filter)
            .map_err(|e| GattError::internal(self.id(), Some(e.into())))
    }

    pub fn snapshot(&self) -> ServiceSnapshot {
        ServiceSnapshot {
            uuid: self.id(),
            name: self.name(),
            is_primary: self.is_primary,
            characteristics: self
                .characteristics
                .iter()
                .map(Characteristic::snapshot)
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::constants::uuid_from_short;
    use crate::core::bluetooth::profiles::BatteryService;
    use enumset::EnumSet;

    fn battery_service() -> Service {
        let raw = RawService {
            handle: AttributeHandle(1),
            uuid: uuid_from_short(0x180F),
            is_primary: true,
        };
        Service::new(raw, "AA:BB", Vec::new(), &Registry::default())
    }

    fn raw_characteristic(handle: u64, short: u32) -> RawCharacteristic {
        RawCharacteristic {
            handle: AttributeHandle(handle),
            uuid: uuid_from_short(short),
            properties: EnumSet::new(),
            value: None,
            is_notifying: false,
        }
    }

    #[test]
    fn resolves_only_when_the_last_characteristic_is_added() {
        let mut service = battery_service();
        let handles = service.stage_characteristics(
            vec![raw_characteristic(2, 0x2A19), raw_characteristic(4, 0xFFF1)],
            &Registry::default(),
        );
        assert_eq!(handles, vec![AttributeHandle(2), AttributeHandle(4)]);
        assert!(!service.is_resolved());

        assert!(!service.add_characteristic(AttributeHandle(4)));
        assert_eq!(service.characteristics().len(), 1);
        assert!(service.add_characteristic(AttributeHandle(2)));
        assert!(service.is_resolved());
    }

    #[test]
    fn committed_order_follows_discovery_order() {
        let mut service = battery_service();
        service.stage_characteristics(
            vec![
                raw_characteristic(2, 0x2A19),
                raw_characteristic(4, 0xFFF1),
                raw_characteristic(6, 0xFFF2),
            ],
            &Registry::default(),
        );
        service.add_characteristic(AttributeHandle(6));
        service.add_characteristic(AttributeHandle(2));
        service.add_characteristic(AttributeHandle(4));

        let order: Vec<_> = service.characteristics().iter().map(|c| c.handle()).collect();
        assert_eq!(order, vec![AttributeHandle(2), AttributeHandle(4), AttributeHandle(6)]);
    }

    #[test]
    fn adding_an_unstaged_characteristic_is_a_no_op() {
        let mut service = battery_service();
        service.stage_characteristics(vec![raw_characteristic(2, 0x2A19)], &Registry::default());
        assert!(!service.add_characteristic(AttributeHandle(99)));
        assert!(service.add_characteristic(AttributeHandle(2)));
        assert!(!service.add_characteristic(AttributeHandle(2)));
        assert_eq!(service.characteristics().len(), 1);
    }

    #[test]
    fn profile_and_name() {
        let service = battery_service();
        assert!(service.profile::<BatteryService>().is_some());
        assert_eq!(service.name(), "Battery");
        assert_eq!(service.id(), "180F");
    }
}
