//! Requests the engine sends to the Bluetooth hardware
//! Every request is fire-and-forget: the result comes back later as a
//! [`CentralEvent`](crate::core::bluetooth::events::CentralEvent) delivered
//! to [`CentralManager::handle_event`](crate::core::bluetooth::CentralManager::handle_event).
//! An `Err` only means the backend refused the request outright.

use uuid::Uuid;

use crate::core::bluetooth::error::BackendError;
use crate::core::bluetooth::types::{AttributeHandle, WriteType};

/// Hardware backend trait
pub trait CentralBackend {
    /// Start scanning, restricted to peripherals advertising one of
    /// `services` when the slice is non-empty.
    fn start_scan(&mut self, services: &[Uuid]) -> Result<(), BackendError>;

    fn stop_scan(&mut self) -> Result<(), BackendError>;

    fn connect(&mut self, peripheral: &str) -> Result<(), BackendError>;

    fn disconnect(&mut self, peripheral: &str) -> Result<(), BackendError>;

    /// Discover services, all of them when `filter` is empty.
    fn discover_services(&mut self, peripheral: &str, filter: &[Uuid]) -> Result<(), BackendError>;

    /// Discover the characteristics of a service, all of them when `filter`
    /// is empty.
    fn discover_characteristics(
        &mut self,
        peripheral: &str,
        service: AttributeHandle,
        filter: &[Uuid],
    ) -> Result<(), BackendError>;

    fn discover_descriptors(
        &mut self,
        peripheral: &str,
        characteristic: AttributeHandle,
    ) -> Result<(), BackendError>;

    fn read_characteristic(
        &mut self,
        peripheral: &str,
        characteristic: AttributeHandle,
    ) -> Result<(), BackendError>;

    fn write_characteristic(
        &mut self,
        peripheral: &str,
        characteristic: AttributeHandle,
        data: &[u8],
        write_type: WriteType,
    ) -> Result<(), BackendError>;

    fn set_notify(
        &mut self,
        peripheral: &str,
        characteristic: AttributeHandle,
        enabled: bool,
    ) -> Result<(), BackendError>;

    fn read_descriptor(
        &mut self,
        peripheral: &str,
        descriptor: AttributeHandle,
    ) -> Result<(), BackendError>;

    fn write_descriptor(
        &mut self,
        peripheral: &str,
        descriptor: AttributeHandle,
        data: &[u8],
    ) -> Result<(), BackendError>;

    fn read_rssi(&mut self, peripheral: &str) -> Result<(), BackendError>;
}
